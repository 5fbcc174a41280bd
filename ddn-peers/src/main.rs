//! DDN Peers - command-line entry point

use anyhow::{Context, Result};
use clap::Parser;
use ddn_peers::cli::{self, Cli, Command};
use ddn_peers::monitor::{shutdown_channel, MonitorLoop, RemediationPolicy};
use ddn_peers::process::StopOutcome;
use ddn_peers::workspace::FleetLayout;
use ddn_peers::{FleetSupervisor, Settings};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // a missing .env is fine

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ddn_peers=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("{}", cli::SUMMARY);
        return Ok(());
    };

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    command.apply(&mut settings);

    let layout = match &settings.paths.root {
        Some(root) => FleetLayout::new(root),
        None => {
            let cwd = std::env::current_dir().context("reading current directory")?;
            FleetLayout::discover(&cwd)
        }
    };
    info!(
        root = %layout.root().display(),
        project = %settings.fleet.project,
        peers = settings.fleet.peer_count,
        "using fleet"
    );

    let monitor_settings = settings.monitor.clone();
    let supervisor = FleetSupervisor::new(settings, layout).context("building fleet supervisor")?;
    let selection = command.selection();

    match command {
        Command::Start { force, genesis, .. } => {
            let report = supervisor.start(force, genesis, selection).await?;
            info!("{}/{} peers started", report.succeeded(), report.total());
        }
        Command::Stop { force, .. } => {
            let report = supervisor.stop(force, selection).await?;
            let stopped = report
                .outcomes
                .iter()
                .filter(|(_, r)| matches!(r, Ok(StopOutcome::Stopped { .. })))
                .count();
            info!("{stopped}/{} peers stopped", report.total());
        }
        Command::Clean { clean_type, file, .. } => {
            let report = supervisor
                .clean(cli::clean_target(clean_type, file), selection)
                .await?;
            for (peer, err) in report.failures() {
                warn!(peer = peer.index, port = peer.http_port, "not cleaned: {err}");
            }
            info!("{}/{} peers cleaned", report.succeeded(), report.total());
        }
        Command::Monitor { auto_restart, .. } => {
            let (handle, shutdown) = shutdown_channel();
            handle.trigger_on_ctrl_c();
            let remediation = auto_restart.then(|| RemediationPolicy::from(&monitor_settings));
            MonitorLoop::new(
                &supervisor,
                Duration::from_secs(monitor_settings.interval_secs),
                remediation,
            )
            .run(shutdown)
            .await;
        }
        Command::Status { .. } => {
            let report = MonitorLoop::new(&supervisor, Duration::ZERO, None).evaluate().await;
            info!(
                "{}/{} peers healthy",
                report.checked - report.unhealthy,
                report.checked
            );
        }
    }
    Ok(())
}
