/**
 * DDN DEVNODE - Nœud de développement pour les flottes ddn-peers
 *
 * RÔLE : Se comporter comme un nœud DDN du point de vue de ddn-peers, sans
 * blockchain : lit `.ddnrc.js`, occupe le port HTTP et le port P2P, expose
 * l'endpoint de statut, produit des « blocs » à intervalle fixe.
 *
 * CYCLE DE VIE :
 * - `--daemon` : se relance détaché (groupe de processus propre, sortie vers
 *   logs/main.log) puis rend la main, comme `node app.js --daemon`
 * - SIGTERM / Ctrl-C : arrêt propre, suppression de ddn.pid
 * - `--frozen` : nœud vivant mais bloqué (dernier bloc vieux d'une heure)
 * - `--ignore-sigterm` : nœud sourd à SIGTERM, seul SIGKILL l'arrête
 */

mod config;
mod http;
mod p2p;
mod runtime;
mod state;

use crate::config::NodeConfig;
use crate::http::AppState;
use crate::runtime::RuntimeFiles;
use crate::state::{new_state, ChainState, Shared};

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "ddn-devnode", version)]
struct Opts {
    /// Se détacher du terminal et rendre la main immédiatement
    #[arg(long)]
    daemon: bool,
    /// Secondes entre deux blocs
    #[arg(long = "block-interval-secs", default_value_t = 10)]
    block_interval_secs: u64,
    /// Ne produit plus de blocs ; le dernier date d'une heure
    #[arg(long)]
    frozen: bool,
    /// Ignore SIGTERM (teste l'escalade vers SIGKILL)
    #[arg(long = "ignore-sigterm")]
    ignore_sigterm: bool,
    /// Répertoire du peer (contient .ddnrc.js)
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    if opts.daemon {
        return daemonize(&opts);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ddn_devnode=info")))
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    runtime.block_on(run(opts))
}

/// Relance le binaire sans `--daemon`, détaché, puis sort
fn daemonize(opts: &Opts) -> Result<()> {
    let dir = std::fs::canonicalize(&opts.dir).with_context(|| format!("resolving {}", opts.dir.display()))?;
    let files = RuntimeFiles::new(&dir);
    let log_path = files.main_log();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let exe = std::env::current_exe().context("locating own executable")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("--block-interval-secs")
        .arg(opts.block_interval_secs.to_string())
        .arg("--dir")
        .arg(&dir)
        .current_dir(&dir)
        .stdin(Stdio::null())
        .stdout(log.try_clone().context("duplicating log handle")?)
        .stderr(log);
    if opts.frozen {
        command.arg("--frozen");
    }
    if opts.ignore_sigterm {
        command.arg("--ignore-sigterm");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().context("spawning detached node")?;
    println!("ddn-devnode started in background (pid {})", child.id());
    Ok(())
}

async fn run(opts: Opts) -> Result<()> {
    let dir = std::fs::canonicalize(&opts.dir).with_context(|| format!("resolving {}", opts.dir.display()))?;
    let cfg = NodeConfig::load(&dir).with_context(|| format!("reading config in {}", dir.display()))?;

    let http_listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], cfg.http_port)))
        .await
        .with_context(|| format!("binding HTTP port {}", cfg.http_port))?;
    let p2p_listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], cfg.p2p_port)))
        .await
        .with_context(|| format!("binding P2P port {}", cfg.p2p_port))?;

    let files = RuntimeFiles::new(&dir);
    files.open(std::process::id()).context("writing runtime files")?;
    files
        .debug_log(&format!("node starting on http {} / p2p {}", cfg.http_port, cfg.p2p_port))
        .ok();

    let chain = new_state(ChainState::genesis(OffsetDateTime::now_utc(), opts.frozen));
    let producer = spawn_block_producer(chain.clone(), files.clone(), Duration::from_secs(opts.block_interval_secs.max(1)));
    let p2p = p2p::spawn_p2p_listener(p2p_listener);

    tracing::info!(
        http = cfg.http_port,
        p2p = cfg.p2p_port,
        peers = cfg.peers.len(),
        secrets = cfg.forging_secrets,
        frozen = opts.frozen,
        ignore_sigterm = opts.ignore_sigterm,
        "[devnode] listening"
    );

    let app = http::build_router(AppState {
        chain,
        config: Arc::new(cfg),
    });
    let served = axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal(opts.ignore_sigterm))
        .await;

    producer.abort();
    p2p.abort();
    files.debug_log("node stopped").ok();
    files.remove_pid();
    tracing::info!("[devnode] stopped");
    served.context("HTTP server failed")
}

fn spawn_block_producer(chain: Shared<ChainState>, files: RuntimeFiles, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // le premier tick est immédiat
        loop {
            ticker.tick().await;
            let forged = {
                let mut chain = chain.lock();
                chain.forge(OffsetDateTime::now_utc()).then_some(chain.height)
            };
            if let Some(height) = forged {
                tracing::debug!(height, "forged block");
                files.debug_log(&format!("forged block {height}")).ok();
            }
        }
    })
}

async fn shutdown_signal(ignore_sigterm: bool) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async move {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return std::future::pending::<()>().await;
        };
        while sig.recv().await.is_some() {
            if !ignore_sigterm {
                return;
            }
            tracing::warn!("[devnode] SIGTERM ignored");
        }
        std::future::pending::<()>().await
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("[devnode] shutdown requested");
}
