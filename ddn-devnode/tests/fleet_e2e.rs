//! Drives real `ddn-devnode` daemons through the fleet supervisor.
#![cfg(target_os = "linux")]

use ddn_peers::fleet::{CleanTarget, PeerHealth};
use ddn_peers::health::Freshness;
use ddn_peers::monitor::{MonitorLoop, RemediationPolicy, RemediationReport};
use ddn_peers::proc_table;
use ddn_peers::process::StopOutcome;
use ddn_peers::workspace::{CleanScope, FleetLayout};
use ddn_peers::{FleetSupervisor, PeerSelection, Settings};
use ddn_peers_devkit::{free_port_block, init_test_logging, FleetSandbox};
use std::time::Duration;

const PROJECT: &str = "fun-tests";

fn launch_command(extra: &str) -> String {
    let exe = shell_quote(env!("CARGO_BIN_EXE_ddn-devnode"));
    format!("{exe} --daemon --block-interval-secs 1 {extra}").trim_end().to_string()
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn fleet(peers: u16, launch: &str) -> (FleetSandbox, FleetSupervisor, u16) {
    init_test_logging();
    let sandbox = FleetSandbox::new().unwrap();
    let base = free_port_block(peers * 2).unwrap();
    let p2p_base = base + peers;
    sandbox.write_template(PROJECT, base, p2p_base, 6).unwrap();

    let mut settings = Settings::default();
    settings.fleet.base_port = base;
    settings.fleet.p2p_base_port = p2p_base;
    settings.fleet.peer_count = u32::from(peers);
    settings.launch.command = launch.to_string();
    settings.health.max_retries = 25;
    settings.health.retry_delay_ms = 200;
    settings.health.request_timeout_secs = 2;
    settings.stop.interval_ms = 200;
    settings.stop.force_settle_ms = 200;

    let sup = FleetSupervisor::new(settings, FleetLayout::new(sandbox.root())).unwrap();
    (sandbox, sup, base)
}

#[tokio::test]
async fn fleet_starts_stops_and_cleans_real_nodes() {
    let (sandbox, sup, base) = fleet(2, &launch_command(""));

    let report = sup.start(false, true, PeerSelection::All).await.unwrap();
    assert_eq!(report.succeeded(), 2, "{:?}", report.failures().collect::<Vec<_>>());

    for port in [base, base + 1] {
        let dir = sandbox.peer_dir(port);
        assert!(dir.join("ddn.pid").is_file());
        assert!(dir.join("db/blockchain.db").is_file());
        assert!(sandbox.has_marker(port));
        assert_eq!(sandbox.secrets_of(port).unwrap().len(), 3);
    }
    assert_eq!(sup.count_live(1).await, 2);

    let peer = sup.topology().peer_for_http_port(base).unwrap();
    assert!(matches!(sup.inspect(peer).await, PeerHealth::Api(Freshness::Fresh { .. })));

    // the node refuses to be wiped while it runs
    let refused = sup
        .clean(CleanTarget::Scope(CleanScope::Db), PeerSelection::Single(base))
        .await
        .unwrap();
    assert!(refused.outcomes[0].1.is_err());

    let stopped = sup.stop(false, PeerSelection::All).await.unwrap();
    for (_, outcome) in &stopped.outcomes {
        assert!(matches!(outcome, Ok(StopOutcome::Stopped { forced: false, .. })), "{outcome:?}");
    }
    // graceful shutdown removes the pid file
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!sandbox.peer_dir(base).join("ddn.pid").exists());

    let again = sup.stop(false, PeerSelection::All).await.unwrap();
    assert!(again
        .outcomes
        .iter()
        .all(|(_, o)| matches!(o, Ok(StopOutcome::NothingToStop))));

    let cleaned = sup
        .clean(CleanTarget::Scope(CleanScope::All), PeerSelection::All)
        .await
        .unwrap();
    assert_eq!(cleaned.succeeded(), 2);
    assert!(!sandbox.peer_dir(base).join("db/blockchain.db").exists());
    assert!(!sandbox.has_marker(base));
}

#[tokio::test]
async fn monitor_flags_a_frozen_node_as_stale() {
    let (_sandbox, sup, base) = fleet(1, &launch_command("--frozen"));

    let report = sup.start(false, false, PeerSelection::All).await.unwrap();
    assert_eq!(report.succeeded(), 1);

    let peer = sup.topology().peer_for_http_port(base).unwrap();
    assert!(matches!(sup.inspect(peer).await, PeerHealth::Api(Freshness::Stale { .. })));

    let cycle = MonitorLoop::new(&sup, Duration::from_secs(1), None).evaluate().await;
    assert_eq!((cycle.checked, cycle.unhealthy), (1, 1));

    sup.stop(true, PeerSelection::All).await.unwrap();
}

#[tokio::test]
async fn remediation_restarts_a_stalled_fleet() {
    let (sandbox, sup, base) = fleet(2, &launch_command("--frozen"));
    assert_eq!(sup.start(false, false, PeerSelection::All).await.unwrap().succeeded(), 2);

    let pid_of = |port: u16| std::fs::read_to_string(sandbox.peer_dir(port).join("ddn.pid")).unwrap();
    let first_pids = [pid_of(base), pid_of(base + 1)];
    for port in [base, base + 1] {
        sandbox.touch_artifact(port, "db/peer.db").unwrap();
    }

    let policy = RemediationPolicy {
        after_stop: Duration::ZERO,
        after_clean: Duration::ZERO,
        after_start: Duration::ZERO,
        recheck_retries: 10,
    };
    let cycle = MonitorLoop::new(&sup, Duration::from_secs(1), Some(policy)).run_cycle().await;

    assert_eq!(cycle.unhealthy, 2);
    assert_eq!(cycle.remediation, Some(RemediationReport { healthy: 2, total: 2 }));
    for (port, old_pid) in [base, base + 1].into_iter().zip(first_pids) {
        assert!(!sandbox.peer_dir(port).join("db/peer.db").exists());
        assert_ne!(pid_of(port), old_pid, "peer on {port} was not restarted");
        assert!(sandbox.has_marker(port));
    }

    sup.stop(true, PeerSelection::All).await.unwrap();
}

#[tokio::test]
async fn stop_escalates_to_sigkill_when_sigterm_is_ignored() {
    let (sandbox, sup, base) = fleet(1, &launch_command("--ignore-sigterm"));
    assert_eq!(sup.start(false, false, PeerSelection::All).await.unwrap().succeeded(), 1);

    let stopped = sup.stop(false, PeerSelection::Single(base)).await.unwrap();
    assert!(
        matches!(stopped.outcomes[0].1, Ok(StopOutcome::Stopped { forced: true, .. })),
        "{:?}",
        stopped.outcomes[0].1
    );
    assert!(!proc_table::is_port_bound(base).await);
    // SIGKILL gives the node no chance to remove its pid file
    assert!(sandbox.peer_dir(base).join("ddn.pid").exists());
    assert!(std::fs::read_to_string(sandbox.peer_dir(base).join("logs/main.log"))
        .unwrap()
        .contains("SIGTERM ignored"));
}
