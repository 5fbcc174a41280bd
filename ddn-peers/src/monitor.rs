//! Periodic fleet monitoring and remediation
//!
//! Each cycle inspects every peer in order. With remediation enabled, any
//! unhealthy peer triggers the whole-fleet sequence
//! stop(force) -> clean(db) -> start(force) -> liveness re-check.
//!
//! The loop runs until its [`Shutdown`] token fires. The token is checked at
//! the top of a cycle and before the trailing sleep, and it cuts that sleep
//! short.

use crate::fleet::{CleanTarget, FleetSupervisor, PeerSelection};
use crate::settings::MonitorSettings;
use crate::workspace::CleanScope;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Cancellation token observed by the monitor loop
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side of a [`Shutdown`] token
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Trigger on the first Ctrl-C.
    pub fn trigger_on_ctrl_c(self) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping monitor");
                self.trigger();
            }
        });
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`; `false` when cut short by a shutdown request.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = Self::triggered(&mut self.rx) => false,
        }
    }

    async fn triggered(rx: &mut watch::Receiver<bool>) {
        // A dropped handle can never fire
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Waits between remediation steps and the re-check budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationPolicy {
    pub after_stop: Duration,
    pub after_clean: Duration,
    pub after_start: Duration,
    pub recheck_retries: u32,
}

impl From<&MonitorSettings> for RemediationPolicy {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            after_stop: Duration::from_secs(settings.after_stop_secs),
            after_clean: Duration::from_secs(settings.after_clean_secs),
            after_start: Duration::from_secs(settings.after_start_secs),
            recheck_retries: settings.recheck_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationReport {
    pub healthy: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub unhealthy: usize,
    pub remediation: Option<RemediationReport>,
}

pub struct MonitorLoop<'a> {
    supervisor: &'a FleetSupervisor,
    interval: Duration,
    remediation: Option<RemediationPolicy>,
}

impl<'a> MonitorLoop<'a> {
    pub fn new(supervisor: &'a FleetSupervisor, interval: Duration, remediation: Option<RemediationPolicy>) -> Self {
        Self {
            supervisor,
            interval,
            remediation,
        }
    }

    /// Run cycles until `shutdown` fires; returns the number of cycles run.
    pub async fn run(&self, mut shutdown: Shutdown) -> u64 {
        info!(
            peers = self.supervisor.topology().peer_count(),
            interval_secs = self.interval.as_secs(),
            remediation = self.remediation.is_some(),
            "monitoring fleet"
        );
        let mut cycles = 0;
        loop {
            if shutdown.is_triggered() {
                break;
            }
            self.run_cycle().await;
            cycles += 1;
            if shutdown.is_triggered() || !shutdown.sleep(self.interval).await {
                break;
            }
        }
        info!(cycles, "monitor stopped");
        cycles
    }

    /// One inspection pass, remediating if enabled and needed.
    pub async fn run_cycle(&self) -> CycleReport {
        info!("=============== {} ===============", Utc::now().to_rfc3339());
        let mut report = self.evaluate().await;
        if report.unhealthy > 0 {
            if let Some(policy) = self.remediation {
                warn!(unhealthy = report.unhealthy, "unhealthy peers found, restarting the fleet");
                report.remediation = Some(self.remediate(policy).await);
            }
        }
        report
    }

    /// Inspect every peer without acting on the result.
    pub async fn evaluate(&self) -> CycleReport {
        let mut report = CycleReport {
            checked: 0,
            unhealthy: 0,
            remediation: None,
        };
        for peer in self.supervisor.topology().peers() {
            let health = self.supervisor.inspect(peer).await;
            report.checked += 1;
            if health.is_healthy() {
                info!(peer = peer.index, port = peer.http_port, "{health}");
            } else {
                report.unhealthy += 1;
                warn!(peer = peer.index, port = peer.http_port, "{health}");
            }
        }
        report
    }

    /// Every step runs even if an earlier one failed; errors are logged and
    /// the loop keeps going.
    async fn remediate(&self, policy: RemediationPolicy) -> RemediationReport {
        info!("stopping all peers");
        if let Err(e) = self.supervisor.stop(true, PeerSelection::All).await {
            error!("stopping the fleet failed: {e}");
        }
        tokio::time::sleep(policy.after_stop).await;

        info!("cleaning databases");
        if let Err(e) = self
            .supervisor
            .clean(CleanTarget::Scope(CleanScope::Db), PeerSelection::All)
            .await
        {
            error!("cleaning the fleet failed: {e}");
        }
        tokio::time::sleep(policy.after_clean).await;

        info!("restarting all peers");
        match self.supervisor.start(true, false, PeerSelection::All).await {
            Ok(report) => {
                for (peer, e) in report.failures() {
                    warn!(peer = peer.index, port = peer.http_port, "restart failed: {e}");
                }
            }
            Err(e) => error!("restarting the fleet failed: {e}"),
        }
        tokio::time::sleep(policy.after_start).await;

        let total = self.supervisor.topology().peer_count() as usize;
        let healthy = self.supervisor.count_live(policy.recheck_retries).await;
        info!("restart finished, {healthy}/{total} peers healthy");
        RemediationReport { healthy, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::workspace::FleetLayout;

    fn supervisor(root: &std::path::Path) -> FleetSupervisor {
        let mut settings = Settings::default();
        settings.fleet.peer_count = 2;
        FleetSupervisor::new(settings, FleetLayout::new(root)).unwrap()
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_shutdown() {
        let (handle, mut shutdown) = shutdown_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.trigger();
        });
        let completed = tokio::time::timeout(Duration::from_secs(5), shutdown.sleep(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert!(!completed);
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (handle, mut shutdown) = shutdown_channel();
        drop(handle);
        assert!(shutdown.sleep(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn pre_cancelled_loop_runs_no_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let (handle, shutdown) = shutdown_channel();
        handle.trigger();
        let cycles = MonitorLoop::new(&sup, Duration::from_secs(60), None)
            .run(shutdown)
            .await;
        assert_eq!(cycles, 0);
    }

    #[tokio::test]
    async fn cancellation_during_sleep_ends_after_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let (handle, shutdown) = shutdown_channel();
        let monitor = MonitorLoop::new(&sup, Duration::from_secs(3600), None);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.trigger();
        };
        let (cycles, ()) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(monitor.run(shutdown), cancel)
        })
        .await
        .unwrap();
        assert_eq!(cycles, 1);
    }

    #[tokio::test]
    async fn missing_peers_count_as_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let report = MonitorLoop::new(&sup, Duration::from_secs(60), None).run_cycle().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.unhealthy, 2);
        assert!(report.remediation.is_none());
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn unlaunchable_peer(root: &std::path::Path) -> FleetSupervisor {
        let mut settings = Settings::default();
        settings.fleet.base_port = free_port();
        settings.fleet.p2p_base_port = free_port();
        settings.fleet.peer_count = 1;
        settings.launch.command = "definitely-not-a-ddn-binary --daemon".into();
        settings.health.max_retries = 1;
        settings.health.retry_delay_ms = 10;
        settings.health.request_timeout_secs = 1;
        settings.stop.force_settle_ms = 10;
        FleetSupervisor::new(settings, FleetLayout::new(root)).unwrap()
    }

    fn immediate() -> RemediationPolicy {
        RemediationPolicy {
            after_stop: Duration::ZERO,
            after_clean: Duration::ZERO,
            after_start: Duration::ZERO,
            recheck_retries: 1,
        }
    }

    #[tokio::test]
    async fn failed_restart_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let sup = unlaunchable_peer(dir.path());

        let report = MonitorLoop::new(&sup, Duration::from_millis(10), Some(immediate()))
            .run_cycle()
            .await;
        assert_eq!(report.unhealthy, 1);
        assert_eq!(report.remediation, Some(RemediationReport { healthy: 0, total: 1 }));
    }

    #[tokio::test]
    async fn failed_restart_keeps_the_loop_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = unlaunchable_peer(dir.path());
        let (handle, shutdown) = shutdown_channel();
        let monitor = MonitorLoop::new(&sup, Duration::from_millis(50), Some(immediate()));

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            handle.trigger();
        };
        let (cycles, ()) = tokio::time::timeout(Duration::from_secs(20), async {
            tokio::join!(monitor.run(shutdown), cancel)
        })
        .await
        .unwrap();
        assert!(cycles >= 2, "loop ended after {cycles} cycle(s)");
    }

    #[test]
    fn remediation_waits_follow_settings() {
        let policy = RemediationPolicy::from(&MonitorSettings::default());
        assert_eq!(policy.after_stop, Duration::from_secs(5));
        assert_eq!(policy.after_clean, Duration::from_secs(2));
        assert_eq!(policy.after_start, Duration::from_secs(10));
        assert_eq!(policy.recheck_retries, 5);
    }
}
