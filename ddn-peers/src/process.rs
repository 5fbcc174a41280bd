//! Per-peer process lifecycle
//!
//! ```text
//! NotRunning -> Starting -> AwaitingHealth -> Running
//!                               |
//!                               +-> Unhealthy -> (kill) -> NotRunning
//! Running | Unhealthy -> Stopping -> Stopped
//! ```
//!
//! The node daemonizes itself, so the controller never owns a child handle.
//! Everything after launch goes through the port the node listens on.

use crate::error::{PeerError, Result};
use crate::health::HealthChecker;
use crate::proc_table::{self, Termination};
use crate::settings::{LaunchSettings, StopSettings};
use crate::topology::PeerIdentity;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerProcessState {
    NotRunning,
    Starting,
    AwaitingHealth,
    Running,
    Unhealthy,
    Stopping,
    Stopped,
}

/// How hard and how long to wait for a process to go away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub attempts: u32,
    pub interval: Duration,
    pub force_settle: Duration,
}

impl From<&StopSettings> for StopPolicy {
    fn from(settings: &StopSettings) -> Self {
        Self {
            attempts: settings.attempts,
            interval: settings.interval(),
            force_settle: settings.force_settle(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Neither port was bound
    NothingToStop,
    Stopped {
        pid: u32,
        /// SIGKILL was needed (requested, or SIGTERM was ignored)
        forced: bool,
        /// A different process that still held the P2P port
        p2p_pid: Option<u32>,
    },
}

/// Drives one peer's OS process through its states
#[derive(Debug)]
pub struct ProcessLifecycleController {
    peer: PeerIdentity,
    peer_dir: PathBuf,
    launch: LaunchSettings,
    policy: StopPolicy,
    state: PeerProcessState,
}

impl ProcessLifecycleController {
    pub fn new(peer: PeerIdentity, peer_dir: PathBuf, launch: LaunchSettings, policy: StopPolicy) -> Self {
        Self {
            peer,
            peer_dir,
            launch,
            policy,
            state: PeerProcessState::NotRunning,
        }
    }

    pub fn state(&self) -> PeerProcessState {
        self.state
    }

    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }

    /// Make sure neither port is held before launching.
    ///
    /// Without `force` a bound port is `PortInUse` and nothing changes. With
    /// `force` every holder is killed and the OS gets `force_settle` to
    /// release the sockets.
    pub async fn claim_ports(&mut self, force: bool) -> Result<()> {
        let mut bound = Vec::new();
        for port in [self.peer.http_port, self.peer.p2p_port] {
            if proc_table::is_port_bound(port).await {
                bound.push(port);
            }
        }
        let Some(&first) = bound.first() else {
            return Ok(());
        };
        if !force {
            return Err(PeerError::PortInUse { port: first });
        }

        for port in bound {
            for pid in proc_table::listeners_on(port).await? {
                warn!(peer = self.peer.index, port, pid, "force start: killing port holder");
                proc_table::send(pid, Termination::Forced)?;
            }
        }
        tokio::time::sleep(self.policy.force_settle).await;
        Ok(())
    }

    /// Run the launch command inside the peer directory and wait for it to
    /// return. The node detaches on its own; a command that cannot run or
    /// exits non-zero is `ProcessSpawnFailure`.
    pub async fn launch(&mut self) -> Result<()> {
        let port = self.peer.http_port;
        let spawn_failure = |reason: String| PeerError::ProcessSpawnFailure { port, reason };

        let argv = shell_words::split(&self.launch.command).map_err(|e| spawn_failure(e.to_string()))?;
        let Some((program, args)) = argv.split_first() else {
            return Err(spawn_failure("launch command is empty".into()));
        };

        self.state = PeerProcessState::Starting;
        info!(peer = self.peer.index, port, dir = %self.peer_dir.display(), "launching `{}`", self.launch.command);

        let run = Command::new(program)
            .args(args)
            .current_dir(&self.peer_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.launch.timeout(), run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.state = PeerProcessState::NotRunning;
                return Err(spawn_failure(format!("{program}: {e}")));
            }
            Err(_) => {
                self.state = PeerProcessState::NotRunning;
                return Err(spawn_failure(format!(
                    "launch command did not return within {}s",
                    self.launch.timeout_secs
                )));
            }
        };

        if !output.status.success() {
            self.state = PeerProcessState::NotRunning;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(spawn_failure(format!("{}: {}", output.status, stderr.trim())));
        }

        self.state = PeerProcessState::AwaitingHealth;
        Ok(())
    }

    /// Wait for the status endpoint. A node that never answers is killed.
    pub async fn await_health(&mut self, checker: &HealthChecker, max_retries: u32) -> Result<()> {
        let port = self.peer.http_port;
        if checker.check_liveness(port, max_retries).await {
            self.state = PeerProcessState::Running;
            info!(peer = self.peer.index, port, "node is up");
            return Ok(());
        }

        self.state = PeerProcessState::Unhealthy;
        for port in [self.peer.http_port, self.peer.p2p_port] {
            for pid in proc_table::listeners_on(port).await.unwrap_or_default() {
                debug!(peer = self.peer.index, port, pid, "killing unhealthy node");
                if let Err(e) = proc_table::send(pid, Termination::Forced) {
                    warn!(peer = self.peer.index, port, "{e}");
                }
            }
        }
        self.state = PeerProcessState::NotRunning;
        Err(PeerError::HealthCheckTimeout {
            port,
            attempts: max_retries,
        })
    }

    /// Claim ports, launch, and wait until the node answers.
    pub async fn start(&mut self, force: bool, checker: &HealthChecker, max_retries: u32) -> Result<()> {
        self.claim_ports(force).await?;
        self.launch().await?;
        self.await_health(checker, max_retries).await
    }

    /// Stop whatever serves this peer.
    ///
    /// The HTTP port owner is preferred, the P2P owner is the fallback. After
    /// the main process is gone, a different process still on the P2P port is
    /// stopped the same way.
    pub async fn stop(&mut self, force: bool) -> Result<StopOutcome> {
        let http_owner = proc_table::listener_on(self.peer.http_port).await?;
        let (pid, port) = match http_owner {
            Some(pid) => (pid, self.peer.http_port),
            None => match proc_table::listener_on(self.peer.p2p_port).await? {
                Some(pid) => (pid, self.peer.p2p_port),
                None => {
                    self.state = PeerProcessState::NotRunning;
                    return Ok(StopOutcome::NothingToStop);
                }
            },
        };

        self.state = PeerProcessState::Stopping;
        let forced = match self.terminate(pid, port, force).await {
            Ok(forced) => forced,
            Err(e) => return Err(self.stop_failed(e)),
        };

        let mut p2p_pid = None;
        if let Some(other) = proc_table::listener_on(self.peer.p2p_port).await? {
            if other != pid {
                info!(peer = self.peer.index, port = self.peer.p2p_port, pid = other, "stopping P2P port holder");
                if let Err(e) = self.terminate(other, self.peer.p2p_port, force).await {
                    return Err(self.stop_failed(e));
                }
                p2p_pid = Some(other);
            }
        }

        self.state = PeerProcessState::Stopped;
        Ok(StopOutcome::Stopped { pid, forced, p2p_pid })
    }

    /// A process that could not be stopped leaves the peer `Unhealthy`.
    fn stop_failed(&mut self, e: PeerError) -> PeerError {
        self.state = PeerProcessState::Unhealthy;
        e
    }

    /// SIGTERM and wait, escalating to SIGKILL; returns whether SIGKILL was sent.
    async fn terminate(&self, pid: u32, port: u16, force: bool) -> Result<bool> {
        if !force {
            info!(peer = self.peer.index, port, pid, "sending SIGTERM");
            proc_table::send(pid, Termination::Graceful)?;
            if self.wait_for_exit(pid).await {
                return Ok(false);
            }
            let timeout = PeerError::TerminationTimeout {
                pid,
                port,
                attempts: self.policy.attempts,
            };
            warn!(peer = self.peer.index, "{timeout}, escalating to SIGKILL");
        }

        info!(peer = self.peer.index, port, pid, "sending SIGKILL");
        proc_table::send(pid, Termination::Forced)?;
        if !self.wait_for_exit(pid).await {
            return Err(PeerError::Signal {
                pid,
                reason: "process survived SIGKILL".into(),
            });
        }
        Ok(true)
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        for _ in 0..self.policy.attempts.max(1) {
            if !proc_table::is_alive(pid) {
                return true;
            }
            tokio::time::sleep(self.policy.interval).await;
        }
        !proc_table::is_alive(pid)
    }
}
