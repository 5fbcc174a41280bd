//! OS process table access
//!
//! Port to pid lookup, termination signals and liveness probes. On Linux the
//! lookup reads `/proc` directly; elsewhere it asks `lsof`.

use crate::error::{PeerError, Result};
use nix::sys::signal;
use nix::unistd::Pid as NixPid;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};
use tokio::net::TcpStream;
use tracing::debug;

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Termination signals the lifecycle controller sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGTERM
    Graceful,
    /// SIGKILL
    Forced,
}

impl Termination {
    fn as_signal(self) -> signal::Signal {
        match self {
            Termination::Graceful => signal::Signal::SIGTERM,
            Termination::Forced => signal::Signal::SIGKILL,
        }
    }
}

/// Whether something accepts TCP connections on `127.0.0.1:port`
pub async fn is_port_bound(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Pids listening on `port`, lowest first
pub async fn listeners_on(port: u16) -> Result<Vec<u32>> {
    #[cfg(target_os = "linux")]
    let mut pids = {
        let lookup = tokio::task::spawn_blocking(move || procfs::listeners_on(port));
        lookup.await.map_err(|e| PeerError::ProcessLookup {
            port,
            reason: e.to_string(),
        })??
    };
    #[cfg(not(target_os = "linux"))]
    let mut pids = lsof_listeners_on(port).await?;

    pids.sort_unstable();
    pids.dedup();
    debug!(port, ?pids, "port owners");
    Ok(pids)
}

/// First pid listening on `port`, if any
pub async fn listener_on(port: u16) -> Result<Option<u32>> {
    Ok(listeners_on(port).await?.into_iter().next())
}

/// Whether `pid` exists and is not a zombie
pub fn is_alive(pid: u32) -> bool {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return false;
    }
    sys.process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// Deliver `termination` to `pid`. A process that is already gone is not an error.
pub fn send(pid: u32, termination: Termination) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| PeerError::Signal {
        pid,
        reason: "pid out of range".into(),
    })?;
    match signal::kill(NixPid::from_raw(raw), termination.as_signal()) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(PeerError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(target_os = "linux"))]
async fn lsof_listeners_on(port: u16) -> Result<Vec<u32>> {
    let output = tokio::process::Command::new("lsof")
        .args(["-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
        .output()
        .await
        .map_err(|e| PeerError::ProcessLookup {
            port,
            reason: format!("lsof: {e}"),
        })?;
    // lsof exits 1 when nothing matches
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

#[cfg(target_os = "linux")]
mod procfs {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;

    const TCP_LISTEN: &str = "0A";
    const SOCKET_TABLES: &[&str] = &["/proc/net/tcp", "/proc/net/tcp6"];

    pub(super) fn listeners_on(port: u16) -> Result<Vec<u32>> {
        let mut inodes = HashSet::new();
        for table in SOCKET_TABLES {
            match fs::read_to_string(table) {
                Ok(text) => inodes.extend(listening_inodes(&text, port)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(PeerError::ProcessLookup {
                        port,
                        reason: format!("{table}: {e}"),
                    })
                }
            }
        }
        if inodes.is_empty() {
            return Ok(Vec::new());
        }
        owners_of(&inodes, port)
    }

    /// Socket inodes in LISTEN state on `port` from one `/proc/net/tcp*` table
    pub(super) fn listening_inodes(table: &str, port: u16) -> Vec<u64> {
        table
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let local = fields.get(1)?;
                let state = fields.get(3)?;
                let inode = fields.get(9)?;
                let (_, hex_port) = local.rsplit_once(':')?;
                let local_port = u16::from_str_radix(hex_port, 16).ok()?;
                (local_port == port && *state == TCP_LISTEN)
                    .then(|| inode.parse::<u64>().ok())
                    .flatten()
            })
            .filter(|inode| *inode != 0)
            .collect()
    }

    fn owners_of(inodes: &HashSet<u64>, port: u16) -> Result<Vec<u32>> {
        let entries = fs::read_dir("/proc").map_err(|e| PeerError::ProcessLookup {
            port,
            reason: format!("/proc: {e}"),
        })?;
        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if holds_any(&entry.path().join("fd"), inodes) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    // Unreadable fd tables (other users' processes, races with exit) are skipped
    fn holds_any(fd_dir: &Path, inodes: &HashSet<u64>) -> bool {
        let Ok(fds) = fs::read_dir(fd_dir) else {
            return false;
        };
        fds.flatten().any(|fd| {
            fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        })
    }

    fn socket_inode(link: &str) -> Option<u64> {
        link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F41 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 411237 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F41 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 411999 1 0000000000000000 20 4 30 10 -1
   2: 00000000:2329 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 411240 1 0000000000000000 100 0 0 10 0
";

        #[test]
        fn parses_listening_sockets_only() {
            // 0x1F41 = 8001, 0x2329 = 9001
            assert_eq!(listening_inodes(SAMPLE, 8001), vec![411237]);
            assert_eq!(listening_inodes(SAMPLE, 9001), vec![411240]);
            assert!(listening_inodes(SAMPLE, 8002).is_empty());
        }

        #[test]
        fn reads_socket_links() {
            assert_eq!(socket_inode("socket:[411237]"), Some(411237));
            assert_eq!(socket_inode("/dev/null"), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_bound_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_bound(port).await);
        drop(listener);
        assert!(!is_port_bound(port).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn finds_this_process_as_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pids = listeners_on(port).await.unwrap();
        assert!(pids.contains(&std::process::id()));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(u32::MAX - 1));
    }

    #[test]
    fn signalling_a_missing_process_is_fine() {
        // pid_max on Linux is at most 2^22
        assert!(send(4_194_304 + 17, Termination::Graceful).is_ok());
    }
}
