//! Error taxonomy for fleet operations
//!
//! Every variant names the port or path it concerns so a message can be shown
//! to the operator as-is.

use std::path::PathBuf;

/// Errors raised by the fleet tool
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer index {index} is outside the fleet range 1..={peer_count}")]
    IndexOutOfRange { index: u32, peer_count: u32 },
    #[error("port {port} does not belong to a fleet of {peer_count} peers starting at {base_port}")]
    PortOutOfRange { port: u16, base_port: u16, peer_count: u32 },
    #[error("invalid peer count {0}: a fleet needs at least one peer")]
    InvalidPeerCount(u32),
    #[error("invalid peer index {index} for a fleet of {peer_count} peers")]
    InvalidPeerIndex { index: u32, peer_count: u32 },
    #[error("port {port} is already in use (use force to take it over)")]
    PortInUse { port: u16 },
    #[error("config document not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("config document {} is malformed: {reason}", path.display())]
    ConfigParse { path: PathBuf, reason: String },
    #[error("failed to write config document {}: {source}", path.display())]
    ConfigWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch node on port {port}: {reason}")]
    ProcessSpawnFailure { port: u16, reason: String },
    #[error("node on port {port} did not become healthy after {attempts} attempts")]
    HealthCheckTimeout { port: u16, attempts: u32 },
    #[error("process {pid} on port {port} ignored graceful termination after {attempts} checks")]
    TerminationTimeout { pid: u32, port: u16, attempts: u32 },
    #[error("node on port {port} is still running, stop it first")]
    PeerRunning { port: u16 },
    #[error("failed to look up the process bound to port {port}: {reason}")]
    ProcessLookup { port: u16, reason: String },
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("settings error: {0}")]
    Settings(String),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PeerError {
    /// Errors that abort the whole invocation rather than a single peer.
    ///
    /// Sharding misuse means a broken invariant; a launch command that cannot
    /// run points at an environment problem shared by every peer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerError::ProcessSpawnFailure { .. }
                | PeerError::InvalidPeerCount(_)
                | PeerError::InvalidPeerIndex { .. }
                | PeerError::IndexOutOfRange { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PeerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = PeerError> = std::result::Result<T, E>;
