//! Preparation marker
//!
//! A zero-byte `.config_prepared` file next to a peer's config document records
//! that ports, peer list and secret shard have already been written. It is read
//! once at the start of a preparation step and is the only thing that permits
//! mutating the document again.

use crate::error::{PeerError, Result};
use std::path::{Path, PathBuf};

pub const MARKER_FILE: &str = ".config_prepared";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationState {
    Unprepared,
    Prepared,
}

/// Marker file of one peer directory
#[derive(Debug, Clone)]
pub struct PreparedMarker {
    path: PathBuf,
}

impl PreparedMarker {
    pub fn in_dir(peer_dir: &Path) -> Self {
        Self {
            path: peer_dir.join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PreparationState {
        if self.path.is_file() {
            PreparationState::Prepared
        } else {
            PreparationState::Unprepared
        }
    }

    pub fn mark(&self) -> Result<()> {
        std::fs::write(&self.path, b"").map_err(|e| PeerError::io(&self.path, e))
    }

    /// Remove the marker; returns whether one was present.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PeerError::io(&self.path, e)),
        }
    }
}
