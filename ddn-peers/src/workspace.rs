//! On-disk layout of a local fleet
//!
//! ```text
//! <root>/examples/
//!   fun-tests/          template project (copied into fresh peers)
//!   peer-8001/          one directory per peer, named by HTTP port
//!     .ddnrc.js
//!     .config_prepared
//!     db/  logs/  ddn.pid
//! ```

use crate::document::CONFIG_FILE;
use crate::error::{PeerError, Result};
use crate::marker::MARKER_FILE;
use crate::topology::{PeerIdentity, ProjectType};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const EXAMPLES_DIR: &str = "examples";
const PEER_DIR_PREFIX: &str = "peer-";
const MULTI_PEERS_DIR: &str = "multi-peers";
const BASIC_LAYOUT: &[&str] = &["logs", "db", "public", "ssl"];

/// Which artifacts `clean` removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CleanScope {
    Db,
    Log,
    Pid,
    All,
}

/// A single artifact `clean --file` can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ArtifactFile {
    Debug,
    Dvm,
    Main,
    Blockchain,
    Peer,
}

impl ArtifactFile {
    fn relative_path(&self) -> &'static str {
        match self {
            ArtifactFile::Debug => "logs/debug.log",
            ArtifactFile::Dvm => "logs/dvm.log",
            ArtifactFile::Main => "logs/main.log",
            ArtifactFile::Blockchain => "db/blockchain.db",
            ArtifactFile::Peer => "db/peer.db",
        }
    }
}

const DB_FILES: &[&str] = &["db/blockchain.db", "db/peer.db", "db/delegates.db"];
const LOG_FILES: &[&str] = &["logs/debug.log", "logs/dvm.log", "logs/main.log"];
const PID_FILES: &[&str] = &["ddn.pid"];

impl CleanScope {
    fn relative_paths(&self) -> Vec<&'static str> {
        match self {
            CleanScope::Db => DB_FILES.to_vec(),
            CleanScope::Log => LOG_FILES.to_vec(),
            CleanScope::Pid => PID_FILES.to_vec(),
            CleanScope::All => [DB_FILES, LOG_FILES, PID_FILES].concat(),
        }
    }
}

/// How a peer directory came to exist for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeding {
    /// Already present and left as is
    Kept,
    /// Copied from the project template
    FromTemplate,
    /// Template missing: bare directory skeleton
    Skeleton,
}

/// Paths of a fleet rooted at a project directory
#[derive(Debug, Clone)]
pub struct FleetLayout {
    root: PathBuf,
}

impl FleetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the first directory holding `examples/`.
    /// Falls back to `start` itself.
    pub fn discover(start: &Path) -> Self {
        let found = start
            .ancestors()
            .find(|dir| dir.join(EXAMPLES_DIR).is_dir())
            .unwrap_or(start);
        Self::new(found)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn examples_dir(&self) -> PathBuf {
        self.root.join(EXAMPLES_DIR)
    }

    pub fn template_dir(&self, project: ProjectType) -> PathBuf {
        self.examples_dir().join(project.as_str())
    }

    pub fn template_config(&self, project: ProjectType) -> PathBuf {
        self.template_dir(project).join(CONFIG_FILE)
    }

    pub fn peer_dir(&self, peer: &PeerIdentity) -> PathBuf {
        self.examples_dir().join(format!("{PEER_DIR_PREFIX}{}", peer.http_port))
    }

    pub fn config_path(&self, peer: &PeerIdentity) -> PathBuf {
        self.peer_dir(peer).join(CONFIG_FILE)
    }

    /// Make sure `peer`'s directory exists.
    ///
    /// A missing directory is built from the project template. With `rebuild`
    /// an existing directory is deleted and rebuilt too, but only when a
    /// template is available to rebuild from.
    pub fn seed_peer_dir(&self, project: ProjectType, peer: &PeerIdentity, rebuild: bool) -> Result<Seeding> {
        let target = self.peer_dir(peer);
        let template = self.template_dir(project);
        let exists = target.is_dir();

        if !template.is_dir() {
            if !exists {
                info!(dir = %target.display(), "template {} missing, creating bare layout", template.display());
            }
            for sub in BASIC_LAYOUT {
                let dir = target.join(sub);
                fs::create_dir_all(&dir).map_err(|e| PeerError::io(&dir, e))?;
            }
            return Ok(if exists { Seeding::Kept } else { Seeding::Skeleton });
        }

        if exists && !rebuild {
            debug!(dir = %target.display(), "peer directory present, keeping it");
            return Ok(Seeding::Kept);
        }
        if exists {
            info!(dir = %target.display(), "rebuilding peer directory from template");
            fs::remove_dir_all(&target).map_err(|e| PeerError::io(&target, e))?;
        }

        info!("copying template {} to {}", template.display(), target.display());
        copy_template(&template, &target)?;
        Ok(Seeding::FromTemplate)
    }

    /// Remove the artifacts of `scope`; returns the files actually deleted.
    pub fn remove_artifacts(&self, peer: &PeerIdentity, scope: CleanScope) -> Result<Vec<PathBuf>> {
        let dir = self.peer_dir(peer);
        let mut removed = Vec::new();
        for rel in scope.relative_paths() {
            if let Some(path) = remove_if_present(&dir.join(rel))? {
                removed.push(path);
            }
        }
        Ok(removed)
    }

    pub fn remove_artifact(&self, peer: &PeerIdentity, file: ArtifactFile) -> Result<Option<PathBuf>> {
        remove_if_present(&self.peer_dir(peer).join(file.relative_path()))
    }
}

fn remove_if_present(path: &Path) -> Result<Option<PathBuf>> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(file = %path.display(), "removed");
            Ok(Some(path.to_path_buf()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PeerError::io(path, e)),
    }
}

/// Recursive copy skipping other peers, `multi-peers` and preparation markers.
fn copy_template(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| PeerError::io(dest, e))?;
    let entries = fs::read_dir(src).map_err(|e| PeerError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PeerError::io(src, e))?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with(PEER_DIR_PREFIX) || name_str == MULTI_PEERS_DIR || name_str == MARKER_FILE {
            continue;
        }
        let from = entry.path();
        let to = dest.join(&name);
        let file_type = entry.file_type().map_err(|e| PeerError::io(&from, e))?;
        if file_type.is_dir() {
            copy_template(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| PeerError::io(&from, e))?;
        }
    }
    Ok(())
}
