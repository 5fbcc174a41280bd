//! Command-line surface
//!
//! `start`, `stop`, `clean`, `monitor` and `status`, each taking the fleet
//! size and project. Flags override the loaded [`Settings`] for one run.

use crate::fleet::{CleanTarget, PeerSelection};
use crate::settings::{Settings, CONFIG_ENV};
use crate::topology::ProjectType;
use crate::workspace::{ArtifactFile, CleanScope};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Local DDN test-network fleet manager
#[derive(Parser, Debug, Clone)]
#[command(name = "ddn-peers", version)]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Prepare and start peers
    Start {
        #[command(flatten)]
        fleet: FleetArgs,
        /// Kill whatever holds the ports and rebuild peer directories
        #[arg(short, long)]
        force: bool,
        /// Start only the peer owning this HTTP port
        #[arg(short, long)]
        port: Option<u16>,
        /// Add an empty genesis block to the config document
        #[arg(short, long)]
        genesis: bool,
    },
    /// Stop peers
    Stop {
        #[command(flatten)]
        fleet: FleetArgs,
        /// SIGKILL right away instead of SIGTERM first
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Remove data, logs or pid files of stopped peers
    Clean {
        #[command(flatten)]
        fleet: FleetArgs,
        #[arg(short = 'c', long = "clean-type", value_enum, default_value = "all")]
        clean_type: CleanScope,
        /// Remove only this file (overrides --clean-type)
        #[arg(short, long, value_enum)]
        file: Option<ArtifactFile>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Watch peers and optionally restart the fleet when one goes bad
    Monitor {
        #[command(flatten)]
        fleet: FleetArgs,
        /// Seconds between checks
        #[arg(short, long)]
        interval: Option<u64>,
        /// Restart the whole fleet when a peer is unhealthy
        #[arg(short = 'r', long = "auto-restart")]
        auto_restart: bool,
    },
    /// Check every peer once
    Status {
        #[command(flatten)]
        fleet: FleetArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FleetArgs {
    /// Number of peers
    #[arg(short = 'n', long = "count")]
    pub count: Option<u32>,
    /// Test project the fleet is built from
    #[arg(short = 't', long = "project", value_enum)]
    pub project: Option<ProjectType>,
}

impl FleetArgs {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(count) = self.count {
            settings.fleet.peer_count = count;
        }
        if let Some(project) = self.project {
            settings.fleet.project = project;
        }
    }
}

impl Command {
    pub fn fleet_args(&self) -> &FleetArgs {
        match self {
            Command::Start { fleet, .. }
            | Command::Stop { fleet, .. }
            | Command::Clean { fleet, .. }
            | Command::Monitor { fleet, .. }
            | Command::Status { fleet } => fleet,
        }
    }

    /// Fold command-line overrides into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        self.fleet_args().apply(settings);
        if let Command::Monitor {
            interval: Some(secs), ..
        } = self
        {
            settings.monitor.interval_secs = *secs;
        }
    }

    pub fn selection(&self) -> PeerSelection {
        match self {
            Command::Start { port, .. } | Command::Stop { port, .. } | Command::Clean { port, .. } => {
                PeerSelection::from_port(*port)
            }
            Command::Monitor { .. } | Command::Status { .. } => PeerSelection::All,
        }
    }
}

pub fn clean_target(clean_type: CleanScope, file: Option<ArtifactFile>) -> CleanTarget {
    match file {
        Some(file) => CleanTarget::File(file),
        None => CleanTarget::Scope(clean_type),
    }
}

/// Printed when no command is given
pub const SUMMARY: &str = "\
DDN multi-peer management

Available commands:
  start    - prepare and start DDN peers
  stop     - stop DDN peers
  clean    - clean data and logs of DDN peers
  monitor  - monitor DDN peers
  status   - check every peer once

Use --help on each command for details";
