//! Fleet topology and port allocation
//!
//! A fleet is `peer_count` nodes numbered from 1. Peer `i` owns the HTTP port
//! `base_port + i - 1` and the P2P port `p2p_base_port + i - 1`, so index and
//! ports are mutually derivable.

use crate::error::{PeerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Test project a fleet is built from; selects the network identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    FunTests,
    MainTests,
}

impl ProjectType {
    /// Template directory name under `examples/`
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::FunTests => "fun-tests",
            ProjectType::MainTests => "main-tests",
        }
    }

    /// `nethash` written into fresh config documents
    pub fn nethash(&self) -> &'static str {
        match self {
            ProjectType::FunTests => "fl3l5l3l5lk3kk3k",
            ProjectType::MainTests => "da121d8d8d21a3d6",
        }
    }
}

impl Default for ProjectType {
    fn default() -> Self {
        ProjectType::FunTests
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-run fleet parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetTopology {
    base_port: u16,
    p2p_base_port: u16,
    peer_count: u32,
    project: ProjectType,
}

/// A peer's derived identity: index plus its port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub index: u32,
    pub http_port: u16,
    pub p2p_port: u16,
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer #{} (http {}, p2p {})", self.index, self.http_port, self.p2p_port)
    }
}

impl FleetTopology {
    pub fn new(base_port: u16, p2p_base_port: u16, peer_count: u32, project: ProjectType) -> Result<Self> {
        if peer_count < 1 {
            return Err(PeerError::InvalidPeerCount(peer_count));
        }
        for base in [base_port, p2p_base_port] {
            if u64::from(base) + u64::from(peer_count) - 1 > u64::from(u16::MAX) {
                return Err(PeerError::Settings(format!(
                    "{peer_count} peers starting at port {base} overflow the port range"
                )));
            }
        }
        Ok(Self {
            base_port,
            p2p_base_port,
            peer_count,
            project,
        })
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn p2p_base_port(&self) -> u16 {
        self.p2p_base_port
    }

    pub fn peer_count(&self) -> u32 {
        self.peer_count
    }

    pub fn project(&self) -> ProjectType {
        self.project
    }

    /// Port pair of peer `index`
    pub fn allocate(&self, index: u32) -> Result<PeerIdentity> {
        if index < 1 || index > self.peer_count {
            return Err(PeerError::IndexOutOfRange {
                index,
                peer_count: self.peer_count,
            });
        }
        // new() guarantees both ranges fit in u16
        let offset = (index - 1) as u16;
        Ok(PeerIdentity {
            index,
            http_port: self.base_port + offset,
            p2p_port: self.p2p_base_port + offset,
        })
    }

    /// Inverse of [`allocate`](Self::allocate) keyed by HTTP port
    pub fn peer_for_http_port(&self, http_port: u16) -> Result<PeerIdentity> {
        let out_of_range = || PeerError::PortOutOfRange {
            port: http_port,
            base_port: self.base_port,
            peer_count: self.peer_count,
        };
        let offset = http_port.checked_sub(self.base_port).ok_or_else(out_of_range)?;
        self.allocate(u32::from(offset) + 1).map_err(|_| out_of_range())
    }

    /// Every peer in index order
    pub fn peers(&self) -> impl Iterator<Item = PeerIdentity> + '_ {
        (1..=self.peer_count).filter_map(move |i| self.allocate(i).ok())
    }
}
