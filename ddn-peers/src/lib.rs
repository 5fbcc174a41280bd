//! DDN Peers - local test-network fleet manager
//!
//! Runs a fleet of DDN nodes on one host:
//! - Deterministic HTTP/P2P port pairs per peer
//! - Forging secrets sharded contiguously across peers
//! - Config documents prepared exactly once per peer directory
//! - Start, stop, clean and monitor with escalating shutdown

pub mod cli;
pub mod document;
pub mod error;
pub mod fleet;
pub mod health;
pub mod marker;
pub mod monitor;
pub mod proc_table;
pub mod process;
pub mod secrets;
pub mod settings;
pub mod topology;
pub mod workspace;

pub use error::{PeerError, Result};
pub use fleet::{FleetSupervisor, PeerSelection};
pub use settings::Settings;
pub use topology::{FleetTopology, PeerIdentity, ProjectType};
