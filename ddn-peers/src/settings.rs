//! Tool settings
//!
//! Handles:
//! - Fleet shape (ports, peer count, project)
//! - Where the fleet lives on disk and where secrets come from
//! - Launch, health, stop and monitor timings
//!
//! Read from TOML; every section falls back to defaults so a partial or
//! missing file is fine.

use crate::error::{PeerError, Result};
use crate::topology::{FleetTopology, ProjectType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_ENV: &str = "DDN_PEERS_CONFIG";
const LOCAL_CONFIG: &str = "ddn-peers.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fleet: FleetSettings,
    pub paths: PathSettings,
    pub launch: LaunchSettings,
    pub health: HealthSettings,
    pub stop: StopSettings,
    pub monitor: MonitorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub base_port: u16,
    pub p2p_base_port: u16,
    pub peer_count: u32,
    pub project: ProjectType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Directory holding `examples/`; discovered from the cwd when unset
    pub root: Option<PathBuf>,
    /// Secret pool file (JSON array or one token per line)
    pub secrets_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    pub command: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub status_path: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub staleness_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopSettings {
    pub attempts: u32,
    pub interval_ms: u64,
    pub force_settle_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    pub after_stop_secs: u64,
    pub after_clean_secs: u64,
    pub after_start_secs: u64,
    pub recheck_retries: u32,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            base_port: 8001,
            p2p_base_port: 9001,
            peer_count: 5,
            project: ProjectType::FunTests,
        }
    }
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            command: "node --experimental-vm-modules app.js --daemon".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            status_path: "/api/blocks/getstatus".to_string(),
            max_retries: 10,
            retry_delay_ms: 1000,
            request_timeout_secs: 30,
            staleness_secs: 300,
        }
    }
}

impl Default for StopSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 1000,
            force_settle_ms: 2000,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            after_stop_secs: 5,
            after_clean_secs: 2,
            after_start_secs: 10,
            recheck_retries: 5,
        }
    }
}

impl Settings {
    /// Load settings from `explicit`, else the usual lookup chain.
    ///
    /// `$DDN_PEERS_CONFIG`, `./ddn-peers.toml`, then the per-user config
    /// directory. Nothing found means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::locate(explicit) {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("no settings file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PeerError::io(path, e))?;
        debug!(file = %path.display(), "loading settings");
        Self::from_toml(&content).map_err(|e| PeerError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PeerError::Settings(e.to_string()))
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.is_file() {
            return Some(local);
        }
        Self::user_config_path().filter(|p| p.is_file())
    }

    /// `<config dir>/ddn-peers/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("ddn-peers");
        path.push("config.toml");
        Some(path)
    }

    pub fn topology(&self) -> Result<FleetTopology> {
        FleetTopology::new(
            self.fleet.base_port,
            self.fleet.p2p_base_port,
            self.fleet.peer_count,
            self.fleet.project,
        )
    }
}

impl HealthSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl StopSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn force_settle(&self) -> Duration {
        Duration::from_millis(self.force_settle_ms)
    }
}

impl LaunchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_fleet() {
        let settings = Settings::default();
        assert_eq!(settings.fleet.base_port, 8001);
        assert_eq!(settings.fleet.p2p_base_port, 9001);
        assert_eq!(settings.fleet.peer_count, 5);
        assert_eq!(settings.health.staleness_secs, 300);
        assert_eq!(settings.stop.attempts, 10);
        assert_eq!(settings.stop.interval(), Duration::from_secs(1));
        assert_eq!(settings.monitor.interval_secs, 60);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [fleet]
            peer_count = 3
            project = "main-tests"

            [paths]
            secrets_file = "/tmp/secrets.txt"
            "#,
        )
        .unwrap();
        assert_eq!(settings.fleet.peer_count, 3);
        assert_eq!(settings.fleet.project, ProjectType::MainTests);
        assert_eq!(settings.fleet.base_port, 8001);
        assert_eq!(settings.paths.secrets_file, Some(PathBuf::from("/tmp/secrets.txt")));
        assert_eq!(settings.launch, LaunchSettings::default());
    }

    #[test]
    fn malformed_file_is_a_settings_error() {
        let err = Settings::from_toml("[fleet]\npeer_count = \"many\"").unwrap_err();
        assert!(matches!(err, PeerError::Settings(_)));
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[stop]\nattempts = 3\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.stop.attempts, 3);
    }

    #[test]
    fn user_config_path_is_namespaced() {
        if let Some(path) = Settings::user_config_path() {
            assert!(path.ends_with("ddn-peers/config.toml"));
        }
    }
}
