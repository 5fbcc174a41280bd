/**
 * CONFIGURATION DU NŒUD - Lecture de `.ddnrc.js`
 *
 * RÔLE : Extraire du document préparé par ddn-peers ce dont le nœud de
 * développement a besoin : ports, identité réseau, secrets et liste de peers.
 * Le parsing réutilise `ddn_peers::document` pour rester aligné sur le format.
 */

use ddn_peers::document::{ConfigDocument, PeerEntry, CONFIG_FILE};
use ddn_peers::PeerError;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Document(#[from] PeerError),
    #[error("{0} missing or invalid in .ddnrc.js")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub http_port: u16,
    pub p2p_port: u16,
    pub nethash: String,
    pub forging_secrets: usize,
    pub peers: Vec<PeerEntry>,
}

impl NodeConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let doc = ConfigDocument::load(&dir.join(CONFIG_FILE))?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &ConfigDocument) -> Result<Self, ConfigError> {
        Ok(Self {
            http_port: doc.http_port().ok_or(ConfigError::MissingField("port"))?,
            p2p_port: doc.p2p_port().ok_or(ConfigError::MissingField("peerPort"))?,
            nethash: doc.nethash().unwrap_or_default().to_string(),
            forging_secrets: doc.secrets().len(),
            peers: doc.peer_list(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_prepared_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"module.exports = {
  "port": 8002,
  "peerPort": "9002",
  "nethash": "fl3l5l3l5lk3kk3k",
  "peers": { "list": [ { "ip": "127.0.0.1", "port": 9001, "httpPort": 8001 } ] },
  "forging": { "secret": ["a", "b"] }
};
"#,
        )
        .unwrap();

        let cfg = NodeConfig::load(dir.path()).unwrap();
        assert_eq!((cfg.http_port, cfg.p2p_port), (8002, 9002));
        assert_eq!(cfg.forging_secrets, 2);
        assert_eq!(cfg.peers[0].http_port, 8001);
    }

    #[test]
    fn missing_port_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{ "peerPort": 9001 }"#).unwrap();
        assert!(matches!(NodeConfig::load(dir.path()), Err(ConfigError::MissingField("port"))));
    }

    #[test]
    fn missing_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeConfig::load(dir.path()),
            Err(ConfigError::Document(PeerError::ConfigNotFound(_)))
        ));
    }
}
