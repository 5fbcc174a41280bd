/*!
Bac à sable de flotte

Répertoire temporaire avec la structure attendue par ddn-peers :
`<root>/examples/<projet>/` comme template, puis `peer-<port>/` par nœud.
Les helpers lisent les documents générés sans dépendre de ddn-peers.
*/

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const MARKER_FILE: &str = ".config_prepared";
pub const CONFIG_FILE: &str = ".ddnrc.js";

/// Racine temporaire d'une flotte de test
pub struct FleetSandbox {
    dir: TempDir,
}

impl FleetSandbox {
    /// Crée une racine vide avec son dossier `examples/`
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("examples"))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn template_dir(&self, project: &str) -> PathBuf {
        self.root().join("examples").join(project)
    }

    pub fn peer_dir(&self, http_port: u16) -> PathBuf {
        self.root().join("examples").join(format!("peer-{http_port}"))
    }

    /// Nom du i-ème secret du pool de test
    pub fn secret(i: usize) -> String {
        format!("secret passphrase number {i}")
    }

    /// Écrit un template de projet avec `secrets` secrets de forge.
    ///
    /// Le document utilise les ports de base donnés, comme le ferait un
    /// template copié depuis le dépôt du nœud.
    pub fn write_template(&self, project: &str, base_port: u16, p2p_base_port: u16, secrets: usize) -> Result<PathBuf> {
        let dir = self.template_dir(project);
        fs::create_dir_all(dir.join("logs"))?;
        fs::create_dir_all(dir.join("db"))?;
        fs::write(dir.join("app.js"), "// stand-in entry point\n")?;

        let pool: Vec<String> = (0..secrets).map(Self::secret).collect();
        let doc = json!({
            "port": base_port,
            "peerPort": p2p_base_port,
            "address": "127.0.0.1",
            "publicIp": "127.0.0.1",
            "logLevel": "info",
            "nethash": "fl3l5l3l5lk3kk3k",
            "api": { "access": { "whiteList": [] } },
            "peers": { "list": [], "blackList": [], "options": { "timeout": 4000 } },
            "forging": { "secret": pool, "access": { "whiteList": ["127.0.0.1"] } },
            "ssl": { "enabled": false, "options": { "port": 443, "address": "0.0.0.0" } },
        });
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, format!("module.exports = {};\n", serde_json::to_string_pretty(&doc)?))?;
        Ok(path)
    }

    pub fn config_text(&self, http_port: u16) -> Result<String> {
        let path = self.peer_dir(http_port).join(CONFIG_FILE);
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
    }

    /// Document d'un peer, sans l'enveloppe `module.exports = ...;`
    pub fn config_json(&self, http_port: u16) -> Result<Value> {
        let text = self.config_text(http_port)?;
        let body = text
            .trim()
            .trim_start_matches("module.exports")
            .trim_start()
            .trim_start_matches('=')
            .trim()
            .trim_end_matches(';');
        Ok(serde_json::from_str(body)?)
    }

    /// Secrets de forge écrits dans le document d'un peer
    pub fn secrets_of(&self, http_port: u16) -> Result<Vec<String>> {
        let doc = self.config_json(http_port)?;
        Ok(doc["forging"]["secret"]
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    pub fn has_marker(&self, http_port: u16) -> bool {
        self.peer_dir(http_port).join(MARKER_FILE).is_file()
    }

    /// Crée un fichier d'artefact (db, log, pid) dans le dossier d'un peer
    pub fn touch_artifact(&self, http_port: u16, relative: &str) -> Result<PathBuf> {
        let path = self.peer_dir(http_port).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, b"x")?;
        Ok(path)
    }

    /// Écrit un fichier de pool de secrets, un par ligne
    pub fn write_pool_file(&self, secrets: usize) -> Result<PathBuf> {
        let path = self.root().join("secrets.txt");
        let lines: Vec<String> = (0..secrets).map(|i| format!("'{}',", Self::secret(i))).collect();
        fs::write(&path, lines.join("\n"))?;
        Ok(path)
    }
}
