//! Peer configuration document
//!
//! The node reads its settings from `.ddnrc.js`, a CommonJS module exporting a
//! single object. The document is held as an ordered JSON object so fields this
//! tool does not own pass through untouched, and is written back as
//! `module.exports = { ... };`.
//!
//! Owned fields: `port`, `peerPort`, `address`, `publicIp`, `logLevel`,
//! `nethash`, `peers.{list,blackList,options.timeout}`, `forging.secret`,
//! `forging.access.whiteList`, `genesis`, `ssl`.

use crate::error::{PeerError, Result};
use crate::secrets::{SecretPool, SecretShard};
use crate::topology::{FleetTopology, PeerIdentity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;

pub const CONFIG_FILE: &str = ".ddnrc.js";

pub const LOOPBACK: &str = "127.0.0.1";
const MODULE_EXPORTS: &str = "module.exports";
const PEER_TIMEOUT_MS: u64 = 4000;
const SSL_PORT_OFFSET: u16 = 1000;

/// Entry of `peers.list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub ip: String,
    pub port: u16,
    #[serde(rename = "httpPort")]
    pub http_port: u16,
}

/// In-memory config document of one peer
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Synthesize a document for `peer` from scratch.
    pub fn fresh(topology: &FleetTopology, peer: PeerIdentity, use_genesis: bool) -> Self {
        let mut root = Map::new();
        root.insert("port".into(), json!(peer.http_port));
        root.insert("peerPort".into(), json!(peer.p2p_port));
        root.insert("address".into(), json!(LOOPBACK));
        root.insert("publicIp".into(), json!(LOOPBACK));
        root.insert("logLevel".into(), json!("debug"));
        root.insert("nethash".into(), json!(topology.project().nethash()));
        root.insert(
            "peers".into(),
            json!({
                "list": peer_list_value(topology, peer.index),
                "blackList": [],
                "options": { "timeout": PEER_TIMEOUT_MS },
            }),
        );
        root.insert(
            "forging".into(),
            json!({
                "secret": [],
                "access": { "whiteList": [LOOPBACK] },
            }),
        );
        if use_genesis {
            root.insert("genesis".into(), genesis_block());
        }
        root.insert(
            "ssl".into(),
            json!({
                "enabled": false,
                "options": {
                    "port": u32::from(peer.http_port) + u32::from(SSL_PORT_OFFSET),
                    "address": "0.0.0.0",
                    "key": "./ssl/server.key",
                    "cert": "./ssl/server.crt",
                },
            }),
        );
        Self { root }
    }

    /// Parse document text; `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let malformed = |reason: String| PeerError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        };

        let mut body = text.trim();
        if let Some(rest) = body.strip_prefix(MODULE_EXPORTS) {
            body = rest
                .trim_start()
                .strip_prefix('=')
                .ok_or_else(|| malformed("expected `=` after module.exports".into()))?;
        }
        let body = body.trim().trim_end_matches(';');

        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(root)) => Ok(Self { root }),
            Ok(other) => Err(malformed(format!("expected an object, found {}", kind_of(&other)))),
            Err(e) => Err(malformed(e.to_string())),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PeerError::ConfigNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(PeerError::io(path, e)),
        };
        Self::parse(&text, path)
    }

    /// Load the document at `path`, or synthesize a fresh one if none exists.
    pub fn load_or_create(
        path: &Path,
        topology: &FleetTopology,
        peer: PeerIdentity,
        use_genesis: bool,
    ) -> Result<Self> {
        match Self::load(path) {
            Err(PeerError::ConfigNotFound(_)) => Ok(Self::fresh(topology, peer, use_genesis)),
            other => other,
        }
    }

    /// Point the document at `peer`'s ports.
    ///
    /// The top-level `port`/`peerPort` are always set. Nested `port` fields are
    /// rewritten only when they still hold the fleet's base HTTP port, and
    /// nested `peerPort`/`p2pPort` only when they hold the base P2P port; any
    /// other numeric value is left as found. `peers.list` is not touched here.
    pub fn apply_ports(&mut self, topology: &FleetTopology, peer: PeerIdentity) {
        let rules = PortRules {
            http: (topology.base_port(), peer.http_port),
            p2p: (topology.p2p_base_port(), peer.p2p_port),
        };
        for (key, child) in self.root.iter_mut() {
            if key == "port" || key == "peerPort" {
                continue;
            }
            rules.retarget(key, child);
        }
        self.root.insert("port".into(), json!(peer.http_port));
        self.root.insert("peerPort".into(), json!(peer.p2p_port));
    }

    /// Replace `peers.list` with every other peer of the fleet.
    pub fn apply_peer_list(&mut self, topology: &FleetTopology, self_index: u32) {
        let peers = object_entry(&mut self.root, "peers");
        peers.insert("list".into(), peer_list_value(topology, self_index));
        peers.entry("blackList").or_insert_with(|| json!([]));
        peers
            .entry("options")
            .or_insert_with(|| json!({ "timeout": PEER_TIMEOUT_MS }));
    }

    /// Replace `forging.secret` with exactly the tokens of `shard`.
    pub fn apply_secret_shard(&mut self, shard: &SecretShard, pool: &SecretPool) {
        let secrets: Vec<Value> = pool.slice(shard).iter().map(|s| json!(s)).collect();
        let forging = object_entry(&mut self.root, "forging");
        forging.insert("secret".into(), Value::Array(secrets));
    }

    /// Add an empty genesis block unless one is already present.
    pub fn apply_genesis(&mut self) {
        self.root.entry("genesis").or_insert_with(genesis_block);
    }

    pub fn http_port(&self) -> Option<u16> {
        self.root.get("port").and_then(port_value)
    }

    pub fn p2p_port(&self) -> Option<u16> {
        self.root.get("peerPort").and_then(port_value)
    }

    pub fn nethash(&self) -> Option<&str> {
        self.root.get("nethash").and_then(Value::as_str)
    }

    /// `forging.secret`, skipping anything that is not a string
    pub fn secrets(&self) -> Vec<String> {
        self.root
            .get("forging")
            .and_then(|f| f.get("secret"))
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    /// `peers.list`, accepting ports written as numbers or numeric strings
    pub fn peer_list(&self) -> Vec<PeerEntry> {
        let Some(items) = self
            .root
            .get("peers")
            .and_then(|p| p.get("list"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(PeerEntry {
                    ip: item.get("ip")?.as_str()?.to_string(),
                    port: item.get("port").and_then(port_value)?,
                    http_port: item.get("httpPort").and_then(port_value)?,
                })
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn render(&self) -> String {
        // Serializing a Map<String, Value> cannot fail
        let body = serde_json::to_string_pretty(&self.root).unwrap_or_else(|_| "{}".into());
        format!("{MODULE_EXPORTS} = {body};\n")
    }

    /// Write the document atomically; the previous file stays intact on failure.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let write_error = |source: std::io::Error| PeerError::ConfigWriteError {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
        tmp.write_all(self.render().as_bytes()).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(path).map_err(|e| write_error(e.error))?;
        Ok(())
    }
}

struct PortRules {
    http: (u16, u16),
    p2p: (u16, u16),
}

impl PortRules {
    fn retarget(&self, key: &str, value: &mut Value) {
        let rule = match key {
            "port" => Some(self.http),
            "peerPort" | "p2pPort" => Some(self.p2p),
            _ => None,
        };
        if let Some((from, to)) = rule {
            if port_value(value) == Some(from) {
                let quoted = value.is_string();
                *value = if quoted { json!(to.to_string()) } else { json!(to) };
                return;
            }
        }

        match value {
            Value::Object(map) => {
                for (k, child) in map.iter_mut() {
                    if key == "peers" && k == "list" {
                        continue;
                    }
                    self.retarget(k, child);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut().filter_map(Value::as_object_mut) {
                    for (k, child) in item.iter_mut() {
                        self.retarget(k, child);
                    }
                }
            }
            _ => {}
        }
    }
}

fn peer_list_value(topology: &FleetTopology, self_index: u32) -> Value {
    let entries: Vec<PeerEntry> = topology
        .peers()
        .filter(|p| p.index != self_index)
        .map(|p| PeerEntry {
            ip: LOOPBACK.to_string(),
            port: p.p2p_port,
            http_port: p.http_port,
        })
        .collect();
    serde_json::to_value(entries).unwrap_or_else(|_| json!([]))
}

fn genesis_block() -> Value {
    json!({ "delegates": [], "votes": [], "assets": [] })
}

/// Object stored under `key`, replacing any non-object value.
fn object_entry<'a>(root: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = root.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was just made an object"),
    }
}

fn port_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
