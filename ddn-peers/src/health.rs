//! Status endpoint polling
//!
//! Two checks against `GET http://127.0.0.1:<port><status_path>`:
//! - liveness: any non-empty successful answer, retried with a fixed delay
//! - freshness: single shot, the reported `blockTime` must be recent

use crate::settings::HealthSettings;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Fields of the status body the freshness check needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NodeStatus {
    pub height: u64,
    /// Unix seconds of the last produced block
    #[serde(rename = "blockTime")]
    pub block_time: i64,
}

/// Outcome of a freshness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh { height: u64, block_time: i64 },
    Stale { height: u64, age_secs: i64 },
    Unreachable(String),
    Unparseable(String),
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh { .. })
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Freshness::Fresh { height, block_time } => {
                let at = DateTime::<Utc>::from_timestamp(*block_time, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| block_time.to_string());
                write!(f, "healthy: height={height}, last block at {at}")
            }
            Freshness::Stale { height, age_secs } => {
                write!(f, "stalled: height={height}, no new block for {age_secs}s")
            }
            Freshness::Unreachable(reason) => write!(f, "status endpoint unreachable: {reason}"),
            Freshness::Unparseable(reason) => write!(f, "status body unparseable: {reason}"),
        }
    }
}

/// Polls node status endpoints on localhost
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    status_path: String,
    retry_delay: Duration,
    staleness: Duration,
}

impl HealthChecker {
    pub fn new(settings: &HealthSettings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            status_path: settings.status_path.clone(),
            retry_delay: settings.retry_delay(),
            staleness: settings.staleness(),
        })
    }

    pub fn status_url(&self, port: u16) -> String {
        format!("http://127.0.0.1:{port}{}", self.status_path)
    }

    /// Poll until the endpoint answers with a non-empty body, at most
    /// `max_retries` attempts. Exhausting the budget is `false`, never an error.
    pub async fn check_liveness(&self, port: u16, max_retries: u32) -> bool {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            match self.fetch(port).await {
                Ok(body) if !body.trim().is_empty() => {
                    debug!(port, attempt, "node answered");
                    return true;
                }
                Ok(_) => debug!(port, attempt, "empty status body"),
                Err(reason) => debug!(port, attempt, %reason, "status request failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }

    /// One status request judged against the staleness threshold
    pub async fn check_freshness(&self, port: u16) -> Freshness {
        match self.fetch(port).await {
            Ok(body) => self.judge(&body, Utc::now().timestamp()),
            Err(reason) => Freshness::Unreachable(reason),
        }
    }

    fn judge(&self, body: &str, now: i64) -> Freshness {
        if body.trim().is_empty() {
            return Freshness::Unreachable("empty response".into());
        }
        let status: NodeStatus = match serde_json::from_str(body) {
            Ok(status) => status,
            Err(e) => return Freshness::Unparseable(e.to_string()),
        };
        let age_secs = now - status.block_time;
        let limit = i64::try_from(self.staleness.as_secs()).unwrap_or(i64::MAX);
        if age_secs > limit {
            Freshness::Stale {
                height: status.height,
                age_secs,
            }
        } else {
            Freshness::Fresh {
                height: status.height,
                block_time: status.block_time,
            }
        }
    }

    async fn fetch(&self, port: u16) -> Result<String, String> {
        let response = self
            .client
            .get(self.status_url(port))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}
