//! Neighbour bookkeeping and peer-list parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A neighbouring agent reachable over the exchange transport.
///
/// Health is observational only: a peer marked unhealthy is still
/// contacted on the next broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPeer {
    #[serde(rename = "id")]
    pub identifier: String,
    pub endpoint: String,
    pub healthy: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl AgentPeer {
    pub fn new(identifier: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            endpoint: endpoint.into(),
            healthy: false,
            last_seen: None,
            last_error: None,
        }
    }

    pub fn mark_success(&mut self) {
        self.healthy = true;
        self.last_seen = Some(Utc::now());
        self.last_error = None;
    }

    pub fn mark_failure(&mut self, error: impl Into<String>) {
        self.healthy = false;
        self.last_error = Some(error.into());
        self.last_seen = Some(Utc::now());
    }

    /// Full URL envelopes are POSTed to.
    pub fn exchange_url(&self) -> String {
        format!(
            "{}{}",
            self.endpoint.trim_end_matches('/'),
            crate::EXCHANGE_PATH
        )
    }
}

/// Parse a comma-separated list of `name=url` pairs.
///
/// Bare fragments are accepted too: a URL (contains `://`) or a plain name is
/// used as both identifier and endpoint. Fragments that leave the identifier
/// or the endpoint empty are skipped.
pub fn parse_peers(raw: &str) -> Vec<AgentPeer> {
    raw.split(',')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .filter_map(|chunk| {
            let (identifier, endpoint) = match chunk.split_once('=') {
                Some((name, url)) => (name.trim(), url.trim()),
                None => (chunk, chunk),
            };
            if identifier.is_empty() || endpoint.is_empty() {
                return None;
            }
            Some(AgentPeer::new(identifier, endpoint))
        })
        .collect()
}
