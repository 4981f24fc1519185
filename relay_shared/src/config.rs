//! Configuration system.
//!
//! Loads relay configuration from JSON strings/files (file IO left to the
//! app). Everything here is a plain tunable with a documented default.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// UDP bind port. The server always binds `0.0.0.0:<port>`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    /// Base URL of the identity service, e.g. `https://api.koneko.cat/`.
    #[serde(default = "default_identity_base_url")]
    pub identity_base_url: String,
    /// Seconds of silence after which a peer is evicted.
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Seconds between retransmission attempts for unacked reliable frames.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Number of retries before an unacked frame is dropped silently.
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    /// HTTP request timeout for the identity-service join-token call.
    #[serde(default = "default_identity_timeout_secs")]
    pub identity_timeout_secs: u64,
}

fn default_bind_port() -> u16 {
    31130
}

fn default_identity_base_url() -> String {
    "https://api.koneko.cat/".to_string()
}

fn default_peer_timeout_secs() -> u64 {
    60
}

fn default_retry_interval_secs() -> u64 {
    1
}

fn default_retry_cap() -> u32 {
    5
}

fn default_identity_timeout_secs() -> u64 {
    5
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_port: default_bind_port(),
            identity_base_url: default_identity_base_url(),
            peer_timeout_secs: default_peer_timeout_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            retry_cap: default_retry_cap(),
            identity_timeout_secs: default_identity_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bind_port, 31130);
        assert_eq!(cfg.peer_timeout_secs, 60);
        assert_eq!(cfg.retry_cap, 5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = RelayConfig::from_json_str(r#"{"bind_port": 9000}"#).unwrap();
        assert_eq!(cfg.bind_port, 9000);
        assert_eq!(cfg.peer_timeout_secs, 60);
    }
}
