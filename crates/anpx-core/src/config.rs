//! Configuration for the Gateway and Receiver binaries.
//!
//! Resolution order: config file → defaults → environment variable
//! overrides.
//!
//! Config file location:
//!   1. `$ANPX_CONFIG` (explicit override)
//!   2. `$XDG_CONFIG_HOME/anpx/config.toml`
//!   3. `~/.config/anpx/config.toml`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for the single listener serving both the HTTP front and
    /// the WebSocket acceptor (`spec.md` §9 open question: one combined port,
    /// not an independently configurable `ws_addr`).
    pub http_addr: String,
    /// Connection cap enforced on accept; exceeding it rejects before reading any frames.
    pub max_connections: usize,
    /// A connection idle (no WebSocket frame) longer than this is evicted by the health sweep.
    pub connection_timeout_secs: u64,
    /// Ping sent if `now - last_ping > ping_interval_secs`.
    pub ping_interval_secs: u64,
    /// Health sweep cadence.
    pub health_sweep_interval_secs: u64,
    /// Per-request await deadline.
    pub per_request_timeout_secs: u64,
    /// Hard age limit for pending-request records, distinct from the per-request timeout.
    pub pending_table_max_age_secs: u64,
    /// Chunk-reassembly buffers older than this are discarded by the stale sweep.
    pub chunk_reassembly_max_age_secs: u64,
    /// Maximum encoded frame size the message encoder will target before chunking.
    pub max_chunk_size: usize,
    /// HTTP request bodies larger than this are rejected with 413.
    pub max_request_body_bytes: usize,
    /// Regex patterns for the malicious-path deny list (`spec.md` §4.10, §9).
    pub deny_path_patterns: Vec<String>,
    /// Fallback service domain used when neither `X-Forwarded-Host` nor `Host` is present.
    pub default_service_domain: String,
    /// Bounded outbound queue size per connection before it is treated as unhealthy.
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Non-empty list acts as an additional filter over DID-WBA verification (`spec.md` §6).
    pub allowed_dids: Vec<String>,
    /// Fixed DID → advertised-paths mapping, for fleets known up front rather
    /// than resolved from a DID document (`spec.md` §6 "DID→paths oracle").
    pub did_paths: std::collections::BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Gateway WebSocket URL, e.g. `ws://gateway.example:8080/ws`.
    pub gateway_url: String,
    /// This Receiver's DID, used to build DID-WBA auth headers.
    pub did: String,
    /// Base URL of the local application this Receiver forwards decoded
    /// HTTP requests to, e.g. `http://127.0.0.1:8090`.
    pub local_app_url: String,
    /// Initial reconnect backoff delay.
    pub reconnect_initial_delay_ms: u64,
    /// Backoff cap; delay is `min(initial * 2^(attempt-1), cap)`.
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before entering the terminal failed state. `<= 0` means unbounded.
    pub reconnect_max_attempts: i64,
    /// Interval between outbound ping text frames.
    pub ping_interval_secs: u64,
    /// Maximum encoded frame size the message encoder will target before chunking.
    pub max_chunk_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            max_connections: 1024,
            connection_timeout_secs: 90,
            ping_interval_secs: 30,
            health_sweep_interval_secs: 10,
            per_request_timeout_secs: 30,
            pending_table_max_age_secs: 300,
            chunk_reassembly_max_age_secs: 60,
            max_chunk_size: 64 * 1024,
            max_request_body_bytes: 64 * 1024 * 1024,
            deny_path_patterns: default_deny_patterns(),
            default_service_domain: "localhost".to_string(),
            outbound_queue_capacity: 256,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allowed_dids: Vec::new(),
            did_paths: std::collections::BTreeMap::new(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:8080/ws".to_string(),
            did: String::new(),
            local_app_url: "http://127.0.0.1:8090".to_string(),
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 300_000,
            reconnect_max_attempts: 0,
            ping_interval_secs: 30,
            max_chunk_size: 64 * 1024,
        }
    }
}

fn default_deny_patterns() -> Vec<String> {
    // Non-exhaustive scanning-pattern heuristics; operators extend this list.
    vec![
        r"\.\./".to_string(),
        r"^/\.git".to_string(),
        r"^/\.env".to_string(),
        r"^/wp-admin".to_string(),
        r"\x00".to_string(),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("anpx")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn config_file_path() -> PathBuf {
    std::env::var("ANPX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir().join("config.toml"))
}

/// The full on-disk configuration document, loaded once and split into its
/// three independently-owned sections by each binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnpxConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub receiver: ReceiverConfig,
}

impl Default for AnpxConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            auth: AuthConfig::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl AnpxConfig {
    /// Load config: file (if present) → defaults, then env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        let mut config = if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            AnpxConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = config_file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&AnpxConfig::default()).map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ANPX_GATEWAY__HTTP_ADDR") {
            self.gateway.http_addr = v;
        }
        if let Ok(v) = std::env::var("ANPX_GATEWAY__MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.gateway.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("ANPX_GATEWAY__MAX_CHUNK_SIZE") {
            if let Ok(n) = v.parse() {
                self.gateway.max_chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("ANPX_AUTH__ALLOWED_DIDS") {
            self.auth.allowed_dids = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var("ANPX_RECEIVER__GATEWAY_URL") {
            self.receiver.gateway_url = v;
        }
        if let Ok(v) = std::env::var("ANPX_RECEIVER__DID") {
            self.receiver.did = v;
        }
        if let Ok(v) = std::env::var("ANPX_RECEIVER__LOCAL_APP_URL") {
            self.receiver.local_app_url = v;
        }
        if let Ok(v) = std::env::var("ANPX_RECEIVER__MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.receiver.reconnect_max_attempts = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_bind_address() {
        let config = AnpxConfig::default();
        assert_eq!(config.gateway.http_addr, "0.0.0.0:8080");
        assert!(config.auth.allowed_dids.is_empty());
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("anpx-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("ANPX_CONFIG", config_path.to_str().unwrap());
        }

        let path = AnpxConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = AnpxConfig::load().expect("load should succeed");
        assert_eq!(config.gateway.max_connections, 1024);

        unsafe {
            std::env::remove_var("ANPX_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        let mut config = AnpxConfig::default();
        config.gateway.max_connections = 5;
        assert_eq!(config.gateway.max_connections, 5);
    }
}
