//! Shared axum state, grounded on the teacher's `ApiState` (`handlers.rs`):
//! one `Clone`-able struct of `Arc`-wrapped shared resources threaded through
//! every handler via `State<GatewayState>`.

use std::sync::Arc;

use anpx_core::{AuthConfig, GatewayConfig};
use anpx_services::{ConnectionRegistry, DidWbaVerifier, PathOracle};
use regex::Regex;

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: Arc<dyn DidWbaVerifier>,
    pub oracle: Arc<dyn PathOracle>,
    pub config: Arc<GatewayConfig>,
    pub auth: Arc<AuthConfig>,
    pub deny_patterns: Arc<Vec<Regex>>,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        auth: AuthConfig,
        verifier: Arc<dyn DidWbaVerifier>,
        oracle: Arc<dyn PathOracle>,
    ) -> Self {
        let deny_patterns = config
            .deny_path_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(pattern, %err, "ignoring invalid deny-path pattern");
                    None
                }
            })
            .collect();
        let max_connections = config.max_connections;
        Self {
            registry: Arc::new(ConnectionRegistry::new(max_connections)),
            verifier,
            oracle,
            config: Arc::new(config),
            auth: Arc::new(auth),
            deny_patterns: Arc::new(deny_patterns),
        }
    }

    pub fn is_denied(&self, path: &str) -> bool {
        self.deny_patterns.iter().any(|re| re.is_match(path))
    }
}
