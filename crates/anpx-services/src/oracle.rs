//! External-interface traits: DID-WBA verification, the DID→paths oracle,
//! and DID-WBA client header signing. Each is a thin `async_trait` boundary
//! so the Gateway/Receiver binaries can be wired against either a real
//! `agent_connect`-compatible implementation or an in-memory test double,
//! grounded on `original_source/anp_proxy/common/did_wba.py`'s
//! `DidWbaVerifierAdapter` (server) and `build_auth_headers` (client).

use std::collections::BTreeMap;

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("DID-WBA signature verification failed: {0}")]
    VerificationFailed(String),
    #[error("DID {0} is not in the allowed-DIDs list")]
    DidNotAllowed(String),
}

/// Verifies an inbound `Authorization` header against a domain and returns
/// the DID it authenticates, or why it didn't.
#[async_trait]
pub trait DidWbaVerifier: Send + Sync {
    async fn verify(&self, authorization: &str, domain: &str) -> Result<String, AuthError>;
}

/// Resolves which path prefixes a DID is entitled to register on accept.
#[async_trait]
pub trait PathOracle: Send + Sync {
    async fn paths_for(&self, did: &str) -> Vec<String>;
}

/// Builds a DID-WBA `Authorization` header for an outbound dial, mirroring
/// `build_auth_headers`'s `DIDWbaAuthHeader::get_auth_header(gateway_url)` call.
pub trait DidWbaSigner: Send + Sync {
    fn auth_headers(&self, gateway_url: &str) -> BTreeMap<String, String>;
}

/// An allow-list verifier with no real signature check, for local
/// development and the integration test harness — the `DidWbaVerifier`
/// counterpart to skipping `agent_connect`'s signature machinery entirely.
pub struct AllowListVerifier {
    allowed_dids: Vec<String>,
}

impl AllowListVerifier {
    pub fn new(allowed_dids: Vec<String>) -> Self {
        Self { allowed_dids }
    }
}

#[async_trait]
impl DidWbaVerifier for AllowListVerifier {
    async fn verify(&self, authorization: &str, _domain: &str) -> Result<String, AuthError> {
        let did = authorization
            .strip_prefix("DIDWba did=")
            .ok_or(AuthError::MissingHeader)?
            .to_string();
        if !self.allowed_dids.is_empty() && !self.allowed_dids.contains(&did) {
            return Err(AuthError::DidNotAllowed(did));
        }
        Ok(did)
    }
}

/// Builds the `DIDWba did=...` header `AllowListVerifier` expects, for
/// Receivers that authenticate by DID alone with no signature machinery —
/// the dialing counterpart of `AllowListVerifier`.
pub struct StaticDidSigner {
    did: String,
}

impl StaticDidSigner {
    pub fn new(did: String) -> Self {
        Self { did }
    }
}

impl DidWbaSigner for StaticDidSigner {
    fn auth_headers(&self, _gateway_url: &str) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), format!("DIDWba did={}", self.did));
        headers
    }
}

/// A fixed DID → paths mapping, for configurations that know their fleet of
/// Receivers up front rather than resolving paths from a DID document.
pub struct StaticPathOracle {
    paths: BTreeMap<String, Vec<String>>,
}

impl StaticPathOracle {
    pub fn new(paths: BTreeMap<String, Vec<String>>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl PathOracle for StaticPathOracle {
    async fn paths_for(&self, did: &str) -> Vec<String> {
        self.paths.get(did).cloned().unwrap_or_default()
    }
}
