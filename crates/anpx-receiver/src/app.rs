//! The local application interface consumed by the Receiver
//! (`spec.md` §6 "Local application interface"), plus the default
//! implementation that forwards to a local HTTP server — the Rust
//! counterpart of the original's `ASGIAdapter`
//! (`original_source/anp_proxy/receiver/app_adapter.py`), minus the
//! in-process ASGI call path: here the local app is just another HTTP
//! server, reached over loopback.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use reqwest::Method;

/// An HTTP request decoded off the wire, ready to hand to the local app.
#[derive(Debug, Clone)]
pub struct LocalRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// The local app's answer, re-encoded onto the wire as an HTTP response.
#[derive(Debug, Clone)]
pub struct LocalResponse {
    pub status: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Request-in/response-out contract a Receiver invokes for every decoded
/// HTTP-request frame (`spec.md` §4.11 step "invoke the local application").
pub trait LocalApp: Send + Sync {
    fn call(&self, req: LocalRequest) -> BoxFuture<'static, Result<LocalResponse, String>>;
}

/// Forwards every request to a local HTTP server over loopback, the
/// production default. `base_url` is something like `http://127.0.0.1:8090`.
pub struct HttpForwardApp {
    client: reqwest::Client,
    base_url: String,
}

impl HttpForwardApp {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl LocalApp for HttpForwardApp {
    fn call(&self, req: LocalRequest) -> BoxFuture<'static, Result<LocalResponse, String>> {
        let client = self.client.clone();
        let url = build_url(&self.base_url, &req.path, &req.query);
        Box::pin(async move {
            let method = Method::from_bytes(req.method.as_bytes())
                .map_err(|_| format!("invalid HTTP method: {}", req.method))?;

            let mut builder = client.request(method, url).body(req.body);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|err| err.to_string())?;
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await.map_err(|err| err.to_string())?.to_vec();

            Ok(LocalResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                headers,
                body,
            })
        })
    }
}

fn build_url(base_url: &str, path: &str, query: &BTreeMap<String, String>) -> String {
    let mut url = format!("{base_url}{path}");
    if !query.is_empty() {
        url.push('?');
        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect();
        url.push_str(&encoded.join("&"));
    }
    url
}

fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
