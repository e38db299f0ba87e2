//! Service-domain derivation for the WebSocket handshake (`spec.md` §4.9
//! step 1), kept standalone so it can be unit-tested without spinning up a
//! socket.

use axum::http::HeaderMap;

/// First non-empty of `X-Forwarded-Host` (first hop), `Host`, or `default`,
/// each with any trailing `:port` stripped.
pub fn derive_domain(headers: &HeaderMap, default: &str) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-host") {
        let first_hop = forwarded.split(',').next().unwrap_or(forwarded).trim();
        if !first_hop.is_empty() {
            return strip_port(first_hop);
        }
    }
    if let Some(host) = header_str(headers, "host") {
        if !host.is_empty() {
            return strip_port(host);
        }
    }
    default.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_port(host: &str) -> String {
    if host.starts_with('[') {
        // IPv6 literal, e.g. "[::1]:8080" — keep the bracketed form intact.
        if let Some(end) = host.find(']') {
            return host[..=end].to_string();
        }
        return host.to_string();
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h.to_string(),
        _ => host.to_string(),
    }
}
