//! The Gateway HTTP front — forwards arbitrary methods/paths to the
//! Receiver that owns the longest matching path prefix (`spec.md` §4.10).

use std::collections::BTreeMap;
use std::time::Duration;

use anpx_core::{AnpxMessage, HttpMeta};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::state::GatewayState;

pub async fn forward(State(state): State<GatewayState>, request: Request) -> Response {
    match forward_inner(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward_inner(state: GatewayState, request: Request) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    if state.is_denied(&path) {
        tracing::warn!(path, "denying request on malicious-path filter");
        return Err(GatewayError::Malicious);
    }

    let Some((connection_id, outbound)) = state.registry.route(&path) else {
        return Err(GatewayError::RoutingNotFound { path });
    };

    let body_bytes = axum::body::to_bytes(body, state.config.max_request_body_bytes)
        .await
        .map_err(|_| GatewayError::BodyTooLarge)?;

    let meta = HttpMeta {
        method: parts.method.to_string(),
        path: path.clone(),
        headers: header_map_to_lowercase(&parts.headers),
        query: query_map(parts.uri.query().unwrap_or("")),
    };

    let (request_id, rx) = state.registry.pending().open(&connection_id);
    state.registry.record_request(&connection_id, &request_id);

    let frames = anpx_core::message::encode_http_request(
        &request_id,
        &meta,
        &body_bytes,
        state.config.max_chunk_size,
    )
    .map_err(|err| {
        tracing::error!(%err, request_id, "failed to encode outbound request");
        GatewayError::SendFailed
    })?;

    for frame in frames {
        if outbound.send(anpx_services::OutboundItem::Frame(frame)).await.is_err() {
            state.registry.pending().fail(&request_id, anpx_services::DispatchError::ConnectionLost);
            state.registry.complete_request(&connection_id, &request_id);
            return Err(GatewayError::SendFailed);
        }
    }

    let deadline = Duration::from_secs(state.config.per_request_timeout_secs);
    let outcome = tokio::time::timeout(deadline, rx).await;
    state.registry.complete_request(&connection_id, &request_id);

    let message = match outcome {
        Ok(Ok(Ok(message))) => message,
        Ok(Ok(Err(dispatch_err))) => return Err(dispatch_err.into()),
        Ok(Err(_recv_dropped)) => return Err(GatewayError::ConnectionLost),
        Err(_elapsed) => {
            state.registry.pending().fail(&request_id, anpx_services::DispatchError::TimedOut);
            return Err(GatewayError::TimedOut);
        }
    };

    match message {
        AnpxMessage::HttpResponse { meta, body, .. } => Ok(build_response(meta, body)),
        AnpxMessage::Error { message, .. } => Err(GatewayError::Receiver(message)),
        AnpxMessage::HttpRequest { .. } => {
            tracing::warn!(request_id, "receiver sent a request frame in reply; dropping");
            Err(GatewayError::Receiver("unexpected message type".to_string()))
        }
    }
}

fn build_response(meta: anpx_core::ResponseMeta, body: Vec<u8>) -> Response {
    let status = StatusCode::from_u16(meta.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &meta.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(Bytes::from(body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn header_map_to_lowercase(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn query_map(query: &str) -> BTreeMap<String, String> {
    url_encoded_pairs(query).collect()
}

fn url_encoded_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query.split('&').filter(|s| !s.is_empty()).map(|pair| {
        match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        }
    })
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&value[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_map_decodes_percent_and_plus() {
        let q = query_map("a=1&b=hello+world&c=%2Fpath");
        assert_eq!(q.get("a").unwrap(), "1");
        assert_eq!(q.get("b").unwrap(), "hello world");
        assert_eq!(q.get("c").unwrap(), "/path");
    }

    #[test]
    fn query_map_handles_empty_string() {
        assert!(query_map("").is_empty());
    }
}
