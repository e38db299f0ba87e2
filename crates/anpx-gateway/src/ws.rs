//! WebSocket acceptor and per-connection message pump (`spec.md` §4.9).
//!
//! One task per connection, split into a read half (this module's main
//! loop) and a writer half reached only through a bounded `mpsc::Sender`,
//! mirroring the teacher's `chunk::manager::spawn_new_sessions` per-session
//! task shape (`anpx-gateway` grounds this on `_old-summitd/chunk/manager.rs`).

use anpx_core::chunk::ChunkAssembler;
use anpx_core::message::{decode_frame, DecodedFrame};
use anpx_core::wire::{FrameHeader, HEADER_LEN};
use anpx_core::AnpxMessage;
use anpx_services::OutboundItem;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio::sync::mpsc;

use crate::domain::derive_domain;
use crate::state::GatewayState;

/// Close codes the handshake uses, per `spec.md` §4.9 step 2/3.
const CLOSE_AUTH_FAILED: u16 = 4003;
const CLOSE_NO_PATHS: u16 = 4004;

pub async fn accept(
    ws: WebSocketUpgrade,
    headers: axum::http::HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    if state.registry.len() >= state.config.max_connections {
        tracing::warn!("rejecting upgrade: at capacity, before reading any frames");
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handshake(socket, headers, state))
}

async fn handshake(mut socket: WebSocket, headers: axum::http::HeaderMap, state: GatewayState) {
    let domain = derive_domain(&headers, &state.config.default_service_domain);
    let Some(authorization) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        close_with(&mut socket, CLOSE_AUTH_FAILED, "missing Authorization header").await;
        return;
    };

    let did = match state.verifier.verify(authorization, &domain).await {
        Ok(did) => did,
        Err(err) => {
            tracing::warn!(%err, domain, "DID-WBA verification failed");
            close_with(&mut socket, CLOSE_AUTH_FAILED, &err.to_string()).await;
            return;
        }
    };

    if !state.auth.allowed_dids.is_empty() && !state.auth.allowed_dids.contains(&did) {
        tracing::warn!(did, "DID is not in the allowed-DIDs list");
        close_with(&mut socket, CLOSE_AUTH_FAILED, "DID not allowed").await;
        return;
    }

    let paths = state.oracle.paths_for(&did).await;
    if paths.is_empty() {
        tracing::warn!(did, "DID advertised no paths");
        close_with(&mut socket, CLOSE_NO_PATHS, "no advertised paths").await;
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let connection_id = match state.registry.accept(outbound_tx) {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(%err, "rejecting connection at capacity");
            close_with(&mut socket, 1013, &err.to_string()).await;
            return;
        }
    };

    if let Err(err) = state.registry.authenticate(&connection_id, did.clone(), paths.clone()) {
        tracing::error!(%err, connection_id, "failed to authenticate just-accepted connection");
        state.registry.remove(&connection_id);
        close_with(&mut socket, CLOSE_NO_PATHS, &err.to_string()).await;
        return;
    }

    tracing::info!(connection_id, did, ?paths, "receiver connected");

    let (mut sink, mut stream) = socket.split();
    let ready = json!({
        "type": "connection_ready",
        "connection_id": connection_id,
        "paths": paths,
    });
    if sink
        .send(Message::Text(ready.to_string().into()))
        .await
        .is_err()
    {
        state.registry.remove(&connection_id);
        return;
    }

    let writer = tokio::spawn(run_writer(sink, outbound_rx));

    run_reader(&mut stream, &state, &connection_id).await;

    state.registry.remove(&connection_id);
    writer.abort();
    tracing::info!(connection_id, "receiver disconnected");
}

async fn run_writer(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
) {
    use futures_util::SinkExt;
    while let Some(item) = outbound_rx.recv().await {
        let message = match item {
            OutboundItem::Frame(frame) => Message::Binary(frame.into()),
            OutboundItem::Control(text) => Message::Text(text.into()),
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn run_reader(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
    state: &GatewayState,
    connection_id: &str,
) {
    use futures_util::StreamExt;
    let mut assembler = ChunkAssembler::new();
    let stale_age = std::time::Duration::from_secs(state.config.chunk_reassembly_max_age_secs);
    let mut stale_sweep = tokio::time::interval(stale_age.max(std::time::Duration::from_secs(1)));
    stale_sweep.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = stale_sweep.tick() => {
                for request_id in assembler.sweep_stale(stale_age) {
                    tracing::warn!(connection_id, request_id, "dropped stale chunk reassembly buffer");
                }
            }
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(%err, connection_id, "websocket read error");
                        break;
                    }
                };
                state.registry.touch_activity(connection_id);

                match msg {
                    Message::Binary(bytes) => {
                        if let Err(err) = handle_binary(&bytes, &mut assembler, state) {
                            tracing::warn!(%err, connection_id, "protocol error; dropping connection");
                            break;
                        }
                    }
                    Message::Text(text) => handle_control(&text, state, connection_id),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }
}

fn handle_binary(
    bytes: &[u8],
    assembler: &mut ChunkAssembler,
    state: &GatewayState,
) -> Result<(), anpx_core::WireError> {
    let header = FrameHeader::decode(bytes)?;
    let body = bytes
        .get(HEADER_LEN..header.total_length as usize)
        .ok_or(anpx_core::WireError::LengthMismatch {
            declared: header.total_length,
            actual: bytes.len(),
        })?;
    let decoded = decode_frame(&header, body).map_err(|err| match err {
        anpx_core::ProtocolError::Wire(wire_err) => wire_err,
        other => {
            tracing::warn!(%other, "non-wire protocol error decoding frame");
            anpx_core::WireError::UnknownMessageType(0)
        }
    })?;

    let message = match decoded {
        DecodedFrame::Complete(message) => Some(message),
        DecodedFrame::Chunk(chunk) => match assembler.add_chunk(chunk) {
            Ok(done) => done,
            Err(err) => {
                tracing::warn!(%err, "chunk reassembly error");
                None
            }
        },
    };

    if let Some(message) = message {
        deliver(message, state);
    }
    Ok(())
}

fn deliver(message: AnpxMessage, state: &GatewayState) {
    match message {
        AnpxMessage::HttpResponse { request_id, meta, body } => {
            let resolved = state.registry.pending().resolve(
                &request_id,
                AnpxMessage::HttpResponse { request_id: request_id.clone(), meta, body },
            );
            if !resolved {
                tracing::warn!(request_id, "response for unknown or already-resolved request id");
            }
        }
        AnpxMessage::Error { request_id: Some(request_id), message } => {
            let resolved = state
                .registry
                .pending()
                .fail(&request_id, anpx_services::DispatchError::Remote(message));
            if !resolved {
                tracing::warn!(request_id, "error frame for unknown or already-resolved request id");
            }
        }
        AnpxMessage::Error { request_id: None, message } => {
            tracing::warn!(message, "error frame with no request id");
        }
        AnpxMessage::HttpRequest { request_id, .. } => {
            tracing::warn!(request_id, "unsolicited HTTP-request frame from receiver; ignoring");
        }
    }
}

fn handle_control(text: &str, state: &GatewayState, connection_id: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        tracing::debug!(connection_id, "ignoring non-JSON text frame");
        return;
    };
    match value.get("type").and_then(|t| t.as_str()) {
        Some("ping") => {
            state.registry.touch_ping(connection_id);
            if let Some(outbound) = state.registry.outbound(connection_id) {
                let pong = json!({ "type": "pong", "timestamp": value.get("timestamp") });
                let _ = outbound.try_send(OutboundItem::Control(pong.to_string()));
            }
        }
        Some("heartbeat") => state.registry.touch_activity(connection_id),
        _ => {}
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    use futures_util::SinkExt;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
