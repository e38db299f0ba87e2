//! In-process Gateway + fake Receiver harness.
//!
//! No network namespaces, no spawned OS processes: the Gateway's axum
//! `Router` is bound to an ephemeral loopback port inside this test binary,
//! and each "Receiver" is a `tokio_tungstenite` client driven directly by
//! the test, standing in for `anpx-receiver`'s dial loop and local app.

use std::collections::BTreeMap;
use std::sync::Arc;

use anpx_core::chunk::ChunkAssembler;
use anpx_core::message::{decode_frame, encode_error, encode_http_response, DecodedFrame};
use anpx_core::wire::{FrameHeader, HEADER_LEN};
use anpx_core::{AnpxMessage, AuthConfig, GatewayConfig, ResponseMeta};
use anpx_gateway::state::GatewayState;
use anpx_services::{AllowListVerifier, StaticPathOracle};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type FakeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running in-process Gateway, bound to an ephemeral port for the life of
/// the test binary. `state` is exposed directly so tests can assert on
/// registry/pending-table internals without another HTTP round trip.
pub struct Gateway {
    pub addr: String,
    pub state: GatewayState,
}

pub struct GatewayOpts {
    pub allowed_dids: Vec<String>,
    pub did_paths: BTreeMap<String, Vec<String>>,
    pub per_request_timeout_secs: u64,
    pub max_chunk_size: usize,
    pub health_sweep_interval_secs: u64,
    pub connection_timeout_secs: u64,
}

impl Default for GatewayOpts {
    fn default() -> Self {
        Self {
            allowed_dids: Vec::new(),
            did_paths: BTreeMap::new(),
            per_request_timeout_secs: 30,
            max_chunk_size: 64 * 1024,
            health_sweep_interval_secs: 10,
            connection_timeout_secs: 90,
        }
    }
}

pub async fn spawn_gateway(opts: GatewayOpts) -> Gateway {
    let gateway_config = GatewayConfig {
        http_addr: "127.0.0.1:0".to_string(),
        per_request_timeout_secs: opts.per_request_timeout_secs,
        max_chunk_size: opts.max_chunk_size,
        health_sweep_interval_secs: opts.health_sweep_interval_secs,
        connection_timeout_secs: opts.connection_timeout_secs,
        ..GatewayConfig::default()
    };

    let auth_config = AuthConfig {
        allowed_dids: opts.allowed_dids,
        did_paths: opts.did_paths,
    };

    let verifier = Arc::new(AllowListVerifier::new(auth_config.allowed_dids.clone()));
    let oracle = Arc::new(StaticPathOracle::new(auth_config.did_paths.clone()));
    let state = GatewayState::new(gateway_config, auth_config, verifier, oracle);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap().to_string();

    let app = anpx_gateway::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Gateway { addr, state }
}

impl Gateway {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Dials the Gateway's `/ws` route with a DID-WBA `Authorization` header
/// shaped the way `anpx_services::StaticDidSigner` builds it, standing in
/// for a Receiver's connection attempt.
pub async fn dial_receiver(gateway: &Gateway, did: &str) -> anyhow::Result<FakeSocket> {
    let mut request = gateway.ws_url().into_client_request()?;
    request
        .headers_mut()
        .insert("authorization", format!("DIDWba did={did}").parse()?);
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Like [`dial_receiver`] but omits the Authorization header entirely, for
/// the auth-reject scenario.
pub async fn dial_receiver_unauthenticated(gateway: &Gateway) -> anyhow::Result<FakeSocket> {
    let request = gateway.ws_url().into_client_request()?;
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Waits for the `connection_ready` control frame the Gateway sends right
/// after a successful handshake (`ws.rs::handshake`), ignoring anything
/// else that arrives first.
pub async fn expect_connection_ready(socket: &mut FakeSocket) -> serde_json::Value {
    loop {
        let msg = socket
            .next()
            .await
            .expect("socket closed before connection_ready")
            .expect("websocket error before connection_ready");
        match msg {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value.get("type").and_then(|t| t.as_str()) == Some("connection_ready") {
                    return value;
                }
            }
            Message::Binary(_) => panic!("unexpected binary frame before connection_ready"),
            _ => {}
        }
    }
}

/// Waits for the WebSocket to be closed by the peer and returns the close
/// code, for the auth-reject scenario.
pub async fn expect_close_code(socket: &mut FakeSocket) -> u16 {
    loop {
        match socket.next().await {
            Some(Ok(Message::Close(Some(frame)))) => return frame.code.into(),
            Some(Ok(Message::Close(None))) => panic!("closed with no code"),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("socket ended without a close frame"),
        }
    }
}

/// Decodes one complete [`AnpxMessage`] off the fake receiver's socket,
/// reassembling chunks through a local [`ChunkAssembler`] exactly as
/// `anpx-receiver`'s own reader loop does.
pub async fn recv_message(socket: &mut FakeSocket, assembler: &mut ChunkAssembler) -> AnpxMessage {
    loop {
        let msg = socket
            .next()
            .await
            .expect("socket closed mid-message")
            .expect("websocket error mid-message");
        match msg {
            Message::Binary(bytes) => {
                if let Some(message) = decode_one(&bytes, assembler) {
                    return message;
                }
            }
            Message::Close(_) => panic!("socket closed mid-message"),
            _ => {}
        }
    }
}

/// Counts the distinct binary (wire) frames received while driving `recv`
/// to completion, for the chunk-count assertion in E2.
pub async fn recv_message_counting_frames(
    socket: &mut FakeSocket,
    assembler: &mut ChunkAssembler,
) -> (AnpxMessage, usize) {
    let mut frames = 0;
    loop {
        let msg = socket
            .next()
            .await
            .expect("socket closed mid-message")
            .expect("websocket error mid-message");
        if let Message::Binary(bytes) = msg {
            frames += 1;
            if let Some(message) = decode_one(&bytes, assembler) {
                return (message, frames);
            }
        }
    }
}

fn decode_one(bytes: &[u8], assembler: &mut ChunkAssembler) -> Option<AnpxMessage> {
    let header = FrameHeader::decode(bytes).expect("valid frame header");
    let body = &bytes[HEADER_LEN..header.total_length as usize];
    match decode_frame(&header, body).expect("valid frame body") {
        DecodedFrame::Complete(message) => Some(message),
        DecodedFrame::Chunk(chunk) => assembler.add_chunk(chunk).expect("valid chunk sequence"),
    }
}

/// Sends an HTTP-response frame set back to the Gateway for `request_id`.
pub async fn send_response(
    socket: &mut FakeSocket,
    request_id: &str,
    status: u16,
    headers: BTreeMap<String, String>,
    body: &[u8],
    max_chunk_size: usize,
) {
    let meta = ResponseMeta {
        status,
        reason: "OK".to_string(),
        headers,
    };
    let frames = encode_http_response(request_id, &meta, body, max_chunk_size).unwrap();
    for frame in frames {
        socket.send(Message::Binary(frame)).await.unwrap();
    }
}

pub async fn send_error(socket: &mut FakeSocket, request_id: &str, message: &str) {
    let frame = encode_error(Some(request_id), message);
    socket.send(Message::Binary(frame)).await.unwrap();
}

pub fn json_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers
}
