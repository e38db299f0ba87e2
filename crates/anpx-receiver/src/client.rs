//! The Receiver's dial loop and per-connection message pump
//! (`spec.md` §4.11), a structural port of
//! `original_source/anp_proxy/receiver/client.py`'s `ReceiverClient` in
//! Rust idiom: reconnect state lives in `anpx_services::ReconnectManager`,
//! the writer half is reached only through a bounded `mpsc::Sender`
//! (mirroring the Gateway's own `ws::run_writer`), and the reader loop owns
//! a private `ChunkAssembler`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use anpx_core::chunk::ChunkAssembler;
use anpx_core::message::{decode_frame, DecodedFrame};
use anpx_core::wire::{FrameHeader, HEADER_LEN};
use anpx_core::{AnpxMessage, ReceiverConfig, ResponseMeta};
use anpx_services::{DidWbaSigner, ReconnectManager, ReconnectPolicy};

use crate::app::{LocalApp, LocalRequest};

/// Bounded outbound queue per connection, mirroring the Gateway's own
/// per-connection writer queue (`spec.md` §5 backpressure policy).
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub struct ReceiverClient {
    config: ReceiverConfig,
    signer: Arc<dyn DidWbaSigner>,
    app: Arc<dyn LocalApp>,
}

impl ReceiverClient {
    pub fn new(config: ReceiverConfig, signer: Arc<dyn DidWbaSigner>, app: Arc<dyn LocalApp>) -> Self {
        Self { config, signer, app }
    }

    /// Runs the reconnect loop until the attempt budget is exhausted or
    /// `shutdown` fires. Never returns `Err`; failures are logged and retried.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut manager = ReconnectManager::new(ReconnectPolicy::from(&self.config));

        loop {
            manager.on_connecting();
            tracing::info!(url = %self.config.gateway_url, "dialing gateway");

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("receiver shutting down");
                    return;
                }
                result = self.connect_and_pump(&mut shutdown) => {
                    match result {
                        Ok(()) => tracing::info!("gateway connection closed"),
                        Err(err) => tracing::warn!(%err, "gateway connection attempt failed"),
                    }
                }
            }

            manager.on_connection_lost();
            match manager.next_backoff() {
                Some(delay) => {
                    tracing::info!(?delay, attempt = manager.stats().attempt, "reconnecting after backoff");
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::error!("reconnect attempts exhausted; entering failed state");
                    return;
                }
            }
        }
    }

    async fn connect_and_pump(&self, shutdown: &mut broadcast::Receiver<()>) -> anyhow::Result<()> {
        let mut request = self.config.gateway_url.as_str().into_client_request()?;
        for (name, value) in self.signer.auth_headers(&self.config.gateway_url) {
            request.headers_mut().insert(header_name(&name)?, value.parse()?);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!("connected to gateway");

        let (mut sink, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);

        let ping_interval = Duration::from_secs(self.config.ping_interval_secs.max(1));
        let mut ping_timer = tokio::time::interval(ping_interval);
        ping_timer.tick().await;

        let mut assembler = ChunkAssembler::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                _ = ping_timer.tick() => {
                    let ping = json!({ "type": "ping", "timestamp": now_millis() });
                    if sink.send(Message::Text(ping.to_string())).await.is_err() {
                        return Ok(());
                    }
                }
                Some(message) = outbound_rx.recv() => {
                    if sink.send(message).await.is_err() {
                        return Ok(());
                    }
                }
                frame = read.next() => {
                    let Some(frame) = frame else { return Ok(()) };
                    match frame? {
                        Message::Binary(bytes) => {
                            self.handle_binary(&bytes, &mut assembler, &outbound_tx).await;
                        }
                        Message::Text(text) => handle_control(&text),
                        Message::Close(_) => return Ok(()),
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        }
    }

    async fn handle_binary(
        &self,
        bytes: &[u8],
        assembler: &mut ChunkAssembler,
        outbound_tx: &mpsc::Sender<Message>,
    ) {
        let message = match decode_one(bytes, assembler) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(%err, "protocol error decoding frame from gateway");
                return;
            }
        };

        let AnpxMessage::HttpRequest { request_id, meta, body } = message else {
            tracing::warn!("gateway sent a non-request frame; ignoring");
            return;
        };

        let local_request = LocalRequest {
            method: meta.method.clone(),
            path: meta.path.clone(),
            headers: meta.headers.clone(),
            query: meta.query.clone(),
            body,
        };

        let app = self.app.clone();
        let max_chunk_size = self.config.max_chunk_size;
        let outbound_tx = outbound_tx.clone();
        tokio::spawn(async move {
            let frames = match app.call(local_request).await {
                Ok(response) => encode_response(&request_id, response, max_chunk_size),
                Err(err) => vec![anpx_core::message::encode_error(Some(&request_id), &err)],
            };
            for frame in frames {
                // A disconnect mid-flight discards the response silently (`spec.md` §4.11).
                if outbound_tx.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
        });
    }
}

fn decode_one(
    bytes: &[u8],
    assembler: &mut ChunkAssembler,
) -> Result<Option<AnpxMessage>, anpx_core::ProtocolError> {
    let header = FrameHeader::decode(bytes)?;
    let body = bytes
        .get(HEADER_LEN..header.total_length as usize)
        .ok_or(anpx_core::WireError::LengthMismatch {
            declared: header.total_length,
            actual: bytes.len(),
        })?;
    match decode_frame(&header, body)? {
        DecodedFrame::Complete(message) => Ok(Some(message)),
        DecodedFrame::Chunk(chunk) => assembler.add_chunk(chunk),
    }
}

fn encode_response(request_id: &str, response: crate::app::LocalResponse, max_chunk_size: usize) -> Vec<Vec<u8>> {
    let meta = ResponseMeta {
        status: response.status,
        reason: response.reason,
        headers: response.headers,
    };
    match anpx_core::message::encode_http_response(request_id, &meta, &response.body, max_chunk_size) {
        Ok(frames) => frames,
        Err(err) => vec![anpx_core::message::encode_error(Some(request_id), &err.to_string())],
    }
}

fn handle_control(text: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return;
    };
    if value.get("type").and_then(|t| t.as_str()) == Some("ping") {
        tracing::debug!("ping from gateway arrived on receiver socket; ignoring");
    }
}

fn header_name(name: &str) -> Result<tokio_tungstenite::tungstenite::http::HeaderName, anyhow::Error> {
    Ok(tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(name.as_bytes())?)
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
