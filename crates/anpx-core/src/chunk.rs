//! Chunk reassembly — per-connection, per-request-id buffers that collect
//! chunked frames until a complete [`AnpxMessage`] can be synthesised.
//!
//! One `ChunkAssembler` belongs to a single connection's read loop; it is
//! never shared across tasks (`spec.md` §5: "decoder state is per-connection").

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::message::{AnpxMessage, ChunkFrame, HttpMeta, ProtocolError, ResponseMeta};
use crate::wire::{MessageType, Tag};

struct ReassemblyBuffer {
    message_type: MessageType,
    meta: Option<Vec<u8>>,
    total: Option<u32>,
    chunks: BTreeMap<u32, Vec<u8>>,
    first_seen: Instant,
}

impl ReassemblyBuffer {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            meta: None,
            total: None,
            chunks: BTreeMap::new(),
            first_seen: Instant::now(),
        }
    }
}

/// Collects chunk frames keyed by request id and assembles them into
/// complete messages once every index `0..total-1` has arrived exactly once.
#[derive(Default)]
pub struct ChunkAssembler {
    buffers: HashMap<String, ReassemblyBuffer>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of request ids currently mid-reassembly.
    pub fn pending_count(&self) -> usize {
        self.buffers.len()
    }

    /// Feeds one chunk frame in. Returns `Ok(Some(message))` once the final
    /// chunk for its request id has arrived and the sequence is complete and
    /// gap-free; `Ok(None)` while more chunks are still expected.
    pub fn add_chunk(&mut self, chunk: ChunkFrame) -> Result<Option<AnpxMessage>, ProtocolError> {
        let request_id = chunk.request_id.clone();
        let buffer = self
            .buffers
            .entry(request_id.clone())
            .or_insert_with(|| ReassemblyBuffer::new(chunk.message_type));

        if let Some(expected) = buffer.total {
            if expected != chunk.total {
                return Err(ProtocolError::ChunkTotalMismatch {
                    request_id,
                    expected,
                    got: chunk.total,
                });
            }
        } else {
            buffer.total = Some(chunk.total);
        }

        if buffer.chunks.contains_key(&chunk.index) {
            return Err(ProtocolError::DuplicateChunkIndex(chunk.index, request_id));
        }

        if let Some(meta) = chunk.meta {
            buffer.meta = Some(meta);
        }
        buffer.chunks.insert(chunk.index, chunk.body);

        let total = buffer.total.unwrap();
        let complete = chunk.is_final || buffer.chunks.len() as u32 == total;
        if !complete {
            return Ok(None);
        }

        // Verify the index sequence is exactly 0..total-1 with no gaps.
        if buffer.chunks.len() as u32 != total {
            return Err(ProtocolError::ChunkSequenceGap(request_id, total));
        }
        for (expected_index, actual_index) in (0..total).zip(buffer.chunks.keys().copied()) {
            if expected_index != actual_index {
                return Err(ProtocolError::ChunkSequenceGap(request_id, total));
            }
        }

        let buffer = self.buffers.remove(&request_id).unwrap();
        let message_type = buffer.message_type;
        let meta = buffer
            .meta
            .ok_or_else(|| ProtocolError::MissingField(meta_tag_for(message_type), message_type))?;
        let body: Vec<u8> = buffer.chunks.into_values().flatten().collect();

        let message = match message_type {
            MessageType::HttpRequest => {
                let meta: HttpMeta = serde_json::from_slice(&meta)
                    .map_err(|e| ProtocolError::BadJson(Tag::HttpMeta, e))?;
                AnpxMessage::HttpRequest {
                    request_id,
                    meta,
                    body,
                }
            }
            MessageType::HttpResponse => {
                let meta: ResponseMeta = serde_json::from_slice(&meta)
                    .map_err(|e| ProtocolError::BadJson(Tag::RespMeta, e))?;
                AnpxMessage::HttpResponse {
                    request_id,
                    meta,
                    body,
                }
            }
            MessageType::Error => unreachable!("error messages are never chunked"),
        };

        Ok(Some(message))
    }

    /// Drops buffers whose first frame arrived more than `max_age` ago.
    /// Returns the request ids evicted, for the caller to log — stale
    /// buffers are not a protocol-visible error by themselves.
    pub fn sweep_stale(&mut self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, buf)| now.duration_since(buf.first_seen) > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.buffers.remove(id);
        }
        stale
    }
}

fn meta_tag_for(message_type: MessageType) -> Tag {
    match message_type {
        MessageType::HttpRequest => Tag::HttpMeta,
        MessageType::HttpResponse => Tag::RespMeta,
        MessageType::Error => Tag::HttpMeta,
    }
}
