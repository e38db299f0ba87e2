//! HTTP-request/response/error messages built on top of the ANPX frame
//! format, including the chunking rules of a `spec.md` §4.4/§4.5.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::wire::{
    crc32, decode_all_tlv, encode_tlv, encode_u32_tlv, FrameHeader, MessageType, Tag, TlvField,
    WireError, HEADER_LEN, TLV_HEADER_LEN,
};

/// JSON body of the `0x02` TLV: method, normalised path, headers, query.
/// Header/query names are lowercase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpMeta {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

/// JSON body of the `0x04` TLV: status, reason, headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A fully assembled, decoded message — either received whole in a single
/// frame, or reassembled from a chunk sequence by `crate::chunk::ChunkAssembler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnpxMessage {
    HttpRequest {
        request_id: String,
        meta: HttpMeta,
        body: Vec<u8>,
    },
    HttpResponse {
        request_id: String,
        meta: ResponseMeta,
        body: Vec<u8>,
    },
    Error {
        request_id: Option<String>,
        message: String,
    },
}

impl AnpxMessage {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            AnpxMessage::HttpRequest { request_id, .. } => Some(request_id),
            AnpxMessage::HttpResponse { request_id, .. } => Some(request_id),
            AnpxMessage::Error { request_id, .. } => request_id.as_deref(),
        }
    }
}

/// Higher-level decode failures: wire-format errors plus the message-level
/// invariants of `spec.md` §3/§4.5. All are fatal to the originating
/// connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("missing required TLV {0} for message type {1:?}")]
    MissingField(Tag, MessageType),
    #[error("malformed JSON in TLV {0}: {1}")]
    BadJson(Tag, serde_json::Error),
    #[error("malformed request id: not valid UTF-8")]
    BadRequestId,
    #[error("duplicate chunk index {0} for request {1}")]
    DuplicateChunkIndex(u32, String),
    #[error("chunk total mismatch for request {request_id}: expected {expected}, got {got}")]
    ChunkTotalMismatch {
        request_id: String,
        expected: u32,
        got: u32,
    },
    #[error("gap in chunk sequence for request {0}: expected {1} contiguous indices")]
    ChunkSequenceGap(String, u32),
    #[error("chunked frame missing chunk index/total TLV")]
    MissingChunkFields,
    #[error("max_chunk_size {0} too small to fit even one byte of body")]
    ChunkSizeTooSmall(usize),
}

/// One physical ANPX frame's worth of encoded bytes, ready to hand to a
/// WebSocket `send`.
pub type EncodedFrame = Vec<u8>;

fn body_crc_and_header(message_type: MessageType, chunked: bool, body: &[u8]) -> Vec<u8> {
    let body_crc = crc32(body);
    let header = FrameHeader::encode(message_type, chunked, body.len(), body_crc);
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body);
    frame
}

fn tlv_cost(tag_and_value_len: usize) -> usize {
    TLV_HEADER_LEN + tag_and_value_len
}

/// Builds the non-chunked or chunked frame set for an HTTP request.
pub fn encode_http_request(
    request_id: &str,
    meta: &HttpMeta,
    body: &[u8],
    max_chunk_size: usize,
) -> Result<Vec<EncodedFrame>, ProtocolError> {
    let meta_json = serde_json::to_vec(meta).expect("HttpMeta always serialises");
    encode_request_response(
        request_id,
        &meta_json,
        body,
        max_chunk_size,
        MessageType::HttpRequest,
        true, // meta in first chunk
    )
}

/// Builds the non-chunked or chunked frame set for an HTTP response.
pub fn encode_http_response(
    request_id: &str,
    meta: &ResponseMeta,
    body: &[u8],
    max_chunk_size: usize,
) -> Result<Vec<EncodedFrame>, ProtocolError> {
    let meta_json = serde_json::to_vec(meta).expect("ResponseMeta always serialises");
    encode_request_response(
        request_id,
        &meta_json,
        body,
        max_chunk_size,
        MessageType::HttpResponse,
        false, // meta in last chunk
    )
}

/// The error message type is never chunked (`spec.md` §4.4).
pub fn encode_error(request_id: Option<&str>, message: &str) -> EncodedFrame {
    let mut out = Vec::new();
    if let Some(id) = request_id {
        encode_tlv(&mut out, Tag::REQUEST_ID, id.as_bytes());
    }
    encode_tlv(&mut out, Tag::HTTP_BODY, message.as_bytes());
    body_crc_and_header(MessageType::Error, false, &out)
}

fn meta_tag(meta_first: bool) -> u8 {
    if meta_first {
        Tag::HTTP_META
    } else {
        Tag::RESP_META
    }
}

fn encode_request_response(
    request_id: &str,
    meta_json: &[u8],
    body: &[u8],
    max_chunk_size: usize,
    message_type: MessageType,
    meta_first: bool,
) -> Result<Vec<EncodedFrame>, ProtocolError> {
    let rid_cost = tlv_cost(request_id.len());
    let meta_cost = tlv_cost(meta_json.len());
    let chunk_idx_cost = tlv_cost(4);
    let chunk_tot_cost = tlv_cost(4);
    let final_cost = tlv_cost(1);
    let body_tag_cost = TLV_HEADER_LEN;

    // "First-chunk overhead": the conservative bound spec.md §4.4 uses to
    // decide whether to chunk at all — it includes the chunk-framing TLVs
    // even though a single, non-chunked frame wouldn't carry them.
    let conservative_overhead =
        HEADER_LEN + rid_cost + meta_cost + chunk_idx_cost + chunk_tot_cost + final_cost + body_tag_cost;

    if conservative_overhead + body.len() <= max_chunk_size {
        let mut out = Vec::new();
        encode_tlv(&mut out, Tag::REQUEST_ID, request_id.as_bytes());
        encode_tlv(&mut out, meta_tag(meta_first), meta_json);
        if !body.is_empty() {
            encode_tlv(&mut out, Tag::HTTP_BODY, body);
        }
        return Ok(vec![body_crc_and_header(message_type, false, &out)]);
    }

    // Per-chunk overhead without the meta field (every chunk carries
    // request-id, chunk-index, chunk-total, the body tag+length, and the
    // final-marker when it is the last chunk).
    let subsequent_overhead =
        HEADER_LEN + rid_cost + chunk_idx_cost + chunk_tot_cost + final_cost + body_tag_cost;
    let meta_chunk_overhead = subsequent_overhead + meta_cost;

    if subsequent_overhead >= max_chunk_size || meta_chunk_overhead >= max_chunk_size {
        return Err(ProtocolError::ChunkSizeTooSmall(max_chunk_size));
    }

    let slices = if meta_first {
        slice_meta_first(body, max_chunk_size - meta_chunk_overhead, max_chunk_size - subsequent_overhead)
    } else {
        slice_meta_last(body, max_chunk_size - subsequent_overhead, max_chunk_size - meta_chunk_overhead)
    };

    let total = slices.len() as u32;
    let mut frames = Vec::with_capacity(slices.len());
    for (index, slice) in slices.iter().enumerate() {
        let index = index as u32;
        let is_last = index + 1 == total;
        let carries_meta = if meta_first { index == 0 } else { is_last };

        let mut out = Vec::new();
        encode_tlv(&mut out, Tag::REQUEST_ID, request_id.as_bytes());
        if carries_meta {
            encode_tlv(&mut out, meta_tag(meta_first), meta_json);
        }
        encode_u32_tlv(&mut out, Tag::CHUNK_IDX, index);
        encode_u32_tlv(&mut out, Tag::CHUNK_TOT, total);
        if is_last {
            encode_tlv(&mut out, Tag::FINAL_CHUNK, &[0x01]);
        }
        encode_tlv(&mut out, Tag::HTTP_BODY, slice);

        frames.push(body_crc_and_header(message_type, true, &out));
    }

    Ok(frames)
}

/// Slices `body` so the first piece is at most `first_budget` bytes (it will
/// carry the meta TLV) and every later piece is at most `rest_budget` bytes.
fn slice_meta_first(body: &[u8], first_budget: usize, rest_budget: usize) -> Vec<Vec<u8>> {
    let mut slices = Vec::new();
    let mut offset = 0;
    let mut first = true;
    while offset < body.len() {
        let budget = if first { first_budget } else { rest_budget };
        let end = (offset + budget).min(body.len());
        slices.push(body[offset..end].to_vec());
        offset = end;
        first = false;
    }
    slices
}

/// Slices `body` so every piece but the last is at most `rest_budget` bytes,
/// and the last piece (which carries the meta TLV) is at most `last_budget`
/// bytes — shrinking in from the tail if a uniform `rest_budget` slicing
/// would leave the final piece too large.
fn slice_meta_last(body: &[u8], rest_budget: usize, last_budget: usize) -> Vec<Vec<u8>> {
    let mut slices: Vec<Vec<u8>> = body.chunks(rest_budget).map(|s| s.to_vec()).collect();
    if let Some(last) = slices.last_mut() {
        if last.len() > last_budget {
            let overflow = last.split_off(last.len() - last_budget);
            // `overflow` becomes the new, meta-carrying last chunk; the
            // shrunken `last` keeps its place as an ordinary middle chunk.
            slices.push(overflow);
        }
    }
    slices
}

/// One physical frame's decoded TLV content, classified by whether it is a
/// complete (non-chunked) message or one piece of a chunked message.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Complete(AnpxMessage),
    Chunk(ChunkFrame),
}

/// One chunk of a not-yet-reassembled message.
#[derive(Debug, Clone)]
pub struct ChunkFrame {
    pub request_id: String,
    pub index: u32,
    pub total: u32,
    pub is_final: bool,
    pub message_type: MessageType,
    pub meta: Option<Vec<u8>>,
    pub body: Vec<u8>,
}

fn find<'a>(fields: &'a [TlvField], tag: u8) -> Option<&'a TlvField> {
    fields.iter().find(|f| f.tag.byte() == tag)
}

fn request_id_of(fields: &[TlvField]) -> Result<Option<String>, ProtocolError> {
    match find(fields, Tag::REQUEST_ID) {
        Some(f) => Ok(Some(
            String::from_utf8(f.value.clone()).map_err(|_| ProtocolError::BadRequestId)?,
        )),
        None => Ok(None),
    }
}

/// Decodes one physical frame (header already stripped, `body` is the
/// remaining bytes) into either a complete message or one chunk piece.
/// Validates the body CRC and every TLV-level invariant from `spec.md` §3.
pub fn decode_frame(
    header: &FrameHeader,
    body: &[u8],
) -> Result<DecodedFrame, ProtocolError> {
    let computed = crc32(body);
    if computed != header.body_crc {
        return Err(WireError::BodyCrcMismatch {
            computed,
            stored: header.body_crc,
        }
        .into());
    }

    let fields = decode_all_tlv(body)?;

    if !header.chunked {
        return Ok(DecodedFrame::Complete(decode_complete(
            header.message_type,
            &fields,
        )?));
    }

    let request_id = request_id_of(&fields)?
        .ok_or(ProtocolError::MissingField(Tag::RequestId, header.message_type))?;
    let index = find(&fields, Tag::CHUNK_IDX)
        .and_then(|f| f.value.as_slice().try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(ProtocolError::MissingChunkFields)?;
    let total = find(&fields, Tag::CHUNK_TOT)
        .and_then(|f| f.value.as_slice().try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(ProtocolError::MissingChunkFields)?;
    let is_final = find(&fields, Tag::FINAL_CHUNK)
        .map(|f| f.value.first() == Some(&0x01))
        .unwrap_or(false)
        || index + 1 == total;

    let meta_tag = match header.message_type {
        MessageType::HttpRequest => Tag::HTTP_META,
        MessageType::HttpResponse => Tag::RESP_META,
        MessageType::Error => {
            return Err(ProtocolError::MissingField(Tag::RequestId, header.message_type))
        }
    };
    let meta = find(&fields, meta_tag).map(|f| f.value.clone());
    let body = find(&fields, Tag::HTTP_BODY).map(|f| f.value.clone()).unwrap_or_default();

    Ok(DecodedFrame::Chunk(ChunkFrame {
        request_id,
        index,
        total,
        is_final,
        message_type: header.message_type,
        meta,
        body,
    }))
}

fn decode_complete(
    message_type: MessageType,
    fields: &[TlvField],
) -> Result<AnpxMessage, ProtocolError> {
    let request_id = request_id_of(fields)?;

    match message_type {
        MessageType::HttpRequest => {
            let request_id =
                request_id.ok_or(ProtocolError::MissingField(Tag::RequestId, message_type))?;
            let meta_field = find(fields, Tag::HTTP_META)
                .ok_or(ProtocolError::MissingField(Tag::HttpMeta, message_type))?;
            let meta: HttpMeta = serde_json::from_slice(&meta_field.value)
                .map_err(|e| ProtocolError::BadJson(Tag::HttpMeta, e))?;
            let body = find(fields, Tag::HTTP_BODY)
                .map(|f| f.value.clone())
                .unwrap_or_default();
            Ok(AnpxMessage::HttpRequest {
                request_id,
                meta,
                body,
            })
        }
        MessageType::HttpResponse => {
            let request_id =
                request_id.ok_or(ProtocolError::MissingField(Tag::RequestId, message_type))?;
            let meta_field = find(fields, Tag::RESP_META)
                .ok_or(ProtocolError::MissingField(Tag::RespMeta, message_type))?;
            let meta: ResponseMeta = serde_json::from_slice(&meta_field.value)
                .map_err(|e| ProtocolError::BadJson(Tag::RespMeta, e))?;
            let body = find(fields, Tag::HTTP_BODY)
                .map(|f| f.value.clone())
                .unwrap_or_default();
            Ok(AnpxMessage::HttpResponse {
                request_id,
                meta,
                body,
            })
        }
        MessageType::Error => {
            let message = find(fields, Tag::HTTP_BODY)
                .map(|f| String::from_utf8_lossy(&f.value).into_owned())
                .unwrap_or_default();
            Ok(AnpxMessage::Error {
                request_id,
                message,
            })
        }
    }
}
