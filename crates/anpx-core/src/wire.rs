//! ANPX frame format — fixed 24-byte header plus a TLV-encoded body.
//!
//! Layout (big-endian throughout):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "ANPX"
//! 4       1     version
//! 5       1     message type
//! 6       1     flags (bit 0 = chunked)
//! 7       1     reserved
//! 8       4     total_length (header + body)
//! 12      4     header_crc (CRC-32 of bytes 0..12)
//! 16      4     body_crc (CRC-32 of the body)
//! 20      4     padding
//! ```

use std::fmt;

pub const MAGIC: [u8; 4] = *b"ANPX";
pub const VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = 24;

/// Bit 0 of the header's flags byte: this frame is part of a chunked message.
pub const FLAG_CHUNKED: u8 = 0b0000_0001;

/// Errors raised while encoding or decoding a single frame header or TLV field.
///
/// Fatal to the originating connection per the failure-semantics table —
/// callers classify these as `ProtocolError`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too short for a frame header: got {0} bytes, need {HEADER_LEN}")]
    HeaderTooShort(usize),
    #[error("bad magic bytes {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    #[error("header CRC mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    HeaderCrcMismatch { computed: u32, stored: u32 },
    #[error("body CRC mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    BodyCrcMismatch { computed: u32, stored: u32 },
    #[error("declared total_length {declared} does not match actual frame length {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("truncated TLV at offset {offset}: declared length {declared}, {remaining} bytes remain")]
    TlvTruncated {
        offset: usize,
        declared: u32,
        remaining: usize,
    },
}

/// Computes CRC-32 (IEEE 802.3 polynomial, the same variant ZIP uses) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// The three message types carried by an ANPX frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    HttpRequest = 0x01,
    HttpResponse = 0x02,
    Error = 0xFF,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::HttpRequest),
            0x02 => Ok(Self::HttpResponse),
            0xFF => Ok(Self::Error),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// A decoded frame header. The body itself is handled separately by the
/// caller, which also owns validating `body_crc` against the actual body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub chunked: bool,
    pub total_length: u32,
    pub body_crc: u32,
}

impl FrameHeader {
    /// Packs a header for a body of length `body_len`. `body_crc` must
    /// already have been computed over the caller's encoded body.
    pub fn encode(
        message_type: MessageType,
        chunked: bool,
        body_len: usize,
        body_crc: u32,
    ) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = VERSION;
        buf[5] = message_type.into();
        buf[6] = if chunked { FLAG_CHUNKED } else { 0 };
        buf[7] = 0;
        let total_length = (HEADER_LEN + body_len) as u32;
        buf[8..12].copy_from_slice(&total_length.to_be_bytes());

        // header_crc slot is zero at this point; computed over bytes 0..12.
        let header_crc = crc32(&buf[0..12]);
        buf[12..16].copy_from_slice(&header_crc.to_be_bytes());
        buf[16..20].copy_from_slice(&body_crc.to_be_bytes());
        // buf[20..24] stays zeroed padding.
        buf
    }

    /// Parses and validates a 24-byte header (magic, version, header CRC).
    /// Returns `total_length` and `body_crc` for the caller to validate once
    /// the body slice is in hand.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::HeaderTooShort(buf.len()));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        let message_type = MessageType::try_from(buf[5])?;
        let chunked = buf[6] & FLAG_CHUNKED != 0;
        let total_length = u32::from_be_bytes(buf[8..12].try_into().unwrap());

        let stored_header_crc = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let computed_header_crc = crc32(&buf[0..12]);
        if stored_header_crc != computed_header_crc {
            return Err(WireError::HeaderCrcMismatch {
                computed: computed_header_crc,
                stored: stored_header_crc,
            });
        }

        let body_crc = u32::from_be_bytes(buf[16..20].try_into().unwrap());

        Ok(FrameHeader {
            message_type,
            chunked,
            total_length,
            body_crc,
        })
    }
}

/// TLV tags defined on the wire. Unknown tags encountered on decode are
/// skipped using the declared length, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    RequestId,
    HttpMeta,
    HttpBody,
    RespMeta,
    ChunkIdx,
    ChunkTot,
    FinalChunk,
    Unknown(u8),
}

impl Tag {
    pub const REQUEST_ID: u8 = 0x01;
    pub const HTTP_META: u8 = 0x02;
    pub const HTTP_BODY: u8 = 0x03;
    pub const RESP_META: u8 = 0x04;
    pub const CHUNK_IDX: u8 = 0x0A;
    pub const CHUNK_TOT: u8 = 0x0B;
    pub const FINAL_CHUNK: u8 = 0x0C;

    pub fn byte(self) -> u8 {
        match self {
            Tag::RequestId => Self::REQUEST_ID,
            Tag::HttpMeta => Self::HTTP_META,
            Tag::HttpBody => Self::HTTP_BODY,
            Tag::RespMeta => Self::RESP_META,
            Tag::ChunkIdx => Self::CHUNK_IDX,
            Tag::ChunkTot => Self::CHUNK_TOT,
            Tag::FinalChunk => Self::FINAL_CHUNK,
            Tag::Unknown(b) => b,
        }
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        match value {
            Self::REQUEST_ID => Tag::RequestId,
            Self::HTTP_META => Tag::HttpMeta,
            Self::HTTP_BODY => Tag::HttpBody,
            Self::RESP_META => Tag::RespMeta,
            Self::CHUNK_IDX => Tag::ChunkIdx,
            Self::CHUNK_TOT => Tag::ChunkTot,
            Self::FINAL_CHUNK => Tag::FinalChunk,
            other => Tag::Unknown(other),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.byte())
    }
}

/// A single decoded TLV field: its tag and the raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvField {
    pub tag: Tag,
    pub value: Vec<u8>,
}

/// Per-field TLV overhead: 1-byte tag + 4-byte length.
pub const TLV_HEADER_LEN: usize = 5;

/// Appends `tag || big-endian-u32(value.len()) || value` to `out`.
pub fn encode_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

/// Encodes a 4-byte big-endian unsigned integer TLV (used for chunk index/total).
pub fn encode_u32_tlv(out: &mut Vec<u8>, tag: u8, value: u32) {
    encode_tlv(out, tag, &value.to_be_bytes());
}

/// Decodes one TLV field at `offset`. Returns the field and the offset of the
/// next field. Fails if fewer than `5 + length` bytes remain.
pub fn decode_tlv(buf: &[u8], offset: usize) -> Result<(TlvField, usize), WireError> {
    if buf.len() < offset + TLV_HEADER_LEN {
        return Err(WireError::TlvTruncated {
            offset,
            declared: 0,
            remaining: buf.len().saturating_sub(offset),
        });
    }
    let tag = buf[offset];
    let len = u32::from_be_bytes(buf[offset + 1..offset + 5].try_into().unwrap());
    let value_start = offset + TLV_HEADER_LEN;
    let value_end = value_start
        .checked_add(len as usize)
        .filter(|&end| end <= buf.len())
        .ok_or(WireError::TlvTruncated {
            offset,
            declared: len,
            remaining: buf.len().saturating_sub(value_start),
        })?;

    Ok((
        TlvField {
            tag: Tag::from(tag),
            value: buf[value_start..value_end].to_vec(),
        },
        value_end,
    ))
}

/// Decodes every TLV field in `buf`, in order. Unknown tags are kept (not
/// dropped) so callers can decide per spec whether to act on them; decode
/// itself never fails on an unknown tag, only on a truncated one.
pub fn decode_all_tlv(buf: &[u8]) -> Result<Vec<TlvField>, WireError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (field, next) = decode_tlv(buf, offset)?;
        fields.push(field);
        offset = next;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // "123456789" is the canonical CRC-32/ISO-HDLC (zip) test vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn header_round_trip() {
        let body = b"hello world";
        let body_crc = crc32(body);
        let header = FrameHeader::encode(MessageType::HttpRequest, false, body.len(), body_crc);
        let decoded = FrameHeader::decode(&header).unwrap();
        assert_eq!(decoded.message_type, MessageType::HttpRequest);
        assert!(!decoded.chunked);
        assert_eq!(decoded.total_length as usize, HEADER_LEN + body.len());
        assert_eq!(decoded.body_crc, body_crc);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = FrameHeader::encode(MessageType::HttpRequest, false, 0, 0);
        header[0] = b'X';
        assert!(matches!(
            FrameHeader::decode(&header),
            Err(WireError::BadMagic(_))
        ));
    }

    #[test]
    fn header_rejects_flipped_crc_bit() {
        let mut header = FrameHeader::encode(MessageType::HttpRequest, false, 0, 0);
        header[12] ^= 0x01;
        assert!(matches!(
            FrameHeader::decode(&header),
            Err(WireError::HeaderCrcMismatch { .. })
        ));
    }

    #[test]
    fn header_rejects_unsupported_version() {
        let mut header = FrameHeader::encode(MessageType::HttpRequest, false, 0, 0);
        header[4] = 0x02;
        let crc = crc32(&header[0..12]);
        header[12..16].copy_from_slice(&crc.to_be_bytes());
        assert!(matches!(
            FrameHeader::decode(&header),
            Err(WireError::UnsupportedVersion(0x02))
        ));
    }

    #[test]
    fn tlv_round_trip() {
        let mut buf = Vec::new();
        encode_tlv(&mut buf, Tag::REQUEST_ID, b"abc-123");
        encode_u32_tlv(&mut buf, Tag::CHUNK_IDX, 7);

        let fields = decode_all_tlv(&buf).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].tag, Tag::RequestId);
        assert_eq!(fields[0].value, b"abc-123");
        assert_eq!(fields[1].tag, Tag::ChunkIdx);
        assert_eq!(
            u32::from_be_bytes(fields[1].value.clone().try_into().unwrap()),
            7
        );
    }

    #[test]
    fn tlv_unknown_tag_is_skipped_not_rejected() {
        let mut buf = Vec::new();
        encode_tlv(&mut buf, Tag::REQUEST_ID, b"id");
        encode_tlv(&mut buf, 0xEE, b"surprise");
        encode_tlv(&mut buf, Tag::CHUNK_TOT, &4u32.to_be_bytes());

        let fields = decode_all_tlv(&buf).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].tag, Tag::Unknown(0xEE));
        assert_eq!(fields[2].tag, Tag::ChunkTot);
    }

    #[test]
    fn tlv_truncated_value_is_rejected() {
        let mut buf = Vec::new();
        buf.push(Tag::REQUEST_ID);
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"short"); // only 5 of 10 declared bytes

        assert!(matches!(
            decode_tlv(&buf, 0),
            Err(WireError::TlvTruncated { .. })
        ));
    }
}
