//! hashfall wire format: the frame that carries one actor message between
//! nodes.
//!
//! A frame is a fixed 12-byte header followed by a bincode-encoded
//! [`RemoteEnvelope`]. The header is `#[repr(C, packed)]` with zerocopy
//! derives so it can be read straight off a socket buffer. Multi-byte
//! header fields are little-endian on the wire.
//!
//! Frames are bounded: a node refuses to emit or accept a frame larger than
//! its configured `max_frame_bytes`. Payloads that would exceed it must go
//! through the large-message proxies, which split them into chunks.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::actor_path::ActorPath;

// ── Frame Header ──────────────────────────────────────────────────────────────

pub const FRAME_MAGIC: [u8; 4] = *b"HFAL";
pub const FRAME_VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

/// Default hard ceiling for one frame, header included: 2 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Precedes every frame on a stream transport.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Always `FRAME_MAGIC`. A mismatch means the stream is out of sync
    /// and the connection is dropped.
    pub magic: [u8; 4],

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Reserved, must be zero.
    pub reserved: [u8; 2],

    /// Body length in bytes, little-endian, not including this header.
    pub length: u32,
}

assert_eq_size!(FrameHeader, [u8; 12]);

impl FrameHeader {
    pub fn new(body_len: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            flags: 0,
            reserved: [0; 2],
            length: body_len.to_le(),
        }
    }

    pub fn body_len(&self) -> usize {
        let length = self.length;
        u32::from_le(length) as usize
    }

    /// Parse and validate a header from the first `HEADER_LEN` bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let header = FrameHeader::read_from_prefix(buf).ok_or(WireError::Truncated(buf.len()))?;
        if header.magic != FRAME_MAGIC {
            return Err(WireError::BadMagic(header.magic));
        }
        if header.version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.flags != 0 {
            return Err(WireError::ReservedFlagsSet(header.flags));
        }
        Ok(header)
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One actor message addressed to an actor on another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    pub recipient: ActorPath,
    pub sender: Option<ActorPath>,
    /// Payload codec image (manifest-tagged).
    pub payload: Bytes,
}

/// Encode an envelope into a complete frame, refusing anything larger than
/// `max_frame_bytes`.
pub fn encode_frame(envelope: &RemoteEnvelope, max_frame_bytes: usize) -> Result<Bytes, WireError> {
    let body = bincode::serialize(envelope).map_err(|e| WireError::Body(e.to_string()))?;
    let total = HEADER_LEN + body.len();
    if total > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(WireError::Oversized {
            len: total,
            max: max_frame_bytes,
        });
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.put_slice(FrameHeader::new(body.len() as u32).as_bytes());
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Decode a complete frame (header + body).
pub fn decode_frame(frame: &[u8], max_frame_bytes: usize) -> Result<RemoteEnvelope, WireError> {
    let header = FrameHeader::parse(frame)?;
    let body_len = header.body_len();
    if HEADER_LEN + body_len > max_frame_bytes {
        return Err(WireError::Oversized {
            len: HEADER_LEN + body_len,
            max: max_frame_bytes,
        });
    }
    if frame.len() != HEADER_LEN + body_len {
        return Err(WireError::LengthMismatch {
            declared: body_len,
            actual: frame.len().saturating_sub(HEADER_LEN),
        });
    }
    bincode::deserialize(&frame[HEADER_LEN..]).map_err(|e| WireError::Body(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame of {len} bytes exceeds maximum {max}")]
    Oversized { len: usize, max: usize },

    #[error("frame truncated at {0} bytes")]
    Truncated(usize),

    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("header declares {declared} body bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("frame body: {0}")]
    Body(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
