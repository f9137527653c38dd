//! Large-payload transport protocol: control and data messages exchanged
//! between large-message proxies.
//!
//! A transfer is one session: the sender streams `ChunkEnvelope`s with
//! contiguous sequence numbers, the receiver answers each accepted chunk with
//! an `Ack` (one unit of credit), and the session ends with exactly one of
//! `StreamCompleted` or `StreamFailure`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor_path::ActorPath;
use crate::codec::{Payload, PayloadCodec};

/// Name of the proxy actor spawned as a child of every actor that takes
/// part in large transfers.
pub const PROXY_NAME: &str = "large-message-proxy";

/// Default chunk payload bound: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of unacknowledged chunks a sender may have in flight.
pub const DEFAULT_WINDOW: usize = 5;

/// Room reserved in a frame for everything but chunk data: frame header,
/// envelope routing, codec manifest and chunk metadata.
pub const ENVELOPE_HEADROOM: usize = 64 * 1024;

/// One fragment of a session's serialized byte image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    pub session_id: Uuid,
    /// Zero-based, strictly increasing per session.
    pub sequence: u64,
    pub data: Bytes,
    pub is_last: bool,
    /// Actor that asked for the transfer; the apparent sender on delivery.
    pub original_sender: Option<ActorPath>,
    /// Actor the decoded payload is delivered to.
    pub original_receiver: ActorPath,
}

impl Payload for ChunkEnvelope {
    const MANIFEST: &'static str = "hashfall.ChunkEnvelope";
}

/// Credit grant for one consumed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub session_id: Uuid,
}

impl Payload for Ack {
    const MANIFEST: &'static str = "hashfall.Ack";
}

/// Sent by the receiver once the payload has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCompleted {
    pub session_id: Uuid,
}

impl Payload for StreamCompleted {
    const MANIFEST: &'static str = "hashfall.StreamCompleted";
}

/// Why a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Resolution,
    Encode,
    Decode,
    Sequencing,
    Transport,
    Timeout,
}

/// Terminal failure notice, sendable by either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub session_id: Uuid,
    pub kind: FailureKind,
    pub cause: String,
}

impl Payload for StreamFailure {
    const MANIFEST: &'static str = "hashfall.StreamFailure";
}

/// Question sent by the resolver to a remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub correlation: Uuid,
}

impl Payload for Identify {
    const MANIFEST: &'static str = "hashfall.Identify";
}

/// Answer to [`Identify`]; `found` is the asked-about path if an actor lives there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub correlation: Uuid,
    pub found: Option<ActorPath>,
}

impl Payload for ActorIdentity {
    const MANIFEST: &'static str = "hashfall.ActorIdentity";
}

pub(crate) fn register_builtins(codec: &PayloadCodec) {
    codec.register::<ChunkEnvelope>();
    codec.register::<Ack>();
    codec.register::<StreamCompleted>();
    codec.register::<StreamFailure>();
    codec.register::<Identify>();
    codec.register::<ActorIdentity>();
}
