//! hashfall-core: actor identities, payload codec, wire format, transport
//! protocol messages, and configuration. All other hashfall crates depend
//! on this one.

pub mod actor_path;
pub mod codec;
pub mod config;
pub mod protocol;
pub mod wire;

pub use actor_path::{ActorPath, NodeAddress};
pub use codec::{downcast, AnyPayload, DecodeError, EncodeError, Payload, PayloadCodec};
