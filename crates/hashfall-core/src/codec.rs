//! Payload codec: manifest-tagged serialization of application values.
//!
//! The transport never knows payload types in advance. Every type that may
//! cross the wire implements [`Payload`] and is registered with a
//! [`PayloadCodec`]; the encoded image carries the type's manifest so the
//! receiving codec can pick the matching decoder.
//!
//! Image layout:
//!
//! ```text
//! +----------------+------------------+----------------------+
//! | manifest_len   | manifest (UTF-8) | body (bincode)       |
//! | u16 LE         | manifest_len     | rest of the image    |
//! +----------------+------------------+----------------------+
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Longest manifest accepted in an image.
pub const MAX_MANIFEST_LEN: usize = 256;

/// A value that can cross the wire.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {
    /// Stable type name embedded in every encoded image. Never change it
    /// for a type once peers exchange it.
    const MANIFEST: &'static str;
}

/// Object-safe view of a [`Payload`], used wherever the concrete type is
/// erased (mailboxes, large messages, decoded images).
pub trait AnyPayload: Send + 'static {
    fn manifest(&self) -> &'static str;
    fn encode_body(&self) -> Result<Vec<u8>, EncodeError>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Payload> AnyPayload for T {
    fn manifest(&self) -> &'static str {
        T::MANIFEST
    }

    fn encode_body(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serialize(self).map_err(|e| EncodeError::Serialize {
            manifest: T::MANIFEST,
            reason: e.to_string(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl fmt::Debug for dyn AnyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyPayload")
            .field("manifest", &self.manifest())
            .finish()
    }
}

/// Recover the concrete type of an erased payload.
pub fn downcast<T: Payload>(payload: Box<dyn AnyPayload>) -> Result<T, Box<dyn AnyPayload>> {
    if !payload.as_any().is::<T>() {
        return Err(payload);
    }
    match payload.into_any().downcast::<T>() {
        Ok(value) => Ok(*value),
        // is::<T>() held above
        Err(_) => unreachable!("type check passed but downcast failed"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot serialize {manifest}: {reason}")]
    Serialize {
        manifest: &'static str,
        reason: String,
    },
    #[error("manifest {0:?} is longer than {MAX_MANIFEST_LEN} bytes")]
    ManifestTooLong(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload image truncated at {0} bytes")]
    Truncated(usize),
    #[error("payload manifest is not valid UTF-8")]
    InvalidManifest,
    #[error("no decoder registered for manifest {0:?}")]
    UnknownManifest(String),
    #[error("cannot deserialize {manifest}: {reason}")]
    Malformed { manifest: String, reason: String },
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn AnyPayload>, DecodeError>;

fn decode_as<T: Payload>(body: &[u8]) -> Result<Box<dyn AnyPayload>, DecodeError> {
    bincode::deserialize::<T>(body)
        .map(|value| Box::new(value) as Box<dyn AnyPayload>)
        .map_err(|e| DecodeError::Malformed {
            manifest: T::MANIFEST.to_string(),
            reason: e.to_string(),
        })
}

/// Registered type table plus encode/decode. Cheap to clone; clones share
/// the table.
#[derive(Clone)]
pub struct PayloadCodec {
    decoders: Arc<DashMap<&'static str, DecodeFn>>,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadCodec {
    /// A codec with the transport's own protocol messages registered.
    pub fn new() -> Self {
        let codec = Self {
            decoders: Arc::new(DashMap::new()),
        };
        crate::protocol::register_builtins(&codec);
        codec
    }

    /// Register `T`. Returns false if its manifest was already present.
    pub fn register<T: Payload>(&self) -> bool {
        self.decoders
            .insert(T::MANIFEST, decode_as::<T> as DecodeFn)
            .is_none()
    }

    pub fn is_registered(&self, manifest: &str) -> bool {
        self.decoders.contains_key(manifest)
    }

    pub fn encode(&self, value: &dyn AnyPayload) -> Result<Bytes, EncodeError> {
        let manifest = value.manifest();
        if manifest.len() > MAX_MANIFEST_LEN {
            return Err(EncodeError::ManifestTooLong(manifest));
        }
        let body = value.encode_body()?;

        let mut image = BytesMut::with_capacity(2 + manifest.len() + body.len());
        image.put_u16_le(manifest.len() as u16);
        image.put_slice(manifest.as_bytes());
        image.put_slice(&body);
        Ok(image.freeze())
    }

    pub fn decode(&self, image: &[u8]) -> Result<Box<dyn AnyPayload>, DecodeError> {
        if image.len() < 2 {
            return Err(DecodeError::Truncated(image.len()));
        }
        let manifest_len = u16::from_le_bytes([image[0], image[1]]) as usize;
        let body_start = 2 + manifest_len;
        if image.len() < body_start {
            return Err(DecodeError::Truncated(image.len()));
        }
        let manifest =
            std::str::from_utf8(&image[2..body_start]).map_err(|_| DecodeError::InvalidManifest)?;

        let decoder = *self
            .decoders
            .get(manifest)
            .ok_or_else(|| DecodeError::UnknownManifest(manifest.to_string()))?;
        decoder(&image[body_start..])
    }
}
