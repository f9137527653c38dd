//! Session failure taxonomy. Every variant is terminal for one session only.

use std::time::Duration;

use hashfall_core::protocol::FailureKind;
use hashfall_core::{DecodeError, EncodeError};

use crate::resolver::ResolveError;
use crate::stream::SequencingError;
use crate::system::SendError;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("sequencing: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("transport: {0}")]
    Transport(#[from] SendError),

    #[error("no activity for {0:?}")]
    IdleTimeout(Duration),

    /// The peer proxy reported the failure.
    #[error("peer reported {kind:?}: {cause}")]
    Remote { kind: FailureKind, cause: String },

    /// Decoded fine but the receiver is gone.
    #[error("delivery failed: {0}")]
    Delivery(SendError),
}

impl StreamError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StreamError::Resolution(ResolveError::Timeout { .. }) => FailureKind::Timeout,
            StreamError::Resolution(_) => FailureKind::Resolution,
            StreamError::Encode(_) => FailureKind::Encode,
            StreamError::Decode(_) => FailureKind::Decode,
            StreamError::Sequencing(_) => FailureKind::Sequencing,
            StreamError::Transport(_) | StreamError::Delivery(_) => FailureKind::Transport,
            StreamError::IdleTimeout(_) => FailureKind::Timeout,
            StreamError::Remote { kind, .. } => *kind,
        }
    }
}
