//! Chunk stream controller: splitting, credit-window sending and strictly
//! ordered reassembly for one session.
//!
//! Both halves are plain state machines with no I/O: the proxies feed them
//! events (a chunk, an ack, a completion) and act on what they return. This
//! keeps every protocol rule testable without a runtime.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use uuid::Uuid;

use hashfall_core::protocol::ChunkEnvelope;
use hashfall_core::ActorPath;

/// Number of chunks `len` bytes split into. An empty image is one chunk.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    assert!(chunk_size > 0, "chunk size must be non-zero");
    len.div_ceil(chunk_size).max(1)
}

/// Split an image into chunks of at most `chunk_size` bytes without copying.
pub fn split(image: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    assert!(chunk_size > 0, "chunk size must be non-zero");
    if image.is_empty() {
        return vec![Bytes::new()];
    }
    (0..image.len())
        .step_by(chunk_size)
        .map(|start| image.slice(start..(start + chunk_size).min(image.len())))
        .collect()
}

/// Who a session carries a payload from and to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub original_sender: Option<ActorPath>,
    pub original_receiver: ActorPath,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencingError {
    #[error("expected chunk {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("chunk {got} already received (expected {expected})")]
    Duplicate { expected: u64, got: u64 },

    #[error("chunk route differs from the session's")]
    RouteMismatch,

    #[error("session is already closed")]
    Closed,

    #[error("ack with no chunk in flight")]
    UnexpectedAck,

    #[error("completion reported with {unsent} chunks still unsent")]
    PrematureCompletion { unsent: usize },
}

// ── Sender role ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Streaming,
    Completed,
    Failed,
}

/// Sending half of a session. Holds the unsent chunks and the credit count.
#[derive(Debug)]
pub struct OutboundStream {
    session_id: Uuid,
    route: Route,
    peer: ActorPath,
    pending: VecDeque<Bytes>,
    next_sequence: u64,
    total: u64,
    window: usize,
    in_flight: usize,
    state: SendState,
    last_activity: Instant,
}

impl OutboundStream {
    /// `peer` is the receiving proxy; `window` is at least 1.
    pub fn new(
        session_id: Uuid,
        image: Bytes,
        chunk_size: usize,
        window: usize,
        route: Route,
        peer: ActorPath,
    ) -> Self {
        let pending: VecDeque<Bytes> = split(&image, chunk_size).into();
        Self {
            session_id,
            route,
            peer,
            total: pending.len() as u64,
            pending,
            next_sequence: 0,
            window: window.max(1),
            in_flight: 0,
            state: SendState::Streaming,
            last_activity: Instant::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn peer(&self) -> &ActorPath {
        &self.peer
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn total_chunks(&self) -> u64 {
        self.total
    }

    pub fn chunks_sent(&self) -> u64 {
        self.next_sequence
    }

    /// Next chunk to put on the wire, if there is credit and one is left.
    /// Each chunk returned consumes one unit of credit.
    pub fn poll_ready(&mut self) -> Option<ChunkEnvelope> {
        if self.state != SendState::Streaming || self.in_flight >= self.window {
            return None;
        }
        let data = self.pending.pop_front()?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.in_flight += 1;
        self.last_activity = Instant::now();

        Some(ChunkEnvelope {
            session_id: self.session_id,
            sequence,
            data,
            is_last: self.next_sequence == self.total,
            original_sender: self.route.original_sender.clone(),
            original_receiver: self.route.original_receiver.clone(),
        })
    }

    /// Return one unit of credit.
    pub fn acknowledge(&mut self) -> Result<(), SequencingError> {
        if self.state != SendState::Streaming {
            return Err(SequencingError::Closed);
        }
        if self.in_flight == 0 {
            return Err(SequencingError::UnexpectedAck);
        }
        self.in_flight -= 1;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// The receiver delivered the payload.
    pub fn complete(&mut self) -> Result<(), SequencingError> {
        if self.state != SendState::Streaming {
            return Err(SequencingError::Closed);
        }
        if !self.pending.is_empty() {
            return Err(SequencingError::PrematureCompletion {
                unsent: self.pending.len(),
            });
        }
        self.state = SendState::Completed;
        self.in_flight = 0;
        Ok(())
    }

    /// Tear the session down; unsent chunks are dropped.
    pub fn fail(&mut self) {
        self.state = SendState::Failed;
        self.pending.clear();
        self.in_flight = 0;
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }
}

// ── Receiver role ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitingFirstChunk,
    Buffering,
    Completed,
    Failed,
}

/// Outcome of accepting one chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum Accepted {
    Buffered,
    /// The last chunk arrived; here is the whole image.
    Completed(Bytes),
}

/// Receiving half of a session: one reassembly buffer.
#[derive(Debug)]
pub struct InboundStream {
    session_id: Uuid,
    route: Route,
    buffer: BytesMut,
    next_expected: u64,
    state: ReceiveState,
    last_activity: Instant,
}

impl InboundStream {
    /// Open a session for the route carried by its first observed chunk.
    pub fn new(session_id: Uuid, route: Route) -> Self {
        Self {
            session_id,
            route,
            buffer: BytesMut::new(),
            next_expected: 0,
            state: ReceiveState::AwaitingFirstChunk,
            last_activity: Instant::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Accept the next chunk. Any violation fails the session and drops
    /// everything buffered so far.
    pub fn accept(&mut self, chunk: ChunkEnvelope) -> Result<Accepted, SequencingError> {
        match self.state {
            ReceiveState::Completed | ReceiveState::Failed => return Err(SequencingError::Closed),
            ReceiveState::AwaitingFirstChunk | ReceiveState::Buffering => {}
        }

        if let Err(e) = self.check(&chunk) {
            self.fail();
            return Err(e);
        }

        self.last_activity = Instant::now();
        self.buffer.extend_from_slice(&chunk.data);
        self.next_expected += 1;

        if chunk.is_last {
            self.state = ReceiveState::Completed;
            Ok(Accepted::Completed(std::mem::take(&mut self.buffer).freeze()))
        } else {
            self.state = ReceiveState::Buffering;
            Ok(Accepted::Buffered)
        }
    }

    fn check(&self, chunk: &ChunkEnvelope) -> Result<(), SequencingError> {
        if chunk.original_sender != self.route.original_sender
            || chunk.original_receiver != self.route.original_receiver
        {
            return Err(SequencingError::RouteMismatch);
        }
        let (expected, got) = (self.next_expected, chunk.sequence);
        if got < expected {
            return Err(SequencingError::Duplicate { expected, got });
        }
        if got > expected {
            return Err(SequencingError::Gap { expected, got });
        }
        Ok(())
    }

    pub fn fail(&mut self) {
        self.state = ReceiveState::Failed;
        self.buffer = BytesMut::new();
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }
}
