//! Transports: move encoded frames between actor systems.
//!
//! A transport only moves opaque frames. Encoding, routing and size policy
//! live in the actor system; the transport enforces the frame ceiling it was
//! configured with and preserves order between any two nodes.
//!
//! `MemoryNetwork` hosts any number of nodes inside one process and is what
//! the test suites run clusters on. `TcpTransport` (see `tcp.rs`) is the
//! production path.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use hashfall_core::wire::WireError;
use hashfall_core::NodeAddress;

/// Frames buffered per inbound link before senders are backpressured.
pub const INBOUND_CAPACITY: usize = 1024;

/// Receiving side of a bound transport: complete frames, header included.
pub type InboundFrames = mpsc::Receiver<Bytes>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_address(&self) -> &NodeAddress;

    /// Largest frame this transport will emit, header included.
    fn max_frame_bytes(&self) -> usize;

    /// Send one complete frame. Frames to the same node arrive in the
    /// order they were sent.
    async fn send(&self, to: &NodeAddress, frame: Bytes) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeAddress),

    #[error("connect to {0} timed out")]
    ConnectTimeout(NodeAddress),

    #[error("i/o error on link to {node}: {source}")]
    Io {
        node: NodeAddress,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Wire(#[from] WireError),
}

// ── In-memory network ─────────────────────────────────────────────────────────

/// A switchboard of in-process links. Clones share the same links.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    links: Arc<DashMap<NodeAddress, mpsc::Sender<Bytes>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Frames sent to `address` appear on the returned
    /// receiver; rebinding an address replaces the old link.
    pub fn bind(&self, address: NodeAddress, max_frame_bytes: usize) -> (MemoryTransport, InboundFrames) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.links.insert(address.clone(), tx);
        let transport = MemoryTransport {
            network: self.clone(),
            address,
            max_frame_bytes,
        };
        (transport, rx)
    }

    /// Detach a node; later sends to it fail with `Unreachable`.
    pub fn disconnect(&self, address: &NodeAddress) {
        if self.links.remove(address).is_some() {
            tracing::debug!(node = %address, "memory link removed");
        }
    }

    pub fn is_bound(&self, address: &NodeAddress) -> bool {
        self.links.contains_key(address)
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    address: NodeAddress,
    max_frame_bytes: usize,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> &NodeAddress {
        &self.address
    }

    fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    async fn send(&self, to: &NodeAddress, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_bytes {
            return Err(WireError::Oversized {
                len: frame.len(),
                max: self.max_frame_bytes,
            }
            .into());
        }

        // Clone the sender out so no map guard is held across the await.
        let link = self
            .network
            .links
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;

        link.send(frame)
            .await
            .map_err(|_| TransportError::Unreachable(to.clone()))
    }
}
