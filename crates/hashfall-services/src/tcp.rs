//! TCP transport: frames over plain tokio TCP streams.
//!
//! Each node listens on its own address. Outbound traffic to a peer uses one
//! cached connection per peer, and writes to it are serialized by a mutex so
//! frames leave in the order `send` was called. Inbound connections are only
//! read from; every complete frame (header + body) goes to the node's
//! inbound channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use hashfall_core::wire::{FrameHeader, WireError, HEADER_LEN};
use hashfall_core::NodeAddress;

use crate::transport::{InboundFrames, Transport, TransportError, INBOUND_CAPACITY};

type PeerSlot = Arc<Mutex<Option<OwnedWriteHalf>>>;

pub struct TcpTransport {
    address: NodeAddress,
    max_frame_bytes: usize,
    connect_timeout: Duration,
    peers: DashMap<NodeAddress, PeerSlot>,
}

impl TcpTransport {
    /// Listen on `host:port` (port 0 picks a free one) and start accepting
    /// peers. The returned transport reports the port actually bound.
    pub async fn bind(
        system: &str,
        host: &str,
        port: u16,
        max_frame_bytes: usize,
        connect_timeout: Duration,
    ) -> std::io::Result<(Self, InboundFrames)> {
        let listener = TcpListener::bind((host, port)).await?;
        let bound = listener.local_addr()?;
        let address = NodeAddress::new(system, host, bound.port());
        tracing::info!(node = %address, "tcp transport listening");

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(accept_loop(listener, tx, max_frame_bytes));

        let transport = Self {
            address,
            max_frame_bytes,
            connect_timeout,
            peers: DashMap::new(),
        };
        Ok((transport, rx))
    }

    async fn connect(&self, to: &NodeAddress) -> Result<OwnedWriteHalf, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(to.socket_addr()))
            .await
            .map_err(|_| TransportError::ConnectTimeout(to.clone()))?
            .map_err(|source| TransportError::Io {
                node: to.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| TransportError::Io {
            node: to.clone(),
            source,
        })?;
        tracing::debug!(peer = %to, "connected");

        // Outbound connections are write-only; the peer answers on its own.
        let (_read, write) = stream.into_split();
        Ok(write)
    }
}

#[async_trait]
impl Transport for TcpTransport {
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

        let slot = self.peers.entry(to.clone()).or_default().value().clone();
        let mut writer = slot.lock().await;

        // A cached connection may have died since the last frame; reconnect
        // once before giving up.
        for attempt in 0..2 {
            if writer.is_none() {
                *writer = Some(self.connect(to).await?);
            }
            let Some(stream) = writer.as_mut() else {
                continue;
            };
            match stream.write_all(&frame).await {
                Ok(()) => return Ok(()),
                Err(source) => {
                    *writer = None;
                    if attempt == 1 {
                        return Err(TransportError::Io {
                            node: to.clone(),
                            source,
                        });
                    }
                    tracing::debug!(peer = %to, error = %source, "write failed, reconnecting");
                }
            }
        }
        Err(TransportError::Unreachable(to.clone()))
    }
}

async fn accept_loop(listener: TcpListener, inbound: mpsc::Sender<Bytes>, max_frame_bytes: usize) {
    loop {
        tokio::select! {
            _ = inbound.closed() => {
                tracing::debug!("inbound channel closed, listener exiting");
                return;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "peer connected");
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(read_frames(stream, inbound.clone(), max_frame_bytes));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

/// Read frames off one connection until it closes or goes out of sync.
async fn read_frames(mut stream: TcpStream, inbound: mpsc::Sender<Bytes>, max_frame_bytes: usize) {
    let peer = stream.peer_addr().ok();
    loop {
        let mut header = [0u8; HEADER_LEN];
        if let Err(e) = stream.read_exact(&mut header).await {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                tracing::debug!(?peer, error = %e, "read failed");
            }
            return;
        }

        let body_len = match FrameHeader::parse(&header) {
            Ok(parsed) if HEADER_LEN + parsed.body_len() <= max_frame_bytes => parsed.body_len(),
            Ok(parsed) => {
                tracing::warn!(?peer, len = HEADER_LEN + parsed.body_len(), max = max_frame_bytes, "oversized frame, dropping connection");
                return;
            }
            Err(e) => {
                tracing::warn!(?peer, error = %e, "bad frame header, dropping connection");
                return;
            }
        };

        let mut frame = BytesMut::zeroed(HEADER_LEN + body_len);
        frame[..HEADER_LEN].copy_from_slice(&header);
        if let Err(e) = stream.read_exact(&mut frame[HEADER_LEN..]).await {
            tracing::debug!(?peer, error = %e, "connection closed mid-frame");
            return;
        }

        if inbound.send(frame.freeze()).await.is_err() {
            return;
        }
    }
}
