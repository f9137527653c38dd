//! hashfall integration test harness.
//!
//! Every test builds its own cluster: several actor systems in one process
//! joined by a `MemoryNetwork`, or by loopback TCP for the tcp tests.
//! Nothing is shared between tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use hashfall_core::protocol::{Ack, StreamCompleted, StreamFailure};
use hashfall_core::wire::DEFAULT_MAX_FRAME_BYTES;
use hashfall_core::{ActorPath, NodeAddress, Payload, PayloadCodec};
use hashfall_services::{
    attach_proxy, Actor, ActorSystem, Context, Envelope, MemoryNetwork, ProxyMetrics, ProxySettings, RetryPolicy,
};

mod failures;
mod isolation;
mod transfer;

// ── Payloads ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob(pub Vec<u8>);

impl Payload for Blob {
    const MANIFEST: &'static str = "test.Blob";
}

/// Codec image overhead of a `Blob`: manifest length prefix, manifest,
/// bincode length prefix.
pub const BLOB_OVERHEAD: usize = 2 + Blob::MANIFEST.len() + 8;

/// A blob whose codec image is exactly `image_len` bytes.
pub fn blob_with_image_len(image_len: usize, seed: u8) -> Blob {
    let len = image_len - BLOB_OVERHEAD;
    Blob((0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect())
}

pub const MIB: usize = 1024 * 1024;

// ── Cluster ───────────────────────────────────────────────────────────────────

pub fn codec() -> PayloadCodec {
    let codec = PayloadCodec::new();
    codec.register::<Blob>();
    codec
}

pub fn address(host: &str) -> NodeAddress {
    NodeAddress::new("ddm", host, 7877)
}

/// Start a node named `host` on `network`.
pub fn node(network: &MemoryNetwork, host: &str) -> ActorSystem {
    node_with_codec(network, host, codec())
}

pub fn node_with_codec(network: &MemoryNetwork, host: &str, codec: PayloadCodec) -> ActorSystem {
    let (transport, inbound) = network.bind(address(host), DEFAULT_MAX_FRAME_BYTES);
    ActorSystem::start(codec, Arc::new(transport), inbound)
}

/// Settings that fail fast when a peer does not answer.
pub fn settings() -> ProxySettings {
    ProxySettings {
        resolve_timeout: Duration::from_millis(300),
        retry: RetryPolicy {
            attempts: 1,
            initial_backoff: Duration::from_millis(10),
        },
        ..ProxySettings::default()
    }
}

// ── Actors ────────────────────────────────────────────────────────────────────

pub type Delivered = (Option<ActorPath>, Blob);

/// Forwards every `Blob` it receives, with its apparent sender.
pub struct Collector(pub UnboundedSender<Delivered>);

#[async_trait]
impl Actor for Collector {
    async fn handle(&mut self, _ctx: &mut Context, envelope: Envelope) {
        if let Ok(delivered) = envelope.take::<Blob>() {
            let _ = self.0.send(delivered);
        }
    }
}

pub struct Participant {
    pub path: ActorPath,
    pub metrics: ProxyMetrics,
    pub inbox: UnboundedReceiver<Delivered>,
}

/// Spawn a collector with its own large-message proxy.
pub fn participant(system: &ActorSystem, name: &str, settings: ProxySettings) -> Participant {
    let (tx, inbox) = mpsc::unbounded_channel();
    let path = system.spawn(name, Collector(tx)).expect("spawn collector");
    let metrics = attach_proxy(system, &path, settings).expect("spawn proxy");
    Participant { path, metrics, inbox }
}

/// Protocol traffic observed by a [`Spy`].
#[derive(Debug)]
pub enum Seen {
    Ack(Ack),
    Completed(StreamCompleted),
    Failure(StreamFailure),
}

/// Stands in for a sending proxy: records the replies a receiver sends it.
pub struct Spy(pub UnboundedSender<Seen>);

#[async_trait]
impl Actor for Spy {
    async fn handle(&mut self, _ctx: &mut Context, envelope: Envelope) {
        let envelope = match envelope.take::<Ack>() {
            Ok((_, ack)) => {
                let _ = self.0.send(Seen::Ack(ack));
                return;
            }
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<StreamCompleted>() {
            Ok((_, done)) => {
                let _ = self.0.send(Seen::Completed(done));
                return;
            }
            Err(envelope) => envelope,
        };
        if let Ok((_, failure)) = envelope.take::<StreamFailure>() {
            let _ = self.0.send(Seen::Failure(failure));
        }
    }
}

pub fn spy(system: &ActorSystem, name: &str) -> (ActorPath, UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let path = system.spawn(name, Spy(tx)).expect("spawn spy");
    (path, rx)
}

// ── Waiting ───────────────────────────────────────────────────────────────────

/// Poll `check` until it holds, failing the test after 10 s.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("channel closed")
}

/// Assert nothing arrives on `rx` for a little while.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
    if let Ok(Some(unexpected)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
        panic!("unexpected message: {unexpected:?}");
    }
}

#[tokio::test]
async fn blob_image_length_is_exact() {
    let codec = codec();
    let blob = blob_with_image_len(3 * MIB, 0);
    assert_eq!(codec.encode(&blob).unwrap().len(), 3 * MIB);
}
