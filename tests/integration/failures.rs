use bytes::Bytes;
use serde::Serializer;
use uuid::Uuid;

use hashfall_core::protocol::{ChunkEnvelope, FailureKind, PROXY_NAME};
use hashfall_core::wire;

use crate::*;

fn chunk(session_id: Uuid, sequence: u64, is_last: bool, from: &ActorPath, to: &ActorPath) -> ChunkEnvelope {
    ChunkEnvelope {
        session_id,
        sequence,
        data: Bytes::from(vec![sequence as u8; 16]),
        is_last,
        original_sender: Some(from.clone()),
        original_receiver: to.clone(),
    }
}

/// Chunks 0 then 2: the receiver acks 0, fails the session on the gap,
/// reports it, and delivers nothing.
#[tokio::test]
async fn sequence_gap_fails_without_delivery() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let mut receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);
    let id = Uuid::new_v4();

    a.tell(&proxy, Some(spy_path.clone()), chunk(id, 0, false, &spy_path, &receiver.path))
        .await
        .unwrap();
    a.tell(&proxy, Some(spy_path.clone()), chunk(id, 2, true, &spy_path, &receiver.path))
        .await
        .unwrap();

    match recv(&mut seen).await {
        Seen::Ack(ack) => assert_eq!(ack.session_id, id),
        other => panic!("expected ack, got {other:?}"),
    }
    match recv(&mut seen).await {
        Seen::Failure(failure) => {
            assert_eq!(failure.session_id, id);
            assert_eq!(failure.kind, FailureKind::Sequencing);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_quiet(&mut receiver.inbox).await;
    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_failed, 1);
    assert_eq!(snap.payloads_delivered, 0);

    // Later chunks of the dead session are dropped quietly.
    a.tell(&proxy, Some(spy_path.clone()), chunk(id, 3, true, &spy_path, &receiver.path))
        .await
        .unwrap();
    assert_quiet(&mut seen).await;
}

/// A duplicate chunk is a sequencing failure too.
#[tokio::test]
async fn duplicate_chunk_fails_session() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let mut receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);
    let id = Uuid::new_v4();

    for sequence in [0, 1, 1] {
        a.tell(&proxy, Some(spy_path.clone()), chunk(id, sequence, false, &spy_path, &receiver.path))
            .await
            .unwrap();
    }
    assert!(matches!(recv(&mut seen).await, Seen::Ack(_)));
    assert!(matches!(recv(&mut seen).await, Seen::Ack(_)));
    assert!(matches!(
        recv(&mut seen).await,
        Seen::Failure(StreamFailure { kind: FailureKind::Sequencing, .. })
    ));
    assert_quiet(&mut receiver.inbox).await;
}

/// A session naming a receiver on another node is refused once; its later
/// chunks are dropped without further failures.
#[tokio::test]
async fn chunk_for_foreign_receiver_is_refused() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let mut receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);
    let elsewhere = address("c").user("receiver");
    let id = Uuid::new_v4();

    for sequence in 0..5 {
        a.tell(&proxy, Some(spy_path.clone()), chunk(id, sequence, sequence == 4, &spy_path, &elsewhere))
            .await
            .unwrap();
    }
    match recv(&mut seen).await {
        Seen::Failure(failure) => {
            assert_eq!(failure.session_id, id);
            assert_eq!(failure.kind, FailureKind::Sequencing);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    eventually("all chunks seen", || receiver.metrics.snapshot().chunks_received == 5).await;
    assert_quiet(&mut seen).await;
    assert_quiet(&mut receiver.inbox).await;

    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 0);
    assert_eq!(snap.sessions_failed, 1);
}

/// The receiving node does not know the payload type: decoding fails after
/// full reassembly, nothing is delivered, and the sender is told.
#[tokio::test]
async fn undecodable_payload_fails_both_sides() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Secret(String);
    impl Payload for Secret {
        const MANIFEST: &'static str = "test.Secret";
    }

    let network = MemoryNetwork::new();
    let sender_codec = codec();
    sender_codec.register::<Secret>();
    let a = node_with_codec(&network, "a", sender_codec);
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    a.send_large(&sender.path, &receiver.path, Secret("x".repeat(10_000))).unwrap();

    eventually("sender to see the failure", || {
        sender.metrics.snapshot().sessions_failed == 1
    })
    .await;
    assert_quiet(&mut receiver.inbox).await;
    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_failed, 1);
    assert_eq!(snap.payloads_delivered, 0);
    assert_eq!(sender.metrics.snapshot().sessions_completed, 0);
}

/// A value that cannot be serialized never opens a session.
#[tokio::test]
async fn unserializable_payload_sends_nothing() {
    #[derive(Debug, Deserialize)]
    struct Handle;
    impl Serialize for Handle {
        fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("live handles cannot be serialized"))
        }
    }
    impl Payload for Handle {
        const MANIFEST: &'static str = "test.Handle";
    }

    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    a.send_large(&sender.path, &receiver.path, Handle).unwrap();
    eventually("encode failure", || sender.metrics.snapshot().encode_failures == 1).await;

    let snap = sender.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 0);
    assert_eq!(snap.chunks_sent, 0);
    assert_eq!(receiver.metrics.snapshot().chunks_received, 0);
    assert_quiet(&mut receiver.inbox).await;
}

/// The receiver's node is attached but never answers: resolution times out,
/// no session is opened, no chunk is ever framed.
#[tokio::test]
async fn silent_node_times_out_resolution() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let (_silent, mut frames) = network.bind(address("silent"), DEFAULT_MAX_FRAME_BYTES);
    let sender = participant(&a, "sender", settings());
    let target = address("silent").user("receiver");

    a.send_large(&sender.path, &target, Blob(vec![0; 3 * MIB])).unwrap();
    eventually("resolution failure", || {
        sender.metrics.snapshot().resolution_failures == 1
    })
    .await;

    let snap = sender.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 0);
    assert_eq!(snap.chunks_sent, 0);

    // Only the identify request ever reached the silent node.
    let codec = codec();
    let mut identifies = 0;
    while let Ok(frame) = frames.try_recv() {
        let envelope = wire::decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).unwrap();
        let payload = codec.decode(&envelope.payload).unwrap();
        assert_eq!(payload.manifest(), "hashfall.Identify");
        identifies += 1;
    }
    assert_eq!(identifies, 1);
}

/// The node answers but nothing lives at the path: resolution fails fast.
#[tokio::test]
async fn missing_receiver_fails_resolution() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let _b = node(&network, "b");
    let sender = participant(&a, "sender", settings());

    a.send_large(&sender.path, &address("b").user("nobody"), Blob(vec![1; 10]))
        .unwrap();
    eventually("resolution failure", || {
        sender.metrics.snapshot().resolution_failures == 1
    })
    .await;
    assert_eq!(sender.metrics.snapshot().sessions_opened, 0);
}

/// Resolution is retried with backoff; a receiver that appears in time is
/// found on a later attempt.
#[tokio::test]
async fn retry_finds_late_receiver() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let patient = ProxySettings {
        retry: RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_millis(50),
        },
        ..settings()
    };
    let sender = participant(&a, "sender", patient);
    let target = address("b").user("late");

    a.send_large(&sender.path, &target, Blob(vec![9; 100])).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut late = participant(&b, "late", settings());

    let (from, delivered) = recv(&mut late.inbox).await;
    assert_eq!(from, Some(sender.path.clone()));
    assert_eq!(delivered.0, vec![9; 100]);
    assert_eq!(sender.metrics.snapshot().resolution_failures, 0);
}

/// The receiver node drops off mid-stream: the sender fails the session on
/// the transport error and nothing is delivered.
#[tokio::test]
async fn link_loss_fails_sender_session() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let narrow = ProxySettings {
        chunk_size: 1024,
        window: 1,
        ..settings()
    };
    let sender = participant(&a, "sender", narrow.clone());
    let mut receiver = participant(&b, "receiver", narrow);

    a.send_large(&sender.path, &receiver.path, Blob(vec![5; 16 * MIB])).unwrap();
    eventually("first chunks", || receiver.metrics.snapshot().chunks_received >= 2).await;
    network.disconnect(&address("b"));

    eventually("sender failure", || sender.metrics.snapshot().sessions_failed == 1).await;
    assert_eq!(sender.metrics.snapshot().sessions_completed, 0);
    assert_eq!(receiver.metrics.snapshot().payloads_delivered, 0);
    assert_quiet(&mut receiver.inbox).await;
}

/// Receiver sessions that stop making progress are expired and reported.
#[tokio::test]
async fn stalled_inbound_session_expires() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let impatient = ProxySettings {
        idle_timeout: Duration::from_millis(200),
        ..settings()
    };
    let mut receiver = participant(&b, "receiver", impatient);
    let proxy = receiver.path.child(PROXY_NAME);
    let id = Uuid::new_v4();

    a.tell(&proxy, Some(spy_path.clone()), chunk(id, 0, false, &spy_path, &receiver.path))
        .await
        .unwrap();
    assert!(matches!(recv(&mut seen).await, Seen::Ack(_)));
    match recv(&mut seen).await {
        Seen::Failure(failure) => {
            assert_eq!(failure.session_id, id);
            assert_eq!(failure.kind, FailureKind::Timeout);
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert_quiet(&mut receiver.inbox).await;
}
