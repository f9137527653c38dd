use crate::*;

/// 3 MiB image, 1 MiB chunks: three chunks, three acks, one delivery that
/// is byte-identical and appears to come from the original sender.
#[tokio::test]
async fn three_mebibytes_in_three_chunks() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    let blob = blob_with_image_len(3 * MIB, 7);
    a.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();

    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from.as_ref(), Some(&sender.path));
    assert_eq!(delivered, blob);

    eventually("sender to see completion", || {
        sender.metrics.snapshot().sessions_completed == 1
    })
    .await;
    let sent = sender.metrics.snapshot();
    assert_eq!(sent.sessions_opened, 1);
    assert_eq!(sent.chunks_sent, 3);
    assert_eq!(sent.acks_received, 3);
    assert_eq!(sent.sessions_failed, 0);

    let got = receiver.metrics.snapshot();
    assert_eq!(got.chunks_received, 3);
    assert_eq!(got.payloads_delivered, 1);
    assert_eq!(got.sessions_completed, 1);

    assert_quiet(&mut receiver.inbox).await;
}

/// A payload that needs no splitting still goes through one session with
/// a single chunk flagged last.
#[tokio::test]
async fn small_payload_is_one_chunk() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    a.send_large(&sender.path, &receiver.path, Blob(b"hello".to_vec())).unwrap();
    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from, Some(sender.path.clone()));
    assert_eq!(delivered.0, b"hello");

    eventually("completion", || sender.metrics.snapshot().sessions_completed == 1).await;
    assert_eq!(sender.metrics.snapshot().chunks_sent, 1);
}

/// Both ends on one node: resolution is a registry lookup, chunks never
/// touch the transport.
#[tokio::test]
async fn transfer_between_local_actors() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&a, "receiver", settings());

    let blob = blob_with_image_len(2 * MIB + 17, 3);
    a.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();

    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from, Some(sender.path.clone()));
    assert_eq!(delivered, blob);
    eventually("completion", || sender.metrics.snapshot().sessions_completed == 1).await;
    assert_eq!(sender.metrics.snapshot().chunks_sent, 3);
}

/// With window W the sender never has more than W chunks unacknowledged.
#[tokio::test]
async fn window_bounds_chunks_in_flight() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let narrow = ProxySettings {
        chunk_size: 1024,
        window: 2,
        ..settings()
    };
    let sender = participant(&a, "sender", narrow.clone());
    let mut receiver = participant(&b, "receiver", narrow);

    let blob = blob_with_image_len(64 * 1024, 1);
    a.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();
    let (_, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(delivered, blob);

    eventually("completion", || sender.metrics.snapshot().sessions_completed == 1).await;
    let snap = sender.metrics.snapshot();
    assert_eq!(snap.chunks_sent, 64);
    assert_eq!(snap.acks_received, 64);
    assert!(snap.max_in_flight >= 1 && snap.max_in_flight <= 2, "{snap:?}");
}

/// Smallest possible image: manifest and a zero length prefix.
#[tokio::test]
async fn empty_blob_round_trips() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    a.send_large(&sender.path, &receiver.path, Blob(Vec::new())).unwrap();
    let (_, delivered) = recv(&mut receiver.inbox).await;
    assert!(delivered.0.is_empty());
}

/// Replies to a delivered payload go to the original sender, which can
/// answer through its own proxy.
#[tokio::test]
async fn receiver_can_answer_the_original_sender() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let mut sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    a.send_large(&sender.path, &receiver.path, Blob(vec![1; 4096])).unwrap();
    let (from, _) = recv(&mut receiver.inbox).await;
    let reply_to = from.expect("original sender");

    b.send_large(&receiver.path, &reply_to, Blob(vec![2; MIB + 1])).unwrap();
    let (from, reply) = recv(&mut sender.inbox).await;
    assert_eq!(from, Some(receiver.path.clone()));
    assert_eq!(reply.0.len(), MIB + 1);
}

/// Zero chunk size, window and timeouts are raised to their minimum rather
/// than panicking the proxy or expiring every session at once.
#[tokio::test]
async fn degenerate_settings_still_deliver() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let degenerate = ProxySettings {
        chunk_size: 0,
        window: 0,
        idle_timeout: Duration::ZERO,
        ..settings()
    };
    let sender = participant(&a, "sender", degenerate.clone());
    let mut receiver = participant(&b, "receiver", degenerate);

    let blob = Blob(vec![4; 40]);
    a.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();
    let (_, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(delivered, blob);

    eventually("completion", || sender.metrics.snapshot().sessions_completed == 1).await;
    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 1);
    assert_eq!(snap.sessions_failed, 0);
    assert_eq!(sender.metrics.snapshot().chunks_sent, (40 + BLOB_OVERHEAD) as u64);
}
