use bytes::Bytes;
use uuid::Uuid;

use hashfall_core::protocol::{ChunkEnvelope, FailureKind, PROXY_NAME};

use crate::*;

/// Several senders on two nodes stream into one receiver at once; every
/// payload arrives intact and attributed to its own sender.
#[tokio::test]
async fn concurrent_senders_do_not_interfere() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let c = node(&network, "c");
    let narrow = ProxySettings {
        chunk_size: 64 * 1024,
        window: 3,
        ..settings()
    };
    let mut receiver = participant(&c, "receiver", narrow.clone());

    let mut expected = Vec::new();
    for (i, system) in [&a, &b, &a, &b].into_iter().enumerate() {
        let sender = participant(system, &format!("sender-{i}"), narrow.clone());
        let blob = blob_with_image_len(MIB / 2 + i * 1000, i as u8);
        system.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();
        expected.push((sender.path, blob));
    }

    let mut delivered = Vec::new();
    for _ in 0..expected.len() {
        delivered.push(recv(&mut receiver.inbox).await);
    }
    for (path, blob) in &expected {
        let (_, got) = delivered
            .iter()
            .find(|(from, _)| from.as_ref() == Some(path))
            .unwrap_or_else(|| panic!("nothing delivered from {path}"));
        assert_eq!(got, blob);
    }

    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 4);
    assert_eq!(snap.payloads_delivered, 4);
    assert_eq!(snap.sessions_failed, 0);
    assert_quiet(&mut receiver.inbox).await;
}

/// One sender pushes two payloads back to back; both sessions complete and
/// nothing is mixed up.
#[tokio::test]
async fn one_sender_two_sessions() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());

    let first = blob_with_image_len(2 * MIB, 1);
    let second = blob_with_image_len(MIB + 3, 2);
    a.send_large(&sender.path, &receiver.path, first.clone()).unwrap();
    a.send_large(&sender.path, &receiver.path, second.clone()).unwrap();

    let mut got = vec![recv(&mut receiver.inbox).await.1, recv(&mut receiver.inbox).await.1];
    got.sort_by_key(|blob| std::cmp::Reverse(blob.0.len()));
    assert_eq!(got, vec![first, second]);

    eventually("both complete", || sender.metrics.snapshot().sessions_completed == 2).await;
}

/// Chunks of two sessions arrive interleaved at one receiver proxy; each is
/// reassembled from its own chunks only and delivered when its last lands.
#[tokio::test]
async fn interleaved_sessions_reassemble_separately() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let mut receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);

    let first = blob_with_image_len(3000, 1);
    let second = blob_with_image_len(4500, 2);
    let slices = |blob: &Blob| {
        let image = codec().encode(blob).unwrap();
        let third = image.len() / 3;
        [image.slice(..third), image.slice(third..2 * third), image.slice(2 * third..)]
    };
    let (id_a, id_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (parts_a, parts_b) = (slices(&first), slices(&second));

    let order = [(id_a, 0), (id_b, 0), (id_b, 1), (id_a, 1), (id_b, 2), (id_a, 2)];
    for (session_id, sequence) in order {
        let parts = if session_id == id_a { &parts_a } else { &parts_b };
        let chunk = ChunkEnvelope {
            session_id,
            sequence,
            data: parts[sequence as usize].clone(),
            is_last: sequence == 2,
            original_sender: Some(spy_path.clone()),
            original_receiver: receiver.path.clone(),
        };
        a.tell(&proxy, Some(spy_path.clone()), chunk).await.unwrap();
    }

    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from, Some(spy_path.clone()));
    assert_eq!(delivered, second);
    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from, Some(spy_path.clone()));
    assert_eq!(delivered, first);

    let mut completed = Vec::new();
    for _ in 0..8 {
        if let Seen::Completed(done) = recv(&mut seen).await {
            completed.push(done.session_id);
        }
    }
    assert_eq!(completed, vec![id_b, id_a]);

    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_opened, 2);
    assert_eq!(snap.payloads_delivered, 2);
    assert_eq!(snap.sessions_failed, 0);
    assert_quiet(&mut receiver.inbox).await;
}

/// A session broken by a sequence gap fails alone; a healthy transfer to
/// the same receiver proxy carries on and is delivered.
#[tokio::test]
async fn failed_session_leaves_others_alone() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let sender = participant(&a, "sender", settings());
    let mut receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);

    let blob = blob_with_image_len(3 * MIB, 42);
    a.send_large(&sender.path, &receiver.path, blob.clone()).unwrap();

    let broken = Uuid::new_v4();
    for sequence in [0, 5] {
        let chunk = ChunkEnvelope {
            session_id: broken,
            sequence,
            data: Bytes::from_static(b"noise"),
            is_last: false,
            original_sender: Some(spy_path.clone()),
            original_receiver: receiver.path.clone(),
        };
        a.tell(&proxy, Some(spy_path.clone()), chunk).await.unwrap();
    }

    let (from, delivered) = recv(&mut receiver.inbox).await;
    assert_eq!(from, Some(sender.path.clone()));
    assert_eq!(delivered, blob);

    assert!(matches!(recv(&mut seen).await, Seen::Ack(_)));
    match recv(&mut seen).await {
        Seen::Failure(failure) => assert_eq!(failure.session_id, broken),
        other => panic!("expected failure, got {other:?}"),
    }

    eventually("healthy session completes", || {
        sender.metrics.snapshot().sessions_completed == 1
    })
    .await;
    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_failed, 1);
    assert_eq!(snap.payloads_delivered, 1);
    assert_quiet(&mut receiver.inbox).await;
}

/// The reassembled payload names a receiver that no longer exists: the
/// session fails with a delivery error and the sender hears about it.
#[tokio::test]
async fn missing_final_receiver_fails_delivery() {
    let network = MemoryNetwork::new();
    let a = node(&network, "a");
    let b = node(&network, "b");
    let (spy_path, mut seen) = spy(&a, "spy");
    let receiver = participant(&b, "receiver", settings());
    let proxy = receiver.path.child(PROXY_NAME);

    let image = codec().encode(&Blob(vec![3; 10])).unwrap();
    let chunk = ChunkEnvelope {
        session_id: Uuid::new_v4(),
        sequence: 0,
        data: image,
        is_last: true,
        original_sender: Some(spy_path.clone()),
        original_receiver: address("b").user("ghost"),
    };
    a.tell(&proxy, Some(spy_path.clone()), chunk).await.unwrap();

    assert!(matches!(recv(&mut seen).await, Seen::Ack(_)));
    assert!(matches!(
        recv(&mut seen).await,
        Seen::Failure(StreamFailure { kind: FailureKind::Transport, .. })
    ));
    let snap = receiver.metrics.snapshot();
    assert_eq!(snap.sessions_failed, 1);
    assert_eq!(snap.payloads_delivered, 0);
}
