mod common;

use std::sync::Arc;
use std::time::Duration;

use common::registry;
use doorway::bus::{Event, Target, Topic, WaitOutcome};
use tokio::sync::Barrier;

/// Every session parked on Refresh wakes for one concurrent broadcast.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_all_receive_broadcast() {
    const WAITERS: usize = 16;
    let registry = registry();
    let barrier = Arc::new(Barrier::new(WAITERS + 1));

    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let session = registry.create();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                session
                    .wait(&[Topic::Refresh], Some(Duration::from_secs(2)))
                    .await
            })
        })
        .collect();

    barrier.wait().await;
    let delivered = registry.bus().broadcast(Event::Refresh);
    assert_eq!(delivered, WAITERS);

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Event(Event::Refresh));
    }
}

/// An event nobody waits for stays queued until flushed.
#[tokio::test]
async fn test_unmatched_event_survives_until_flush() {
    let registry = registry();
    let sender = registry.create();
    let receiver = registry.create();

    sender.post(
        &Target::session(receiver.id()),
        Event::Page {
            from: sender.id(),
            handle: "ops".to_string(),
            text: "ping".to_string(),
        },
    );

    assert_eq!(
        receiver.wait(&[Topic::Chat], Some(Duration::from_millis(20))).await,
        WaitOutcome::TimedOut
    );
    assert_eq!(receiver.mailbox().pending_on(Topic::Page), 1);

    assert_eq!(receiver.flush(&[Topic::Page]), 1);
    assert_eq!(
        receiver.wait(&[Topic::Page], Some(Duration::ZERO)).await,
        WaitOutcome::TimedOut
    );
}

/// Per-mailbox order matches post order.
#[tokio::test]
async fn test_mailbox_is_fifo() {
    let registry = registry();
    let sender = registry.create();
    let receiver = registry.create();

    for n in 0..10 {
        sender.post_others(Event::Chat {
            from: sender.id(),
            handle: "a".to_string(),
            text: n.to_string(),
        });
    }
    for n in 0..10 {
        match receiver.wait(&[Topic::Chat], Some(Duration::ZERO)).await {
            WaitOutcome::Event(Event::Chat { text, .. }) => assert_eq!(text, n.to_string()),
            other => panic!("expected chat {n}, got {other:?}"),
        }
    }
    assert_eq!(sender.mailbox().pending(), 0);
}

/// Logging out a handled session is announced to the rest.
#[tokio::test]
async fn test_logout_is_broadcast() {
    let registry = registry();
    let watcher = registry.create();
    let leaving = registry.create();
    registry.set_handle(leaving.id(), Some("frank")).unwrap();
    registry
        .terminate(leaving.id(), doorway::bus::CloseReason::SessionTerminated)
        .unwrap();

    let mut saw_logout = false;
    while let WaitOutcome::Event(event) = watcher
        .wait(&[Topic::Login, Topic::Logout], Some(Duration::ZERO))
        .await
    {
        if matches!(event, Event::Logout { ref handle, .. } if handle == "frank") {
            saw_logout = true;
        }
    }
    assert!(saw_logout);
}
