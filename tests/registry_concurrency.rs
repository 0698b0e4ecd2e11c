mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{local_terminal, registry, spy_terminal};
use doorway::bus::{CloseReason, Event, Topic, WaitOutcome};
use doorway::session::RegistryError;
use proptest::prelude::*;

const SESSIONS: usize = 4;

#[derive(Debug, Clone, Copy)]
enum Op {
    Attach(usize),
    Detach(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SESSIONS).prop_map(Op::Attach),
        (0..SESSIONS).prop_map(Op::Detach),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// However attach and detach interleave across threads, one terminal
    /// never shows up in two sessions.
    #[test]
    fn terminal_never_has_two_owners(
        scripts in prop::collection::vec(prop::collection::vec(op(), 1..30), 2..5)
    ) {
        let registry = registry();
        let sessions: Vec<_> = (0..SESSIONS).map(|_| registry.create()).collect();
        let terminal = local_terminal();

        let workers: Vec<_> = scripts
            .into_iter()
            .map(|script| {
                let registry = registry.clone();
                let ids: Vec<_> = sessions.iter().map(|s| s.id()).collect();
                let terminal = Arc::clone(&terminal);
                thread::spawn(move || {
                    for op in script {
                        match op {
                            Op::Attach(i) => match registry.attach(ids[i], &terminal) {
                                Ok(()) | Err(RegistryError::AlreadyAttached { .. }) => {}
                                Err(e) => panic!("unexpected attach error: {e}"),
                            },
                            Op::Detach(i) => {
                                let _ = registry.detach(ids[i], terminal.id());
                            }
                        }
                        let owners = registry
                            .list()
                            .iter()
                            .filter(|s| s.terminals.contains(&terminal.id()))
                            .count();
                        assert!(owners <= 1, "terminal owned by {owners} sessions");
                    }
                })
            })
            .collect();

        for worker in workers {
            prop_assert!(worker.join().is_ok());
        }

        let owners: Vec<_> = sessions.iter().filter(|s| s.has_terminal(terminal.id())).collect();
        prop_assert!(owners.len() <= 1);
        prop_assert_eq!(owners.first().map(|s| s.id()), terminal.session());
    }
}

/// Terminating a session with two terminals tells both before the session
/// disappears from the directory.
#[tokio::test]
async fn test_terminate_reaches_every_terminal() {
    let registry = registry();
    let session = registry.create();
    let first = local_terminal();
    let second = local_terminal();
    registry.attach(session.id(), &first).unwrap();
    registry.attach(session.id(), &second).unwrap();

    registry.terminate(session.id(), CloseReason::Operator).unwrap();
    assert!(registry.list().iter().all(|s| s.id != session.id()));

    let mut closed = Vec::new();
    for _ in 0..2 {
        match session.wait(&[Topic::ConnectionClosed], Some(Duration::ZERO)).await {
            WaitOutcome::Event(Event::ConnectionClosed { terminal, reason }) => {
                assert_eq!(reason, CloseReason::Operator);
                closed.push(terminal);
            }
            other => panic!("expected ConnectionClosed, got {other:?}"),
        }
    }
    closed.sort();
    let mut expected = vec![first.id(), second.id()];
    expected.sort();
    assert_eq!(closed, expected);
    assert!(first.is_closed() && second.is_closed());
    assert_eq!(
        session.wait(&[Topic::ConnectionClosed], None).await,
        WaitOutcome::Terminated
    );
}

/// A waiter parked on the session sees termination as Terminated, not an error
/// and not a hang.
#[tokio::test]
async fn test_terminate_from_another_task_wakes_owner() {
    let registry = registry();
    let session = registry.create();

    let owner = {
        let session = session.clone();
        tokio::spawn(async move { session.wait(&[Topic::Chat], None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.terminate(session.id(), CloseReason::Operator).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), owner)
        .await
        .expect("owner should wake")
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Terminated);
}

/// Listing while other threads churn sessions never sees a half-built entry.
#[test]
fn test_list_snapshots_are_consistent_under_churn() {
    let registry = registry();
    let churners: Vec<_> = (0..4)
        .map(|n| {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let session = registry.create();
                    let terminal = local_terminal();
                    registry.attach(session.id(), &terminal).unwrap();
                    let handle = format!("user{n}_{i}");
                    registry.set_handle(session.id(), Some(handle.as_str())).unwrap();
                    registry.terminate(session.id(), CloseReason::Operator).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..200 {
        for snapshot in registry.list() {
            if let Some(handle) = &snapshot.handle {
                let found = registry.lookup_by_handle(handle);
                assert!(found.len() <= 1);
            }
        }
    }
    for churner in churners {
        churner.join().unwrap();
    }
    assert!(registry.is_empty());
}

/// Session output reaches every attached terminal and its spies.
#[tokio::test]
async fn test_session_output_fans_out() {
    let registry = registry();
    let session = registry.create();
    let (first, first_out) = spy_terminal();
    let (second, second_out) = spy_terminal();
    let (observer, observer_out) = spy_terminal();
    registry.attach(session.id(), &first).unwrap();
    registry.attach(session.id(), &second).unwrap();
    observer.begin_spy(&first).unwrap();

    session.write_text("hello\r\n").await.unwrap();
    assert_eq!(first_out.lock().as_slice(), b"hello\r\n");
    assert_eq!(second_out.lock().as_slice(), b"hello\r\n");
    assert_eq!(observer_out.lock().as_slice(), b"hello\r\n");
}

/// An encoding set on the session applies to terminals attached later.
#[tokio::test]
async fn test_encoding_propagates_to_terminals() {
    let registry = registry();
    let session = registry.create();
    session.set_encoding("ascii");
    let (terminal, out) = spy_terminal();
    registry.attach(session.id(), &terminal).unwrap();

    assert_eq!(terminal.capabilities().encoding, "ascii");
    session.write_text("caf\u{e9}").await.unwrap();
    assert_eq!(out.lock().as_slice(), b"caf?");
}
