use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::event::{Event, Topic};
use crate::ids::SessionId;

/// Result of [`Mailbox::wait`]. Timing out is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Event(Event),
    TimedOut,
    /// The mailbox was closed (session terminated) and holds no matching event.
    Terminated,
}

impl WaitOutcome {
    pub fn into_event(self) -> Option<Event> {
        match self {
            WaitOutcome::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Per-session FIFO of undelivered events.
pub struct Mailbox {
    owner: SessionId,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: AtomicBool,
    warn_depth: usize,
}

impl Mailbox {
    pub fn new(owner: SessionId, warn_depth: usize) -> Self {
        Self {
            owner,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            warn_depth,
        }
    }

    pub fn owner(&self) -> SessionId {
        self.owner
    }

    /// Enqueue an event. Returns false when the mailbox is already closed.
    pub fn push(&self, event: Event) -> bool {
        {
            let mut queue = self.queue.lock();
            // Checked under the queue lock so a concurrent close() cannot
            // strand an event behind a Terminated waiter.
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            queue.push_back(event);
            let depth = queue.len();
            if self.warn_depth > 0 && depth == self.warn_depth {
                tracing::warn!(session = %self.owner, depth, "Mailbox backlog reached warning depth");
            }
        }
        self.notify.notify_waiters();
        true
    }

    /// Wait until an event on one of `topics` is available and dequeue it.
    ///
    /// `None` waits without a deadline. Events on other topics stay queued
    /// in their original order.
    pub async fn wait(&self, topics: &[Topic], timeout: Option<Duration>) -> WaitOutcome {
        self.wait_matching(topics, timeout, |_| true).await
    }

    /// Like [`wait`](Self::wait), but only events on `topics` that `accept`
    /// also approves are dequeued. Everything else stays queued.
    pub async fn wait_matching<F>(&self, topics: &[Topic], timeout: Option<Duration>, accept: F) -> WaitOutcome
    where
        F: Fn(&Event) -> bool,
    {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            // Register interest before inspecting the queue: a push landing
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.take_matching(topics, &accept) {
                return WaitOutcome::Event(event);
            }
            if self.is_closed() {
                return WaitOutcome::Terminated;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return match self.take_matching(topics, &accept) {
                            Some(event) => WaitOutcome::Event(event),
                            None => WaitOutcome::TimedOut,
                        };
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Dequeue the oldest event on one of `topics` without waiting.
    pub fn take(&self, topics: &[Topic]) -> Option<Event> {
        self.take_matching(topics, |_| true)
    }

    /// Dequeue the oldest event on one of `topics` that `accept` approves.
    pub fn take_matching<F>(&self, topics: &[Topic], accept: F) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let mut queue = self.queue.lock();
        let index = queue
            .iter()
            .position(|event| topics.contains(&event.topic()) && accept(event))?;
        queue.remove(index)
    }

    /// Discard pending events on `topics`. Returns how many were dropped.
    pub fn flush(&self, topics: &[Topic]) -> usize {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|event| !topics.contains(&event.topic()));
        before - queue.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn pending_on(&self, topic: Topic) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|event| event.topic() == topic)
            .count()
    }

    /// Refuse further events and wake every waiter. Queued events stay
    /// readable so a final ConnectionClosed is still observed.
    pub fn close(&self) {
        {
            let _queue = self.queue.lock();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
