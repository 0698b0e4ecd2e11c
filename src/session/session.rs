use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};

use crate::bus::{Event, EventBus, Mailbox, Target, Topic, WaitOutcome};
use crate::ids::{SessionId, TerminalId};
use crate::terminal::{Terminal, TerminalError};

/// A logical user context. Outlives any single connection when persistent.
///
/// Handle and terminal membership are owned by the registry; everything
/// else may be changed by the door program running against the session.
pub struct Session {
    id: SessionId,
    handle: RwLock<Option<String>>,
    activity: RwLock<String>,
    persistent: AtomicBool,
    operator: AtomicBool,
    encoding: RwLock<Option<String>>,
    login_at: SystemTime,
    detached_since: Mutex<Option<Instant>>,
    terminals: Mutex<Vec<Arc<Terminal>>>,
    mailbox: Arc<Mailbox>,
    bus: EventBus,
}

impl Session {
    pub(crate) fn new(id: SessionId, persistent: bool, mailbox: Arc<Mailbox>, bus: EventBus) -> Self {
        Self {
            id,
            handle: RwLock::new(None),
            activity: RwLock::new(String::new()),
            persistent: AtomicBool::new(persistent),
            operator: AtomicBool::new(false),
            encoding: RwLock::new(None),
            login_at: SystemTime::now(),
            detached_since: Mutex::new(Some(Instant::now())),
            terminals: Mutex::new(Vec::new()),
            mailbox,
            bus,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handle(&self) -> Option<String> {
        self.handle.read().clone()
    }

    pub fn activity(&self) -> String {
        self.activity.read().clone()
    }

    /// Free-form status shown in who lists ("reading mail", "in chat").
    pub fn set_activity(&self, activity: impl Into<String>) {
        *self.activity.write() = activity.into();
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::SeqCst)
    }

    pub fn set_persistent(&self, persistent: bool) {
        self.persistent.store(persistent, Ordering::SeqCst);
    }

    pub fn is_operator(&self) -> bool {
        self.operator.load(Ordering::SeqCst)
    }

    pub fn set_operator(&self, operator: bool) {
        self.operator.store(operator, Ordering::SeqCst);
    }

    pub fn encoding(&self) -> Option<String> {
        self.encoding.read().clone()
    }

    /// Set the session's output encoding and apply it to every attached
    /// terminal. Terminals attached later pick it up at attach time.
    pub fn set_encoding(&self, encoding: &str) {
        *self.encoding.write() = Some(encoding.to_string());
        for terminal in self.terminals() {
            terminal.set_encoding(encoding);
        }
    }

    pub fn login_at(&self) -> SystemTime {
        self.login_at
    }

    /// How long the session has had no terminals, if it has none.
    pub fn detached_for(&self) -> Option<Duration> {
        self.detached_since.lock().map(|since| since.elapsed())
    }

    pub fn terminals(&self) -> Vec<Arc<Terminal>> {
        self.terminals.lock().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.lock().len()
    }

    pub fn has_terminal(&self, terminal: TerminalId) -> bool {
        self.terminals.lock().iter().any(|t| t.id() == terminal)
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    // -- Bus shortcuts -------------------------------------------------------

    pub async fn wait(&self, topics: &[Topic], timeout: Option<Duration>) -> WaitOutcome {
        self.mailbox.wait(topics, timeout).await
    }

    pub fn flush(&self, topics: &[Topic]) -> usize {
        self.mailbox.flush(topics)
    }

    pub fn post(&self, target: &Target, event: Event) -> usize {
        self.bus.post(target, event)
    }

    /// Post to every other live session.
    pub fn post_others(&self, event: Event) -> usize {
        self.bus.post(&Target::Others(self.id), event)
    }

    // -- Output --------------------------------------------------------------

    /// Write text to every attached terminal. Terminals that fail are left
    /// for the registry to reap through their connection task.
    pub async fn write_text(&self, text: &str) -> Result<(), TerminalError> {
        let terminals = self.terminals();
        if terminals.is_empty() {
            return Err(TerminalError::Closed);
        }
        let mut delivered = false;
        for terminal in terminals {
            match terminal.write_text(text).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    tracing::debug!(session = %self.id, terminal = %terminal.id(), error = %e, "Session write failed");
                }
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(TerminalError::Closed)
        }
    }

    // -- Registry-only mutation ----------------------------------------------

    pub(crate) fn set_handle_locked(&self, handle: Option<String>) -> Option<String> {
        std::mem::replace(&mut *self.handle.write(), handle)
    }

    pub(crate) fn add_terminal(&self, terminal: Arc<Terminal>) {
        if let Some(encoding) = self.encoding() {
            terminal.set_encoding(&encoding);
        }
        self.terminals.lock().push(terminal);
        *self.detached_since.lock() = None;
    }

    pub(crate) fn remove_terminal(&self, terminal: TerminalId) -> Option<Arc<Terminal>> {
        let mut terminals = self.terminals.lock();
        let index = terminals.iter().position(|t| t.id() == terminal)?;
        let removed = terminals.remove(index);
        if terminals.is_empty() {
            *self.detached_since.lock() = Some(Instant::now());
        }
        Some(removed)
    }

    pub(crate) fn take_terminals(&self) -> Vec<Arc<Terminal>> {
        let drained = std::mem::take(&mut *self.terminals.lock());
        *self.detached_since.lock() = Some(Instant::now());
        drained
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let terminals = self.terminals.lock();
        SessionSnapshot {
            id: self.id,
            handle: self.handle(),
            activity: self.activity(),
            persistent: self.is_persistent(),
            operator: self.is_operator(),
            login_at: self.login_at,
            terminals: terminals.iter().map(|t| t.id()).collect(),
            detached_for: self.detached_for(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handle", &self.handle())
            .field("terminals", &self.terminal_count())
            .finish_non_exhaustive()
    }
}

/// Copy of a session's state taken under the registry lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub handle: Option<String>,
    pub activity: String,
    pub persistent: bool,
    pub operator: bool,
    pub login_at: SystemTime,
    pub terminals: Vec<TerminalId>,
    pub detached_for: Option<Duration>,
}

impl SessionSnapshot {
    pub fn is_detached(&self) -> bool {
        self.terminals.is_empty()
    }
}
