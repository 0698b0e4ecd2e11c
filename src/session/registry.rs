//! Directory of live sessions.
//!
//! All mutations run under one write lock so the id map, the handle index
//! and every terminal's session binding change together. Lock order is
//! registry, then bus, then per-session and per-terminal locks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::session::{Session, SessionSnapshot};
use crate::bus::{CloseReason, Event, EventBus, Target, Topic};
use crate::config::SessionConfig;
use crate::ids::{SessionId, TerminalId};
use crate::terminal::Terminal;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("terminal {terminal} is already attached to session {session}")]
    AlreadyAttached {
        terminal: TerminalId,
        session: SessionId,
    },
    #[error("terminal {terminal} is not attached to session {session}")]
    NotAttached {
        terminal: TerminalId,
        session: SessionId,
    },
    #[error("session {0} is no longer available")]
    Stale(SessionId),
    #[error("terminal {0} is closed")]
    TerminalClosed(TerminalId),
}

/// Idle policy applied by [`SessionRegistry::reap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPolicy {
    /// Persistent sessions detached longer than this are removed.
    pub idle_timeout: Duration,
    /// Upper bound on detached persistent sessions kept around.
    pub max_persisted: usize,
}

impl ReapPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            max_persisted: config.max_persisted,
        }
    }
}

/// What happened to a terminal's session when the terminal went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The terminal was not attached to anything.
    Unattached,
    /// Detached; the session lives on (persistent, or other terminals remain).
    Detached(SessionId),
    /// The session was non-persistent and lost its last terminal.
    Terminated(SessionId),
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    /// Lower-cased handle to the ids carrying it.
    by_handle: HashMap<String, HashSet<SessionId>>,
}

/// Removed session plus the handle it carried, for post-lock announcements.
struct Removed {
    session: Arc<Session>,
    handle: Option<String>,
}

fn handle_key(handle: &str) -> String {
    handle.to_lowercase()
}

impl RegistryInner {
    fn get(&self, id: SessionId) -> Result<&Arc<Session>, RegistryError> {
        self.sessions.get(&id).ok_or(RegistryError::NotFound(id))
    }

    fn unindex(&mut self, id: SessionId, handle: &str) {
        let key = handle_key(handle);
        if let Some(ids) = self.by_handle.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_handle.remove(&key);
            }
        }
    }

    fn attach(&self, id: SessionId, terminal: &Arc<Terminal>) -> Result<(), RegistryError> {
        let session = self.get(id)?;
        if terminal.is_closed() {
            return Err(RegistryError::TerminalClosed(terminal.id()));
        }
        match terminal.session() {
            Some(owner) if owner == id => return Ok(()),
            Some(owner) => {
                return Err(RegistryError::AlreadyAttached {
                    terminal: terminal.id(),
                    session: owner,
                });
            }
            None => {}
        }
        terminal.bind(id, Arc::clone(session.mailbox()));
        session.add_terminal(Arc::clone(terminal));
        Ok(())
    }

    fn detach(&self, id: SessionId, terminal: TerminalId) -> Result<Arc<Terminal>, RegistryError> {
        let session = self.get(id)?;
        let removed = session
            .remove_terminal(terminal)
            .ok_or(RegistryError::NotAttached {
                terminal,
                session: id,
            })?;
        removed.unbind();
        Ok(removed)
    }

    /// Detach `terminal` from whatever it is attached to, terminating a
    /// non-persistent session left without terminals.
    fn release(&mut self, terminal: &Arc<Terminal>, bus: &EventBus) -> (DisconnectOutcome, Option<Removed>) {
        let Some(id) = terminal.session() else {
            return (DisconnectOutcome::Unattached, None);
        };
        // The session may already be gone; clear a dangling binding.
        if self.detach(id, terminal.id()).is_err() {
            terminal.unbind();
        }
        let orphaned_transient = self
            .sessions
            .get(&id)
            .is_some_and(|s| !s.is_persistent() && s.terminal_count() == 0);
        if orphaned_transient {
            let removed = self.terminate(id, CloseReason::Transport, bus);
            (DisconnectOutcome::Terminated(id), removed)
        } else {
            (DisconnectOutcome::Detached(id), None)
        }
    }

    /// Tell every attached terminal's owner the connection is going away,
    /// close the terminals, then drop the session and its mailbox.
    fn terminate(&mut self, id: SessionId, reason: CloseReason, bus: &EventBus) -> Option<Removed> {
        let session = self.sessions.get(&id).cloned()?;
        for terminal in session.take_terminals() {
            session.mailbox().push(Event::ConnectionClosed {
                terminal: terminal.id(),
                reason,
            });
            terminal.unbind();
            terminal.close(reason);
        }
        self.sessions.remove(&id);
        let handle = session.handle();
        if let Some(handle) = &handle {
            self.unindex(id, handle);
        }
        bus.close(id);
        Some(Removed { session, handle })
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    bus: EventBus,
    persistent_default: bool,
}

impl SessionRegistry {
    pub fn new(bus: EventBus, config: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            bus,
            persistent_default: config.persistent,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a fresh session with its own mailbox.
    pub fn create(&self) -> Arc<Session> {
        let mut inner = self.inner.write();
        let session = self.insert_session(&mut inner, self.persistent_default);
        tracing::info!(session = %session.id(), "Session created");
        session
    }

    /// Create a session and attach `terminal` to it in one step, so the
    /// reaper never sees it terminal-less. Nothing is registered when the
    /// terminal cannot be attached.
    pub fn create_attached(
        &self,
        terminal: &Arc<Terminal>,
        persistent: bool,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut inner = self.inner.write();
        if terminal.is_closed() {
            return Err(RegistryError::TerminalClosed(terminal.id()));
        }
        if let Some(owner) = terminal.session() {
            return Err(RegistryError::AlreadyAttached {
                terminal: terminal.id(),
                session: owner,
            });
        }
        let session = self.insert_session(&mut inner, persistent);
        inner.attach(session.id(), terminal)?;
        tracing::info!(session = %session.id(), terminal = %terminal.id(), persistent, "Session created attached");
        Ok(session)
    }

    fn insert_session(&self, inner: &mut RegistryInner, persistent: bool) -> Arc<Session> {
        let id = SessionId::new();
        let mailbox = self.bus.open(id);
        let session = Arc::new(Session::new(id, persistent, mailbox, self.bus.clone()));
        inner.sessions.insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner.read().sessions.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Attach `terminal` to session `id`. Input buffered on the terminal
    /// moves into the session's mailbox.
    pub fn attach(&self, id: SessionId, terminal: &Arc<Terminal>) -> Result<(), RegistryError> {
        let inner = self.inner.write();
        match inner.attach(id, terminal) {
            Ok(()) => {
                tracing::info!(session = %id, terminal = %terminal.id(), "Terminal attached");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session = %id, terminal = %terminal.id(), error = %e, "Attach refused");
                Err(e)
            }
        }
    }

    /// Sever the relation; neither side is destroyed.
    pub fn detach(&self, id: SessionId, terminal: TerminalId) -> Result<Arc<Terminal>, RegistryError> {
        let inner = self.inner.write();
        let removed = inner.detach(id, terminal)?;
        tracing::info!(session = %id, terminal = %terminal, "Terminal detached");
        Ok(removed)
    }

    /// Destroy session `id`. Attached terminals receive a connection-closed
    /// event and are closed before the session leaves the directory.
    pub fn terminate(&self, id: SessionId, reason: CloseReason) -> Result<(), RegistryError> {
        let removed = {
            let mut inner = self.inner.write();
            inner
                .terminate(id, reason, &self.bus)
                .ok_or(RegistryError::NotFound(id))?
        };
        self.announce_removed(removed, reason);
        Ok(())
    }

    /// Terminate every session. Returns how many were removed.
    pub fn terminate_all(&self, reason: CloseReason) -> usize {
        let removed: Vec<Removed> = {
            let mut inner = self.inner.write();
            let ids: Vec<SessionId> = inner.sessions.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| inner.terminate(id, reason, &self.bus))
                .collect()
        };
        let count = removed.len();
        for entry in removed {
            self.announce_removed(entry, reason);
        }
        count
    }

    fn announce_removed(&self, removed: Removed, reason: CloseReason) {
        let id = removed.session.id();
        tracing::info!(session = %id, ?reason, "Session terminated");
        if let Some(handle) = removed.handle {
            self.bus.broadcast(Event::Logout {
                session: id,
                handle,
            });
        }
    }

    /// Assign or clear a handle. Broadcasts `Login` to other sessions when a
    /// session receives its first handle.
    pub fn set_handle(&self, id: SessionId, handle: Option<&str>) -> Result<(), RegistryError> {
        let previous = {
            let mut inner = self.inner.write();
            let session = Arc::clone(inner.get(id)?);
            let previous = session.set_handle_locked(handle.map(str::to_string));
            if let Some(previous) = &previous {
                inner.unindex(id, previous);
            }
            if let Some(handle) = handle {
                inner
                    .by_handle
                    .entry(handle_key(handle))
                    .or_default()
                    .insert(id);
            }
            previous
        };

        if let (None, Some(handle)) = (&previous, handle) {
            tracing::info!(session = %id, handle, "Handle assigned");
            self.bus.post(
                &Target::Others(id),
                Event::Login {
                    session: id,
                    handle: handle.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Live sessions carrying `handle`, compared case-insensitively.
    pub fn lookup_by_handle(&self, handle: &str) -> Vec<Arc<Session>> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_handle.get(&handle_key(handle)) else {
            return Vec::new();
        };
        let mut found: Vec<Arc<Session>> = ids
            .iter()
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect();
        found.sort_by_key(|session| session.login_at());
        found
    }

    /// Snapshot of every live session, oldest login first.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read();
        let mut snapshots: Vec<SessionSnapshot> =
            inner.sessions.values().map(|session| session.snapshot()).collect();
        snapshots.sort_by_key(|snapshot| snapshot.login_at);
        snapshots
    }

    /// Transport-close path for `terminal`: detach it, terminate its session
    /// when that leaves a non-persistent session without terminals, then
    /// close the terminal.
    pub fn disconnect(&self, terminal: &Arc<Terminal>, reason: CloseReason) -> DisconnectOutcome {
        let (outcome, removed) = {
            let mut inner = self.inner.write();
            inner.release(terminal, &self.bus)
        };
        terminal.close(reason);
        if let Some(removed) = removed {
            self.announce_removed(removed, CloseReason::Transport);
        }
        tracing::debug!(terminal = %terminal.id(), ?outcome, "Terminal disconnected");
        outcome
    }

    /// Move a live terminal onto `target`, releasing it from its current
    /// session as [`disconnect`](Self::disconnect) would. Used by operator
    /// hijack.
    pub fn transfer(
        &self,
        terminal: &Arc<Terminal>,
        target: SessionId,
    ) -> Result<DisconnectOutcome, RegistryError> {
        let (outcome, removed) = {
            let mut inner = self.inner.write();
            inner.get(target)?;
            if terminal.is_closed() {
                return Err(RegistryError::TerminalClosed(terminal.id()));
            }
            if terminal.session() == Some(target) {
                return Err(RegistryError::AlreadyAttached {
                    terminal: terminal.id(),
                    session: target,
                });
            }
            let released = inner.release(terminal, &self.bus);
            inner.attach(target, terminal)?;
            released
        };
        tracing::info!(session = %target, terminal = %terminal.id(), "Terminal transferred");
        if let Some(removed) = removed {
            self.announce_removed(removed, CloseReason::Transport);
        }
        Ok(outcome)
    }

    /// Move `terminal` from `provisional` onto `selected` and terminate the
    /// provisional session, as one step.
    ///
    /// Fails with [`RegistryError::Stale`] when `selected` was destroyed or
    /// picked up a terminal since it was offered; nothing changes then.
    pub fn resume(
        &self,
        provisional: SessionId,
        selected: SessionId,
        terminal: &Arc<Terminal>,
    ) -> Result<(), RegistryError> {
        let removed = {
            let mut inner = self.inner.write();
            let target = match inner.sessions.get(&selected) {
                Some(session) if session.terminal_count() == 0 => Arc::clone(session),
                _ => return Err(RegistryError::Stale(selected)),
            };
            if terminal.session() != Some(provisional) {
                return Err(RegistryError::NotAttached {
                    terminal: terminal.id(),
                    session: provisional,
                });
            }

            inner.detach(provisional, terminal.id())?;
            // Leftovers from the previous connection's door chain.
            target.flush(&[Topic::Input, Topic::ConnectionClosed]);
            inner.attach(selected, terminal)?;
            inner.terminate(provisional, CloseReason::SessionTerminated, &self.bus)
        };
        tracing::info!(
            session = %selected,
            terminal = %terminal.id(),
            provisional = %provisional,
            "Session resumed"
        );
        if let Some(removed) = removed {
            self.announce_removed(removed, CloseReason::SessionTerminated);
        }
        Ok(())
    }

    /// Apply the idle policy. Returns the ids that were removed.
    pub fn reap(&self, policy: &ReapPolicy) -> Vec<SessionId> {
        let removed: Vec<Removed> = {
            let mut inner = self.inner.write();
            let mut victims: Vec<SessionId> = Vec::new();
            let mut kept: Vec<(SessionId, Duration)> = Vec::new();

            for (id, session) in &inner.sessions {
                let Some(detached_for) = session.detached_for() else {
                    continue;
                };
                if !session.is_persistent() || detached_for > policy.idle_timeout {
                    victims.push(*id);
                } else {
                    kept.push((*id, detached_for));
                }
            }

            if kept.len() > policy.max_persisted {
                kept.sort_by(|a, b| b.1.cmp(&a.1));
                let excess = kept.len() - policy.max_persisted;
                victims.extend(kept.iter().take(excess).map(|(id, _)| *id));
            }

            victims
                .into_iter()
                .filter_map(|id| inner.terminate(id, CloseReason::Operator, &self.bus))
                .collect()
        };

        let ids: Vec<SessionId> = removed.iter().map(|r| r.session.id()).collect();
        for entry in removed {
            self.announce_removed(entry, CloseReason::Operator);
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Reaped idle sessions");
        }
        ids
    }
}
