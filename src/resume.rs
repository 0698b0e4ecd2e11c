//! Login-time reattachment to a detached session.
//!
//! After authentication the connection sits on a provisional session. If
//! the user has detached sessions under the same handle they are offered,
//! most recently detached first, alongside a "start new" option. Taking an
//! existing session moves the terminal onto it and drops the provisional.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::ids::SessionId;
use crate::session::{RegistryError, SessionRegistry, SessionSnapshot};
use crate::terminal::Terminal;

/// One entry of the resume menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeChoice {
    Existing(SessionSnapshot),
    StartNew,
}

/// Presents resume choices to the user.
///
/// Returning `None` means the user gave no usable answer; the negotiator
/// then applies its default just as it does on timeout.
#[async_trait]
pub trait ResumeChooser: Send {
    async fn choose(&mut self, choices: &[ResumeChoice]) -> Option<ResumeChoice>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The terminal now belongs to this pre-existing session.
    Resumed(SessionId),
    /// The provisional session was kept.
    Fresh(SessionId),
}

impl ResumeOutcome {
    pub fn session_id(&self) -> SessionId {
        match self {
            ResumeOutcome::Resumed(id) | ResumeOutcome::Fresh(id) => *id,
        }
    }
}

#[derive(Clone)]
pub struct ResumeNegotiator {
    registry: SessionRegistry,
    timeout: Duration,
    max_resumable: usize,
}

impl ResumeNegotiator {
    pub fn new(registry: SessionRegistry, config: &SessionConfig) -> Self {
        Self {
            registry,
            timeout: config.resume_timeout(),
            max_resumable: config.max_resumable,
        }
    }

    /// Detached sessions under `handle`, most recently detached first.
    pub fn resumable(&self, handle: &str, exclude: Option<SessionId>) -> Vec<SessionSnapshot> {
        let mut candidates: Vec<SessionSnapshot> = self
            .registry
            .lookup_by_handle(handle)
            .iter()
            .filter(|session| Some(session.id()) != exclude)
            .map(|session| session.snapshot())
            .filter(SessionSnapshot::is_detached)
            .collect();
        candidates.sort_by_key(|snapshot| snapshot.detached_for);
        candidates
    }

    /// The menu offered for `candidates`. "Start new" is only offered while
    /// the user is within the resumable-session limit.
    pub fn choices(&self, candidates: Vec<SessionSnapshot>) -> Vec<ResumeChoice> {
        let offer_new = candidates.len() <= self.max_resumable;
        let mut choices: Vec<ResumeChoice> =
            candidates.into_iter().map(ResumeChoice::Existing).collect();
        if offer_new {
            choices.push(ResumeChoice::StartNew);
        }
        choices
    }

    /// Route `terminal` for the freshly authenticated `handle`.
    ///
    /// The terminal's current session is the provisional one. If it has
    /// none, a non-persistent session is created attached to it; the caller
    /// decides persistence once the outcome is known.
    pub async fn negotiate(
        &self,
        handle: &str,
        terminal: &Arc<Terminal>,
        chooser: &mut dyn ResumeChooser,
    ) -> Result<ResumeOutcome, RegistryError> {
        let provisional = match terminal.session() {
            Some(id) => id,
            None => self.registry.create_attached(terminal, false)?.id(),
        };

        let candidates = self.resumable(handle, Some(provisional));
        if candidates.is_empty() {
            return self.start_new(provisional, handle);
        }

        let choices = self.choices(candidates);
        let picked = match tokio::time::timeout(self.timeout, chooser.choose(&choices)).await {
            Ok(Some(choice)) => choice,
            Ok(None) | Err(_) => {
                tracing::debug!(handle, "Resume choice not made, applying default");
                Self::default_choice(&choices)
            }
        };

        match picked {
            ResumeChoice::StartNew => self.start_new(provisional, handle),
            ResumeChoice::Existing(snapshot) => {
                match self.registry.resume(provisional, snapshot.id, terminal) {
                    Ok(()) => Ok(ResumeOutcome::Resumed(snapshot.id)),
                    Err(RegistryError::Stale(stale)) => {
                        tracing::warn!(session = %stale, handle, "Selected session vanished, starting new");
                        self.start_new(provisional, handle)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn start_new(&self, provisional: SessionId, handle: &str) -> Result<ResumeOutcome, RegistryError> {
        self.registry.set_handle(provisional, Some(handle))?;
        Ok(ResumeOutcome::Fresh(provisional))
    }

    /// "Start new" when offered, otherwise the most recently detached session.
    fn default_choice(choices: &[ResumeChoice]) -> ResumeChoice {
        if choices.contains(&ResumeChoice::StartNew) {
            return ResumeChoice::StartNew;
        }
        choices.first().cloned().unwrap_or(ResumeChoice::StartNew)
    }
}
