//! Operator actions issued from one connection against another session.

use std::sync::Arc;

use crate::bus::CloseReason;
use crate::ids::SessionId;
use crate::session::{RegistryError, Session, SessionRegistry};
use crate::terminal::{Terminal, TerminalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    /// Terminate the session and close its terminals.
    Kill(SessionId),
    /// Close the session's terminals; a persistent session survives detached.
    Disconnect(SessionId),
    /// Move the operator's own terminal onto the session.
    Hijack(SessionId),
    /// Mirror the session's first terminal to the operator's terminal.
    Spy(SessionId),
    Unspy,
}

/// Result of an operator action. None of these are errors for the caller;
/// they are reported back to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Done,
    PermissionDenied,
    NotFound,
    /// The action makes no sense in the current state (targeting yourself,
    /// spying on a detached session, unspy while not spying).
    Conflict,
}

#[derive(Clone)]
pub struct OperatorConsole {
    registry: SessionRegistry,
}

impl OperatorConsole {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Perform `action` on behalf of `actor`, typing at `terminal`.
    pub fn perform(&self, actor: &Session, terminal: &Arc<Terminal>, action: OperatorAction) -> ActionStatus {
        if !actor.is_operator() {
            tracing::warn!(session = %actor.id(), ?action, "Operator action denied");
            return ActionStatus::PermissionDenied;
        }

        let status = match action {
            OperatorAction::Kill(target) => self.kill(actor, target),
            OperatorAction::Disconnect(target) => self.disconnect(target),
            OperatorAction::Hijack(target) => self.hijack(actor, terminal, target),
            OperatorAction::Spy(target) => self.spy(actor, terminal, target),
            OperatorAction::Unspy => match terminal.end_spy() {
                Some(_) => ActionStatus::Done,
                None => ActionStatus::Conflict,
            },
        };
        tracing::info!(operator = %actor.id(), ?action, ?status, "Operator action");
        status
    }

    fn kill(&self, actor: &Session, target: SessionId) -> ActionStatus {
        if target == actor.id() {
            return ActionStatus::Conflict;
        }
        match self.registry.terminate(target, CloseReason::Operator) {
            Ok(()) => ActionStatus::Done,
            Err(_) => ActionStatus::NotFound,
        }
    }

    fn disconnect(&self, target: SessionId) -> ActionStatus {
        let Some(session) = self.registry.get(target) else {
            return ActionStatus::NotFound;
        };
        for terminal in session.terminals() {
            self.registry.disconnect(&terminal, CloseReason::Operator);
        }
        ActionStatus::Done
    }

    fn hijack(&self, actor: &Session, terminal: &Arc<Terminal>, target: SessionId) -> ActionStatus {
        if target == actor.id() {
            return ActionStatus::Conflict;
        }
        match self.registry.transfer(terminal, target) {
            Ok(_) => ActionStatus::Done,
            Err(RegistryError::NotFound(_)) => ActionStatus::NotFound,
            Err(_) => ActionStatus::Conflict,
        }
    }

    fn spy(&self, actor: &Session, terminal: &Arc<Terminal>, target: SessionId) -> ActionStatus {
        if target == actor.id() {
            return ActionStatus::Conflict;
        }
        let Some(session) = self.registry.get(target) else {
            return ActionStatus::NotFound;
        };
        let Some(observed) = session.terminals().into_iter().next() else {
            return ActionStatus::Conflict;
        };
        match terminal.begin_spy(&observed) {
            Ok(()) => ActionStatus::Done,
            Err(TerminalError::Closed) => ActionStatus::NotFound,
            Err(_) => ActionStatus::Conflict,
        }
    }
}
