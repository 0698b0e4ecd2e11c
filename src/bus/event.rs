use crate::ids::{SessionId, TerminalId};

/// Topic tag of an [`Event`]. Waiters select on a set of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Raw bytes typed at an attached terminal.
    Input,
    /// A terminal attached to this session went away.
    ConnectionClosed,
    /// Redraw request, typically after another session changed shared state.
    Refresh,
    /// Public chat line.
    Chat,
    /// Private message addressed to this session.
    Page,
    /// A handle logged in.
    Login,
    /// A handled session ended.
    Logout,
}

/// Why a terminal was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport reported EOF or an I/O error.
    Transport,
    /// The owning session was terminated.
    SessionTerminated,
    /// An operator killed or disconnected the connection.
    Operator,
    /// Server shutdown.
    Shutdown,
}

/// A message on the bus. The variant determines the topic, so consumers
/// match on it instead of inspecting an untyped payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Input {
        terminal: TerminalId,
        data: Vec<u8>,
    },
    ConnectionClosed {
        terminal: TerminalId,
        reason: CloseReason,
    },
    Refresh,
    Chat {
        from: SessionId,
        handle: String,
        text: String,
    },
    Page {
        from: SessionId,
        handle: String,
        text: String,
    },
    Login {
        session: SessionId,
        handle: String,
    },
    Logout {
        session: SessionId,
        handle: String,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Input { .. } => Topic::Input,
            Event::ConnectionClosed { .. } => Topic::ConnectionClosed,
            Event::Refresh => Topic::Refresh,
            Event::Chat { .. } => Topic::Chat,
            Event::Page { .. } => Topic::Page,
            Event::Login { .. } => Topic::Login,
            Event::Logout { .. } => Topic::Logout,
        }
    }
}

/// Delivery target of a posted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every live session.
    Broadcast,
    /// Every live session except the given one (usually the sender).
    Others(SessionId),
    /// An explicit set of sessions. Unknown ids are skipped.
    Sessions(Vec<SessionId>),
}

impl Target {
    pub fn session(id: SessionId) -> Self {
        Target::Sessions(vec![id])
    }
}
