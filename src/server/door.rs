//! Seams between the connection pipeline and the programs it runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::operator::OperatorConsole;
use crate::session::{InputReader, RegistryError, Session, SessionRegistry};
use crate::terminal::{Terminal, TerminalError};

const MAX_HANDLE_LEN: usize = 24;
const LOGIN_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DoorError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// What the connection does after a door returns.
pub enum DoorExit {
    /// Run another door.
    Next(Arc<dyn Door>),
    /// Run the same door again, against whatever session the terminal is
    /// attached to now.
    Restart,
    /// Drop the connection. The session persists if flagged persistent.
    Disconnect,
    /// End the session.
    Logoff,
}

impl std::fmt::Debug for DoorExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoorExit::Next(door) => f.debug_tuple("Next").field(&door.name()).finish(),
            DoorExit::Restart => f.write_str("Restart"),
            DoorExit::Disconnect => f.write_str("Disconnect"),
            DoorExit::Logoff => f.write_str("Logoff"),
        }
    }
}

/// Everything a door may touch while it runs.
pub struct DoorContext<'a> {
    pub session: Arc<Session>,
    pub terminal: Arc<Terminal>,
    pub input: &'a mut InputReader,
    pub registry: SessionRegistry,
    pub console: OperatorConsole,
    /// Prompts give up after this long without input.
    pub idle_timeout: Duration,
}

/// An application module run against an attached session.
#[async_trait]
pub trait Door: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut DoorContext<'_>) -> Result<DoorExit, DoorError>;
}

/// Who the user turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub handle: String,
    pub operator: bool,
}

/// Establishes a handle for a connection sitting on its provisional session.
///
/// `Ok(None)` means the user gave up or failed; the connection is dropped.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        session: &Session,
        input: &mut InputReader,
        idle_timeout: Duration,
    ) -> Result<Option<Identity>, DoorError>;
}

/// Guest-style login: any well-formed handle is accepted. Handles listed as
/// operators get the operator flag.
#[derive(Debug, Clone, Default)]
pub struct OpenAuthenticator {
    operators: Vec<String>,
}

impl OpenAuthenticator {
    pub fn new(operators: &[String]) -> Self {
        Self {
            operators: operators.iter().map(|h| h.to_lowercase()).collect(),
        }
    }

    fn valid_handle(handle: &str) -> bool {
        !handle.is_empty()
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

#[async_trait]
impl Authenticator for OpenAuthenticator {
    async fn authenticate(
        &self,
        session: &Session,
        input: &mut InputReader,
        idle_timeout: Duration,
    ) -> Result<Option<Identity>, DoorError> {
        for _ in 0..LOGIN_ATTEMPTS {
            session.write_text("Handle: ").await?;
            let Some(line) = input.read_line(session, MAX_HANDLE_LEN, Some(idle_timeout)).await? else {
                session.write_text("\r\nLogin timed out.\r\n").await?;
                return Ok(None);
            };
            let handle = line.trim();
            if Self::valid_handle(handle) {
                let operator = self.operators.contains(&handle.to_lowercase());
                return Ok(Some(Identity {
                    handle: handle.to_string(),
                    operator,
                }));
            }
            session
                .write_text("Handles use letters, digits, '-' and '_'.\r\n")
                .await?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_validation() {
        assert!(OpenAuthenticator::valid_handle("sysop_1"));
        assert!(!OpenAuthenticator::valid_handle(""));
        assert!(!OpenAuthenticator::valid_handle("two words"));
    }
}
