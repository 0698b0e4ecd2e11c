//! Capability detection for terminals that did not negotiate their size.
//!
//! A prober writes each dialect's query and waits for a reply shaped like
//! that dialect's answer. Chatter around the reply is tolerated; bytes that
//! follow a matched reply are pushed back so the user's first keystrokes
//! are not lost.

use std::sync::OnceLock;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::time::Instant;

use super::caps::UNKNOWN_TERM_TYPE;
use super::handle::{Terminal, TerminalError};
use crate::config::TerminalConfig;

const MAX_DIMENSION: u16 = 999;
/// Cap on bytes collected while waiting for one reply.
const MAX_REPLY_BUFFER: usize = 1024;

/// A query/reply pair understood by some family of terminals.
#[derive(Debug, Clone)]
pub struct ProbeDialect {
    pub name: &'static str,
    pub query: &'static [u8],
    /// Must capture rows then cols.
    pub reply: Regex,
    pub term_type: &'static str,
}

impl ProbeDialect {
    /// Cursor-position report after parking the cursor at the far corner.
    pub fn vt100() -> Self {
        static REPLY: OnceLock<Regex> = OnceLock::new();
        Self {
            name: "vt100",
            query: b"\x1b7\x1b[999;999H\x1b[6n\x1b8",
            reply: REPLY
                .get_or_init(|| compiled(r"(?-u)\x1b\[(\d{1,4});(\d{1,4})R"))
                .clone(),
            term_type: "vt100",
        }
    }

    /// xterm window-size report (`CSI 18 t`).
    pub fn xterm() -> Self {
        static REPLY: OnceLock<Regex> = OnceLock::new();
        Self {
            name: "xterm",
            query: b"\x1b[18t",
            reply: REPLY
                .get_or_init(|| compiled(r"(?-u)\x1b\[8;(\d{1,4});(\d{1,4})t"))
                .clone(),
            term_type: "xterm",
        }
    }

    /// Parse rows and cols from the first reply in `buffer`.
    ///
    /// Returns the size and the byte offset just past the reply. Replies
    /// with out-of-range dimensions do not count as a match.
    fn parse(&self, buffer: &[u8]) -> Option<(u16, u16, usize)> {
        for caps in self.reply.captures_iter(buffer) {
            let whole = caps.get(0)?;
            let rows = dimension(caps.get(1)?.as_bytes());
            let cols = dimension(caps.get(2)?.as_bytes());
            if let (Some(rows), Some(cols)) = (rows, cols) {
                return Some((rows, cols, whole.end()));
            }
        }
        None
    }
}

// Patterns are literals covered by the unit tests below.
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).expect("probe reply pattern must compile")
}

fn dimension(digits: &[u8]) -> Option<u16> {
    let value: u16 = std::str::from_utf8(digits).ok()?.parse().ok()?;
    (1..=MAX_DIMENSION).contains(&value).then_some(value)
}

/// What [`CapabilityProber::detect`] concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The transport had already supplied capabilities; nothing was sent.
    AlreadyKnown,
    Detected { dialect: &'static str },
    /// No dialect answered in time; configured defaults were applied.
    Defaulted,
}

#[derive(Debug, Clone)]
pub struct CapabilityProber {
    dialects: Vec<ProbeDialect>,
    timeout: Duration,
    default_rows: u16,
    default_cols: u16,
}

impl CapabilityProber {
    pub fn new(config: &TerminalConfig) -> Self {
        Self::with_dialects(config, vec![ProbeDialect::vt100(), ProbeDialect::xterm()])
    }

    pub fn with_dialects(config: &TerminalConfig, dialects: Vec<ProbeDialect>) -> Self {
        Self {
            dialects,
            timeout: config.probe_timeout(),
            default_rows: config.default_rows,
            default_cols: config.default_cols,
        }
    }

    /// Fill in `terminal`'s size and type.
    ///
    /// Fails only when the connection closes mid-probe. A silent or
    /// garbled client gets the configured defaults.
    pub async fn detect(&self, terminal: &Terminal) -> Result<ProbeOutcome, TerminalError> {
        if terminal.capabilities().negotiated {
            return Ok(ProbeOutcome::AlreadyKnown);
        }

        for dialect in &self.dialects {
            terminal.write(dialect.query).await?;
            if let Some((rows, cols)) = self.await_reply(terminal, dialect).await? {
                let mut caps = terminal.capabilities();
                caps.rows = rows;
                caps.cols = cols;
                caps.term_type = dialect.term_type.to_string();
                caps.negotiated = true;
                terminal.set_capabilities(caps);
                tracing::debug!(
                    terminal = %terminal.id(),
                    dialect = dialect.name,
                    rows,
                    cols,
                    "Terminal probe matched"
                );
                return Ok(ProbeOutcome::Detected {
                    dialect: dialect.name,
                });
            }
        }

        let mut caps = terminal.capabilities();
        caps.rows = self.default_rows;
        caps.cols = self.default_cols;
        caps.term_type = UNKNOWN_TERM_TYPE.to_string();
        terminal.set_capabilities(caps);
        tracing::debug!(terminal = %terminal.id(), "Terminal probe unanswered, using defaults");
        Ok(ProbeOutcome::Defaulted)
    }

    async fn await_reply(
        &self,
        terminal: &Terminal,
        dialect: &ProbeDialect,
    ) -> Result<Option<(u16, u16)>, TerminalError> {
        let deadline = Instant::now() + self.timeout;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(chunk) = terminal.read_raw(remaining).await? else {
                break;
            };
            buffer.extend_from_slice(&chunk);

            if let Some((rows, cols, end)) = dialect.parse(&buffer) {
                terminal.unread(&buffer[end..]);
                return Ok(Some((rows, cols)));
            }
            if buffer.len() > MAX_REPLY_BUFFER {
                let excess = buffer.len() - MAX_REPLY_BUFFER;
                buffer.drain(..excess);
            }
        }

        // Unmatched bytes are line noise or a garbled reply, not user input.
        if !buffer.is_empty() {
            tracing::trace!(terminal = %terminal.id(), discarded = buffer.len(), "Dropped probe chatter");
        }
        Ok(None)
    }
}
