//! Keyboard helpers for door programs.
//!
//! Input reaches a session as `Input` events from any attached terminal,
//! so a hijacking operator types into the same stream. Only the reader's
//! own terminal closing ends a read; hang-ups of the other terminals are
//! left queued for their own readers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::session::Session;
use crate::bus::{Event, Topic, WaitOutcome};
use crate::terminal::{Terminal, TerminalError};

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Outcome of [`InputReader::read_line_or`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Line(String),
    /// An event on one of the interrupt topics arrived first. The partial
    /// line is kept for the next call.
    Event(Event),
    TimedOut,
}

enum Fill {
    Data,
    Event(Event),
    TimedOut,
}

/// Buffered reader over one connection's view of a session's input.
#[derive(Debug)]
pub struct InputReader {
    terminal: Arc<Terminal>,
    pending: VecDeque<u8>,
    after_cr: bool,
    line: String,
}

impl InputReader {
    pub fn new(terminal: Arc<Terminal>) -> Self {
        Self {
            terminal,
            pending: VecDeque::new(),
            after_cr: false,
            line: String::new(),
        }
    }

    pub fn terminal(&self) -> &Arc<Terminal> {
        &self.terminal
    }

    /// Characters typed so far on an unfinished line.
    pub fn partial_line(&self) -> &str {
        &self.line
    }

    /// Next raw byte. `Ok(None)` on timeout. Telnet line endings (`CR LF`,
    /// `CR NUL`) arrive as a single `\r`.
    pub async fn read_key(
        &mut self,
        session: &Session,
        timeout: Option<Duration>,
    ) -> Result<Option<u8>, TerminalError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(byte) = self.next_byte() {
                return Ok(Some(byte));
            }
            match self.fill(session, &[], remaining(deadline)).await? {
                Fill::Data => {}
                Fill::Event(_) | Fill::TimedOut => return Ok(None),
            }
        }
    }

    /// Read one line with echo and backspace editing, at most `max_len`
    /// characters. `Ok(None)` when no line is finished within `timeout`;
    /// what was typed stays buffered.
    pub async fn read_line(
        &mut self,
        session: &Session,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, TerminalError> {
        match self.read_line_or(session, max_len, &[], timeout).await? {
            LineRead::Line(line) => Ok(Some(line)),
            LineRead::Event(_) | LineRead::TimedOut => Ok(None),
        }
    }

    /// Like [`read_line`](Self::read_line), but returns early with the
    /// first event on one of `interrupts` so a door can show chat or
    /// notices while the user is typing.
    pub async fn read_line_or(
        &mut self,
        session: &Session,
        max_len: usize,
        interrupts: &[Topic],
        timeout: Option<Duration>,
    ) -> Result<LineRead, TerminalError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            while let Some(key) = self.next_byte() {
                match key {
                    CR | LF => {
                        session.write_text("\r\n").await?;
                        return Ok(LineRead::Line(std::mem::take(&mut self.line)));
                    }
                    BACKSPACE | DELETE => {
                        if self.line.pop().is_some() {
                            session.write_text("\x08 \x08").await?;
                        }
                    }
                    0x20..=0x7e if self.line.len() < max_len => {
                        let c = char::from(key);
                        self.line.push(c);
                        session.write_text(c.encode_utf8(&mut [0u8; 4])).await?;
                    }
                    _ => {}
                }
            }
            match self.fill(session, interrupts, remaining(deadline)).await? {
                Fill::Data => {}
                Fill::Event(event) => return Ok(LineRead::Event(event)),
                Fill::TimedOut => return Ok(LineRead::TimedOut),
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        while let Some(byte) = self.pending.pop_front() {
            let swallow = self.after_cr && (byte == LF || byte == 0);
            self.after_cr = byte == CR;
            if !swallow {
                return Some(byte);
            }
        }
        None
    }

    /// Pull the next batch of input from the session mailbox.
    async fn fill(
        &mut self,
        session: &Session,
        interrupts: &[Topic],
        timeout: Option<Duration>,
    ) -> Result<Fill, TerminalError> {
        let mut topics = vec![Topic::Input, Topic::ConnectionClosed];
        topics.extend_from_slice(interrupts);
        let own = self.terminal.id();
        // Another terminal's hang-up belongs to the task reading for it.
        let accept = |event: &Event| {
            !matches!(event, Event::ConnectionClosed { terminal, .. } if *terminal != own)
        };

        let outcome = tokio::select! {
            biased;
            _ = self.terminal.closed() => {
                session
                    .mailbox()
                    .take_matching(&[Topic::ConnectionClosed], |event| {
                        matches!(event, Event::ConnectionClosed { terminal, .. } if *terminal == own)
                    });
                return Err(TerminalError::Closed);
            }
            outcome = session.mailbox().wait_matching(&topics, timeout, accept) => outcome,
        };
        match outcome {
            WaitOutcome::Event(Event::Input { data, .. }) => {
                self.pending.extend(data);
                Ok(Fill::Data)
            }
            WaitOutcome::Event(Event::ConnectionClosed { .. }) | WaitOutcome::Terminated => {
                Err(TerminalError::Closed)
            }
            WaitOutcome::Event(event) => Ok(Fill::Event(event)),
            WaitOutcome::TimedOut => Ok(Fill::TimedOut),
        }
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}
