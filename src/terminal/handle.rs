use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::caps::{Capabilities, TransportKind};
use crate::bus::{CloseReason, Event, Mailbox};
use crate::ids::{SessionId, TerminalId};

const READ_BUFFER: usize = 4096;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("a terminal cannot spy on itself")]
    SpyOnSelf,
}

/// Where transport input goes. Unattached terminals buffer raw bytes
/// (probe replies, pre-login typing); attached terminals post `Input`
/// events to their session's mailbox.
#[derive(Default)]
struct InputRoute {
    mailbox: Option<Arc<Mailbox>>,
    pending: VecDeque<u8>,
    eof: bool,
}

/// Point-in-time view of a terminal for who lists and operator tools.
#[derive(Debug, Clone)]
pub struct TerminalInfo {
    pub id: TerminalId,
    pub kind: TransportKind,
    pub peer: Option<String>,
    pub capabilities: Capabilities,
    pub session: Option<SessionId>,
    pub attached_at: Option<SystemTime>,
    pub idle: Duration,
    pub spying_on: Option<TerminalId>,
    pub closed: bool,
}

/// One physical connection and its negotiated display capabilities.
///
/// The session relation (`session`, `attached_at`, input route) is only
/// changed by the session registry while it holds its write lock.
pub struct Terminal {
    id: TerminalId,
    kind: TransportKind,
    peer: Option<String>,
    caps: RwLock<Capabilities>,
    session: Mutex<Option<SessionId>>,
    attached_at: Mutex<Option<SystemTime>>,
    last_input: Mutex<Instant>,
    input: Mutex<InputRoute>,
    input_ready: Notify,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    spying_on: Mutex<Option<Weak<Terminal>>>,
    spies: Mutex<Vec<Weak<Terminal>>>,
}

impl Terminal {
    /// Create a terminal that writes to `writer`. Input must be fed through
    /// [`Terminal::deliver`]; use [`Terminal::spawn`] to pump a reader.
    pub fn new<W>(
        kind: TransportKind,
        peer: Option<String>,
        caps: Capabilities,
        writer: W,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            id: TerminalId::next(),
            kind,
            peer,
            caps: RwLock::new(caps),
            session: Mutex::new(None),
            attached_at: Mutex::new(None),
            last_input: Mutex::new(Instant::now()),
            input: Mutex::new(InputRoute::default()),
            input_ready: Notify::new(),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            spying_on: Mutex::new(None),
            spies: Mutex::new(Vec::new()),
        })
    }

    /// Create a terminal and spawn the task that pumps `reader` into it.
    ///
    /// The pump stops at EOF, on a read error, or when the terminal is closed.
    pub fn spawn<R, W>(
        kind: TransportKind,
        peer: Option<String>,
        caps: Capabilities,
        reader: R,
        writer: W,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let terminal = Self::new(kind, peer, caps, writer);
        let pump = Arc::clone(&terminal);
        tokio::spawn(async move { pump.pump(reader).await });
        terminal
    }

    async fn pump<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut buffer = [0u8; READ_BUFFER];
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                read = reader.read(&mut buffer) => match read {
                    Ok(0) => {
                        tracing::debug!(terminal = %self.id, "Transport reached EOF");
                        self.transport_closed();
                        break;
                    }
                    Ok(count) => self.deliver(&buffer[..count]),
                    Err(e) => {
                        tracing::debug!(terminal = %self.id, error = %e, "Transport read failed");
                        self.transport_closed();
                        break;
                    }
                },
            }
        }
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps.read().clone()
    }

    pub fn set_capabilities(&self, caps: Capabilities) {
        *self.caps.write() = caps;
    }

    pub fn set_size(&self, rows: u16, cols: u16) {
        let mut caps = self.caps.write();
        caps.rows = rows;
        caps.cols = cols;
        caps.negotiated = true;
    }

    pub fn set_encoding(&self, encoding: &str) {
        self.caps.write().encoding = encoding.to_string();
    }

    pub fn session(&self) -> Option<SessionId> {
        *self.session.lock()
    }

    pub fn attached_at(&self) -> Option<SystemTime> {
        *self.attached_at.lock()
    }

    pub fn idle(&self) -> Duration {
        self.last_input.lock().elapsed()
    }

    pub fn touch(&self) {
        *self.last_input.lock() = Instant::now();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the terminal is closed for any reason.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn info(&self) -> TerminalInfo {
        TerminalInfo {
            id: self.id,
            kind: self.kind,
            peer: self.peer.clone(),
            capabilities: self.capabilities(),
            session: self.session(),
            attached_at: self.attached_at(),
            idle: self.idle(),
            spying_on: self.spying_on().map(|target| target.id()),
            closed: self.is_closed(),
        }
    }

    // -- Session relation (registry only) ------------------------------------

    /// Bind to a session and route input to its mailbox. Bytes buffered
    /// while unattached are handed over as one `Input` event.
    pub(crate) fn bind(&self, session: SessionId, mailbox: Arc<Mailbox>) {
        *self.session.lock() = Some(session);
        *self.attached_at.lock() = Some(SystemTime::now());

        let mut input = self.input.lock();
        if !input.pending.is_empty() {
            let data: Vec<u8> = input.pending.drain(..).collect();
            mailbox.push(Event::Input {
                terminal: self.id,
                data,
            });
        }
        input.mailbox = Some(mailbox);
    }

    pub(crate) fn unbind(&self) {
        *self.session.lock() = None;
        *self.attached_at.lock() = None;
        self.input.lock().mailbox = None;
    }

    // -- Input ---------------------------------------------------------------

    /// Feed bytes received from the transport.
    pub fn deliver(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.touch();
        {
            let mut input = self.input.lock();
            match &input.mailbox {
                Some(mailbox) => {
                    mailbox.push(Event::Input {
                        terminal: self.id,
                        data: data.to_vec(),
                    });
                }
                None => input.pending.extend(data),
            }
        }
        self.input_ready.notify_waiters();
    }

    /// Read buffered raw input, waiting up to `timeout`.
    ///
    /// Only meaningful while unattached; attached terminals route input to
    /// the session mailbox instead. `Ok(None)` means the timeout elapsed.
    pub async fn read_raw(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TerminalError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.input_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut input = self.input.lock();
                if !input.pending.is_empty() {
                    return Ok(Some(input.pending.drain(..).collect()));
                }
                if input.eof {
                    return Err(TerminalError::Closed);
                }
            }
            if self.is_closed() {
                return Err(TerminalError::Closed);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.closed.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    /// Push bytes back to the front of the unattached input buffer.
    pub fn unread(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut input = self.input.lock();
            for &byte in data.iter().rev() {
                input.pending.push_front(byte);
            }
        }
        self.input_ready.notify_waiters();
    }

    fn transport_closed(&self) {
        {
            let mut input = self.input.lock();
            input.eof = true;
            if let Some(mailbox) = &input.mailbox {
                mailbox.push(Event::ConnectionClosed {
                    terminal: self.id,
                    reason: CloseReason::Transport,
                });
            }
        }
        self.close(CloseReason::Transport);
    }

    // -- Output --------------------------------------------------------------

    /// Write to the client and mirror to any spying terminals.
    pub async fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.write_direct(data).await?;
        for spy in self.spy_list() {
            if let Err(e) = spy.write_direct(data).await {
                tracing::debug!(terminal = %spy.id(), error = %e, "Spy mirror write failed");
            }
        }
        Ok(())
    }

    /// Write text, replacing non-ASCII characters on ASCII-only terminals.
    pub async fn write_text(&self, text: &str) -> Result<(), TerminalError> {
        let encoding = self.caps.read().encoding.clone();
        if encoding.eq_ignore_ascii_case("ascii") {
            let narrowed: String = text
                .chars()
                .map(|c| if c.is_ascii() { c } else { '?' })
                .collect();
            self.write(narrowed.as_bytes()).await
        } else {
            self.write(text.as_bytes()).await
        }
    }

    async fn write_direct(&self, data: &[u8]) -> Result<(), TerminalError> {
        if self.is_closed() {
            return Err(TerminalError::Closed);
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TerminalError::Closed);
        };
        let result = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            guard.take();
            drop(guard);
            self.close(CloseReason::Transport);
            return Err(TerminalError::Io(e));
        }
        // close() could not take the writer while this write held it.
        if self.is_closed() {
            guard.take();
        }
        Ok(())
    }

    // -- Spying --------------------------------------------------------------

    /// Mirror `target`'s output to this terminal. Replaces any previous spy
    /// target. The relation never grants input or ownership.
    pub fn begin_spy(self: &Arc<Self>, target: &Arc<Terminal>) -> Result<(), TerminalError> {
        if Arc::ptr_eq(self, target) {
            return Err(TerminalError::SpyOnSelf);
        }
        if self.is_closed() || target.is_closed() {
            return Err(TerminalError::Closed);
        }
        self.end_spy();
        target.spies.lock().push(Arc::downgrade(self));
        *self.spying_on.lock() = Some(Arc::downgrade(target));
        tracing::info!(observer = %self.id, target = %target.id, "Spy started");
        Ok(())
    }

    /// Stop mirroring. Returns the terminal that was being observed, if any.
    pub fn end_spy(&self) -> Option<TerminalId> {
        let target = self.spying_on.lock().take()?;
        let target = target.upgrade()?;
        target
            .spies
            .lock()
            .retain(|spy| spy.upgrade().is_some_and(|spy| spy.id != self.id));
        tracing::info!(observer = %self.id, target = %target.id, "Spy ended");
        Some(target.id)
    }

    pub fn spying_on(&self) -> Option<Arc<Terminal>> {
        self.spying_on.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn spy_count(&self) -> usize {
        self.spy_list().len()
    }

    fn spy_list(&self) -> Vec<Arc<Terminal>> {
        let mut spies = self.spies.lock();
        spies.retain(|spy| spy.strong_count() > 0);
        spies.iter().filter_map(Weak::upgrade).collect()
    }

    // -- Teardown ------------------------------------------------------------

    /// Close the terminal: stop the pump, release the writer, wake readers,
    /// and drop both sides of any spy relation. Idempotent; the first
    /// reason wins.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut current = self.close_reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        self.closed.cancel();
        self.input_ready.notify_waiters();

        // A write in flight keeps the writer; that write drops it on completion.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        self.end_spy();
        let observers: Vec<Arc<Terminal>> = self.spies.lock().drain(..).filter_map(|w| w.upgrade()).collect();
        for observer in observers {
            let mut spying_on = observer.spying_on.lock();
            if spying_on
                .as_ref()
                .and_then(Weak::upgrade)
                .is_some_and(|target| target.id == self.id)
            {
                spying_on.take();
            }
        }

        tracing::info!(terminal = %self.id, ?reason, "Terminal closed");
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("session", &self.session())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
