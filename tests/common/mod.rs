//! Shared test utilities and in-memory transports.

#![allow(dead_code, unused_imports)]

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use doorway::bus::EventBus;
use doorway::config::{BusConfig, Config, SessionConfig};
use doorway::session::SessionRegistry;
use doorway::terminal::{Capabilities, Terminal, TransportKind};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWrite, DuplexStream};

pub type SpyBuffer = Arc<Mutex<Vec<u8>>>;

/// Create a temporary config file with the given TOML body.
pub fn temp_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, content).expect("Failed to write config");
    (temp_dir, config_path)
}

/// Config tuned for tests: short probe and resume windows.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".to_string();
    config.terminal.probe_timeout_ms = 50;
    config.session.resume_timeout_seconds = 2;
    config
}

pub fn registry() -> SessionRegistry {
    registry_with(&SessionConfig::default())
}

pub fn registry_with(config: &SessionConfig) -> SessionRegistry {
    SessionRegistry::new(EventBus::new(&BusConfig::default()), config)
}

// -- Terminals ----------------------------------------------------------------

/// Writer that records everything written through it.
pub struct SpyWriter(SpyBuffer);

impl SpyWriter {
    pub fn new(buf: SpyBuffer) -> Self {
        Self(buf)
    }
}

impl AsyncWrite for SpyWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Terminal with no reader; output is discarded.
pub fn local_terminal() -> Arc<Terminal> {
    Terminal::new(TransportKind::Local, None, Capabilities::default(), tokio::io::sink())
}

/// Terminal whose output lands in the returned buffer.
pub fn spy_terminal() -> (Arc<Terminal>, SpyBuffer) {
    let buf: SpyBuffer = Arc::new(Mutex::new(Vec::new()));
    let terminal = Terminal::new(
        TransportKind::Local,
        None,
        Capabilities::default(),
        SpyWriter::new(buf.clone()),
    );
    (terminal, buf)
}

/// Terminal pumped from an in-memory duplex; returns the client end.
pub fn duplex_terminal() -> (Arc<Terminal>, DuplexStream) {
    let (client, server) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(server);
    let terminal = Terminal::spawn(TransportKind::Raw, None, Capabilities::default(), reader, writer);
    (terminal, client)
}

// -- Client-side helpers ------------------------------------------------------

/// Read from `client` until `needle` shows up. Returns everything read.
pub async fn read_until<R>(client: &mut R, needle: &[u8], timeout: Duration) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut seen = Vec::new();
    let mut chunk = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if seen.windows(needle.len()).any(|w| w == needle) {
            return seen;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, client.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => panic!(
                "did not see {:?} in {:?}",
                String::from_utf8_lossy(needle),
                String::from_utf8_lossy(&seen)
            ),
            Ok(Ok(n)) => seen.extend_from_slice(&chunk[..n]),
        }
    }
}
