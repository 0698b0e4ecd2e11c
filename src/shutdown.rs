use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;

/// Server-wide shutdown flag plus a count of live connection tasks.
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown: Arc<AtomicBool>,
    active_connections: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Resolve on ctrl-c, SIGTERM, or an explicit [`signal_shutdown`].
    ///
    /// [`signal_shutdown`]: ShutdownManager::signal_shutdown
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
                _ = self.wait() => {},
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = signal::ctrl_c() => {},
                _ = self.wait() => {},
            }
        }

        self.signal_shutdown();
        Ok(())
    }

    pub fn signal_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::info!("Graceful shutdown initiated");
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is signaled.
    pub async fn wait(&self) {
        // Subscribe before checking the flag so a signal landing in between
        // is not lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        notified.await;
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, timeout: Duration) {
        let active = self.active_connections();
        tracing::info!(active, "Waiting for connections to finish");

        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout {
            if self.active_connections() == 0 {
                tracing::info!("All connections closed");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tracing::warn!(remaining = self.active_connections(), "Forced shutdown after timeout");
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
