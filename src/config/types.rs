use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the listener (host:port).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Connections above this count are refused at accept time.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long shutdown waits for connection tasks to unwind.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Handles granted operator rights at login (case-insensitive).
    #[serde(default)]
    pub operators: Vec<String>,
}

/// Terminal defaults and capability probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Rows used when the probe cannot determine the window size (default: 24).
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    /// Columns used when the probe cannot determine the window size (default: 80).
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// Encoding assigned to new terminals (default: "utf8").
    #[serde(default = "default_encoding")]
    pub default_encoding: String,
    /// Per-dialect reply timeout in milliseconds (default: 750).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Input prompts give up after this many idle seconds (default: 600).
    #[serde(default = "default_input_idle_timeout_seconds")]
    pub input_idle_timeout_seconds: u64,
}

/// Session lifecycle and resume policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Whether new sessions survive a dropped connection (default: true).
    #[serde(default = "default_persistent")]
    pub persistent: bool,
    /// Seconds the resume prompt waits before choosing "start new" (default: 30).
    #[serde(default = "default_resume_timeout_seconds")]
    pub resume_timeout_seconds: u64,
    /// Above this many resumable sessions the "start new" option is withheld (default: 3).
    #[serde(default = "default_max_resumable")]
    pub max_resumable: usize,
    /// Detached persistent sessions are evicted after this many seconds (default: 3600).
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Upper bound on detached persistent sessions kept alive (default: 64).
    #[serde(default = "default_max_persisted")]
    pub max_persisted: usize,
    /// Interval between reaper sweeps (default: 30).
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
}

/// Event bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Queue depth at which a mailbox logs a warning (default: 256).
    #[serde(default = "default_mailbox_warn_depth")]
    pub mailbox_warn_depth: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:6023".to_string()
}

fn default_max_connections() -> usize {
    128
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

fn default_encoding() -> String {
    "utf8".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    750
}

fn default_input_idle_timeout_seconds() -> u64 {
    600
}

fn default_persistent() -> bool {
    true
}

fn default_resume_timeout_seconds() -> u64 {
    30
}

fn default_max_resumable() -> usize {
    3
}

fn default_idle_timeout_seconds() -> u64 {
    3600
}

fn default_max_persisted() -> usize {
    64
}

fn default_reap_interval_seconds() -> u64 {
    30
}

fn default_mailbox_warn_depth() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_connections: default_max_connections(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            operators: Vec::new(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_rows: default_rows(),
            default_cols: default_cols(),
            default_encoding: default_encoding(),
            probe_timeout_ms: default_probe_timeout_ms(),
            input_idle_timeout_seconds: default_input_idle_timeout_seconds(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistent: default_persistent(),
            resume_timeout_seconds: default_resume_timeout_seconds(),
            max_resumable: default_max_resumable(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_persisted: default_max_persisted(),
            reap_interval_seconds: default_reap_interval_seconds(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_warn_depth: default_mailbox_warn_depth(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl TerminalConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn input_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.input_idle_timeout_seconds)
    }
}

impl SessionConfig {
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_secs(self.resume_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}
