//! Configuration loading and defaults.

mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{BusConfig, Config, ServerConfig, SessionConfig, TerminalConfig};
