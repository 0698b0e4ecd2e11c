use std::fmt;

use crate::config::TerminalConfig;

/// How a terminal reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Telnet,
    Ssh,
    Raw,
    /// In-process terminal with no remote peer (console, tests).
    Local,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telnet => write!(f, "telnet"),
            Self::Ssh => write!(f, "ssh"),
            Self::Raw => write!(f, "raw"),
            Self::Local => write!(f, "local"),
        }
    }
}

pub const UNKNOWN_TERM_TYPE: &str = "unknown";

/// Display capabilities of a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub rows: u16,
    pub cols: u16,
    pub term_type: String,
    pub encoding: String,
    /// True once the size and type came from the client (transport
    /// negotiation or a matched probe reply) rather than from defaults.
    pub negotiated: bool,
}

impl Capabilities {
    pub fn from_config(config: &TerminalConfig) -> Self {
        Self {
            rows: config.default_rows,
            cols: config.default_cols,
            term_type: UNKNOWN_TERM_TYPE.to_string(),
            encoding: config.default_encoding.clone(),
            negotiated: false,
        }
    }

    /// Capabilities the transport already supplied (ssh pty-req, telnet NAWS).
    pub fn negotiated(rows: u16, cols: u16, term_type: &str, encoding: &str) -> Self {
        Self {
            rows,
            cols,
            term_type: term_type.to_string(),
            encoding: encoding.to_string(),
            negotiated: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::from_config(&TerminalConfig::default())
    }
}
