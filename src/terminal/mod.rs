//! Physical connections: byte transport, display capabilities, and the
//! probe that fills those capabilities in when the transport did not.

mod caps;
mod handle;
mod probe;

pub use caps::{Capabilities, TransportKind, UNKNOWN_TERM_TYPE};
pub use handle::{Terminal, TerminalError, TerminalInfo};
pub use probe::{CapabilityProber, ProbeDialect, ProbeOutcome};
