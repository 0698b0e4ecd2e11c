//! Logical user contexts and the registry that owns them.

mod input;
mod registry;
#[allow(clippy::module_inception)]
mod session;

pub use input::{InputReader, LineRead};
pub use registry::{DisconnectOutcome, ReapPolicy, RegistryError, SessionRegistry};
pub use session::{Session, SessionSnapshot};
