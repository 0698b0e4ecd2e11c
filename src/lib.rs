//! Session and terminal multiplexing core for a multi-user door server.
//!
//! Connections become [`terminal::Terminal`]s, logical user contexts are
//! [`session::Session`]s kept in a [`session::SessionRegistry`], and door
//! programs talk to each other through the [`bus::EventBus`]. The
//! [`server`] module wires these into a TCP front end.

pub mod bus;
pub mod config;
pub mod ids;
pub mod logging;
pub mod operator;
pub mod resume;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod terminal;
