//! Logging utilities.
//!
//! The engine only speaks the `log` facade. Hosts that do not install their
//! own logger can call [`init_logging`] early in startup.

mod init;

pub use init::{LoggingConfig, init_logging};
