//! Protocol engine for a serial observatory dome controller.
//!
//! The controller rotates a dome and reports its azimuth over a short ASCII
//! protocol (`+G;` → `#<deg>;`, `+MA<deg>;`). This crate turns that into an
//! async driver:
//!
//! - [`protocol`]: command encoding and reply framing
//! - [`azimuth`]: degree normalization and wire conversion
//! - [`connection`]: the connection state machine and exclusive line access
//! - [`driver`]: [`DomeDriver`], the command dispatcher
//! - [`config`]: Figment-based configuration
//!
//! Logging goes through `tracing`; install a subscriber in the application to
//! see exchanges (`debug`) and failures (`warn`).

pub mod azimuth;
pub mod config;
pub mod connection;
pub mod driver;
pub mod protocol;

pub use config::DomeConfig;
pub use connection::ConnectionState;
pub use driver::{DeviceInfo, DomeDriver, ShutterState};
pub use protocol::{Command, Reply};

pub use dome_core::{CapabilityFlags, DomeError, DomeErrorKind, DomeOperation, DomeResult};
