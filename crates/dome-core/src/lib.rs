//! Core types for the dome controller.
//!
//! This crate holds everything the protocol engine shares with its callers:
//!
//! - [`error`]: `DomeError` and the framing / value-parsing errors
//! - [`serial`]: the serial transport (opening, terminated reads, draining)
//! - [`capabilities`]: the static table of operations the controller supports

pub mod capabilities;
pub mod error;
pub mod serial;

pub use capabilities::{CapabilityFlags, DomeOperation};
pub use error::{DomeError, DomeErrorKind, DomeResult, FrameError, ValueParseError};
pub use serial::{PortConfig, PortOpener, SerialLine, SerialPortOpener, DOME_BAUD_RATE};
