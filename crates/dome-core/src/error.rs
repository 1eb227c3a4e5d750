//! Error types for the dome controller.
//!
//! `DomeError` is the single error type returned by every transport and
//! dispatcher operation. Framing and value-parsing failures have their own
//! small enums so the framer and the azimuth model can be used (and tested)
//! without the rest of the stack, and convert into `DomeError` with `?`.
//!
//! ## Error Categories
//!
//! - **`Connect`**: the serial port could not be opened. The connection stays
//!   disconnected.
//! - **`NotConnected`**: an operation was requested while disconnected. Nothing
//!   was written to the line.
//! - **`Io`**: a read or write failed below the protocol layer. The line should
//!   be considered suspect and a reconnect is recommended.
//! - **`Timeout`**: no terminated reply arrived in time. Reported separately from
//!   `Io` so callers can retry without treating the line as dead.
//! - **`Frame`** / **`ValueParse`**: the device replied with something malformed.
//! - **`NotSupported`**: the operation has no wire counterpart on this controller.
//!
//! The core never retries on its own; retry policy belongs to the caller, which
//! can use [`DomeError::kind`] to decide.

use crate::capabilities::DomeOperation;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Classification
// =============================================================================

/// Coarse classification of a [`DomeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomeErrorKind {
    /// The port could not be opened or reopened
    Connection,
    /// The dome was not connected
    NotConnected,
    /// Read or write failure on the line
    Io,
    /// No reply within the read timeout
    Timeout,
    /// Malformed or unparseable reply
    Protocol,
    /// Argument that cannot be sent to the device
    InvalidParameter,
    /// Operation without a wire counterpart
    NotSupported,
    /// Invalid configuration
    Configuration,
}

impl std::fmt::Display for DomeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DomeErrorKind::Connection => "connection",
            DomeErrorKind::NotConnected => "not_connected",
            DomeErrorKind::Io => "io",
            DomeErrorKind::Timeout => "timeout",
            DomeErrorKind::Protocol => "protocol",
            DomeErrorKind::InvalidParameter => "invalid_parameter",
            DomeErrorKind::NotSupported => "not_supported",
            DomeErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

// =============================================================================
// Protocol Errors
// =============================================================================

/// A reply frame that does not have the `#<payload>;` shape.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Nothing (or only the prefix) was received where a value was expected.
    #[error("reply frame is empty")]
    Empty,
    /// The first byte is not `#`.
    #[error("reply frame does not start with '#'")]
    BadPrefix,
    /// The last byte is not `;`.
    #[error("reply frame does not end with ';'")]
    BadTerminator,
}

/// A reply payload that is not a number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("reply payload '{raw}' is not a number")]
pub struct ValueParseError {
    /// The payload exactly as received.
    pub raw: String,
}

impl ValueParseError {
    /// Error for the given raw payload.
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

// =============================================================================
// DomeError
// =============================================================================

/// Convenience alias for results using the dome error type.
pub type DomeResult<T> = std::result::Result<T, DomeError>;

/// Primary error type for the dome controller.
#[derive(Error, Debug)]
pub enum DomeError {
    /// The serial port could not be opened.
    #[error("Failed to open dome serial port '{port}': {message}")]
    Connect {
        /// Port that was being opened
        port: String,
        /// Reason reported by the OS or the opener
        message: String,
    },

    /// An operation was requested while the dome is disconnected.
    #[error("Cannot {operation}: dome is not connected")]
    NotConnected {
        /// Operation that was refused
        operation: DomeOperation,
    },

    /// A serial read or write failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No terminated reply arrived within the read timeout.
    #[error("No reply from dome within {timeout:?}")]
    Timeout {
        /// The read timeout that elapsed
        timeout: Duration,
    },

    /// The reply did not have the `#<payload>;` shape.
    #[error("Malformed reply: {0}")]
    Frame(#[from] FrameError),

    /// The reply payload could not be parsed.
    #[error("Malformed reply: {0}")]
    ValueParse(#[from] ValueParseError),

    /// An azimuth that cannot be expressed on the wire (NaN or infinite).
    #[error("Invalid azimuth: {0}")]
    InvalidAzimuth(f64),

    /// The operation has no wire counterpart on this controller.
    #[error("Operation not supported by the dome: {0}")]
    NotSupported(DomeOperation),

    /// Configuration values failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DomeError {
    /// Classify this error.
    pub fn kind(&self) -> DomeErrorKind {
        match self {
            Self::Connect { .. } => DomeErrorKind::Connection,
            Self::NotConnected { .. } => DomeErrorKind::NotConnected,
            Self::Io(_) => DomeErrorKind::Io,
            Self::Timeout { .. } => DomeErrorKind::Timeout,
            Self::Frame(_) | Self::ValueParse(_) => DomeErrorKind::Protocol,
            Self::InvalidAzimuth(_) => DomeErrorKind::InvalidParameter,
            Self::NotSupported(_) => DomeErrorKind::NotSupported,
            Self::Configuration(_) => DomeErrorKind::Configuration,
        }
    }

    /// Whether the serial line should be considered dead after this error.
    ///
    /// Only I/O failures qualify; a timeout or a malformed reply leaves the
    /// line usable once stale bytes are drained.
    pub fn is_connection_suspect(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
