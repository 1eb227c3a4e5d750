//! Dome Controller Wire Protocol
//!
//! Protocol: ASCII command/response over RS-232, 9600 baud, 8N1
//!
//! | Direction | Frame        | Meaning                               |
//! |-----------|--------------|---------------------------------------|
//! | → device  | `+G;`        | Query current azimuth                 |
//! | ← device  | `#<digits>;` | Azimuth value, whole degrees          |
//! | → device  | `+MA<int>;`  | Move to azimuth `<int>` degrees       |
//!
//! Commands start with `+`, replies start with `#`, and both end with `;`.
//! The firmware documents no reply to a move, and no frames at all for
//! homing, parking or the shutter.

use crate::azimuth;
use dome_core::capabilities::{is_supported, DomeOperation};
use dome_core::error::{DomeError, DomeResult, FrameError};

/// First byte of every outgoing command.
pub const COMMAND_PREFIX: u8 = b'+';
/// First byte of every well-formed reply.
pub const REPLY_PREFIX: u8 = b'#';
/// Last byte of every frame in both directions.
pub const TERMINATOR: u8 = b';';

// =============================================================================
// Command
// =============================================================================

/// A logical request to the dome controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `+G;`, answered with `#<deg>;`
    QueryAzimuth,
    /// Target azimuth in degrees; normalized and truncated on the wire
    MoveToAzimuth(f64),
    /// Stop a slew (no frame)
    Abort,
    /// Search for home (no frame)
    FindHome,
    /// Go to park (no frame)
    Park,
    /// Open the shutter (no frame)
    OpenShutter,
    /// Close the shutter (no frame)
    CloseShutter,
}

impl Command {
    /// The capability this command exercises.
    pub fn operation(&self) -> DomeOperation {
        match self {
            Self::QueryAzimuth => DomeOperation::QueryAzimuth,
            Self::MoveToAzimuth(_) => DomeOperation::SetAzimuth,
            Self::Abort => DomeOperation::AbortSlew,
            Self::FindHome => DomeOperation::FindHome,
            Self::Park => DomeOperation::Park,
            Self::OpenShutter | Self::CloseShutter => DomeOperation::SetShutter,
        }
    }

    /// Whether the device answers this command with a `#...;` frame.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Self::QueryAzimuth)
    }
}

/// Encode a command into its wire frame.
///
/// Commands whose operation is missing from the capability table have no
/// frame and fail with [`DomeError::NotSupported`].
pub fn encode(command: &Command) -> DomeResult<Vec<u8>> {
    let operation = command.operation();
    if !is_supported(operation) {
        return Err(DomeError::NotSupported(operation));
    }

    let body = match command {
        Command::QueryAzimuth => "G".to_string(),
        Command::MoveToAzimuth(target) => format!("MA{}", azimuth::to_wire(*target)?),
        _ => return Err(DomeError::NotSupported(operation)),
    };

    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(COMMAND_PREFIX);
    frame.extend_from_slice(body.as_bytes());
    frame.push(TERMINATOR);
    Ok(frame)
}

// =============================================================================
// Reply
// =============================================================================

/// A validated reply frame. The payload is still unparsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    payload: String,
}

impl Reply {
    /// Text between `#` and `;`.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Validate a reply frame and extract its payload.
///
/// Leading ASCII whitespace (a stray CR/LF left on the line) is skipped.
/// Length is checked before any byte is inspected, so an empty or truncated
/// reply is an error rather than a panic.
pub fn decode(raw: &[u8]) -> Result<Reply, FrameError> {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let frame = &raw[start..];

    let Some((&first, rest)) = frame.split_first() else {
        return Err(FrameError::Empty);
    };
    if first != REPLY_PREFIX {
        return Err(FrameError::BadPrefix);
    }
    let Some((&last, payload)) = rest.split_last() else {
        return Err(FrameError::Empty);
    };
    if last != TERMINATOR {
        return Err(FrameError::BadTerminator);
    }
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }

    Ok(Reply {
        payload: String::from_utf8_lossy(payload).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_query() {
        assert_eq!(encode(&Command::QueryAzimuth).unwrap(), b"+G;");
    }

    #[test]
    fn test_encode_move() {
        assert_eq!(encode(&Command::MoveToAzimuth(180.0)).unwrap(), b"+MA180;");
        assert_eq!(encode(&Command::MoveToAzimuth(89.9)).unwrap(), b"+MA89;");
        assert_eq!(encode(&Command::MoveToAzimuth(-10.0)).unwrap(), b"+MA350;");
    }

    #[test]
    fn test_encode_rejects_bad_target() {
        assert!(matches!(
            encode(&Command::MoveToAzimuth(f64::NAN)),
            Err(DomeError::InvalidAzimuth(_))
        ));
    }

    #[test]
    fn test_encode_unsupported_commands() {
        for command in [
            Command::Abort,
            Command::FindHome,
            Command::Park,
            Command::OpenShutter,
            Command::CloseShutter,
        ] {
            match encode(&command) {
                Err(DomeError::NotSupported(op)) => assert_eq!(op, command.operation()),
                other => panic!("{:?} encoded to {:?}", command, other),
            }
        }
    }

    #[test]
    fn test_only_query_expects_reply() {
        assert!(Command::QueryAzimuth.expects_reply());
        assert!(!Command::MoveToAzimuth(10.0).expects_reply());
    }

    #[test]
    fn test_decode_valid() {
        assert_eq!(decode(b"#45;").unwrap().payload(), "45");
        assert_eq!(decode(b"\r\n#270;").unwrap().payload(), "270");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(b"45;"), Err(FrameError::BadPrefix));
        assert_eq!(decode(b"#;"), Err(FrameError::Empty));
        assert_eq!(decode(b"#45"), Err(FrameError::BadTerminator));
        assert_eq!(decode(b""), Err(FrameError::Empty));
        assert_eq!(decode(b"#"), Err(FrameError::Empty));
        assert_eq!(decode(b"\r\n"), Err(FrameError::Empty));
        assert_eq!(decode(b";"), Err(FrameError::BadPrefix));
    }

    #[test]
    fn test_decode_keeps_payload_unparsed() {
        assert_eq!(decode(b"#abc;").unwrap().payload(), "abc");
    }
}
