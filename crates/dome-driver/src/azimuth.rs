//! Azimuth conversion between the domain and the wire.
//!
//! The controller speaks whole degrees as decimal text. The domain uses a
//! floating-point azimuth in `[0, 360)` that wraps around.
//!
//! Precision loss is a known property of the protocol: [`to_wire`] truncates
//! toward zero, so a value sent and read back may differ from what was sent by
//! up to (but never including) one degree.

use dome_core::error::{DomeError, DomeResult, ValueParseError};

/// Degrees in a full turn.
pub const FULL_TURN: f64 = 360.0;

/// Wrap `degrees` into `[0, 360)`.
///
/// Non-finite input is returned unchanged.
pub fn normalize(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(FULL_TURN);
    // rem_euclid rounds tiny negative inputs up to exactly 360.0
    if wrapped >= FULL_TURN {
        0.0
    } else {
        wrapped
    }
}

/// Wire representation of an azimuth: normalized, then truncated toward zero.
pub fn to_wire(degrees: f64) -> DomeResult<u16> {
    if !degrees.is_finite() {
        return Err(DomeError::InvalidAzimuth(degrees));
    }
    // normalize() keeps the value in [0, 360), so the cast cannot overflow
    Ok(normalize(degrees).trunc() as u16)
}

/// Parse an azimuth payload reported by the device.
///
/// No range check is applied: an out-of-range report is passed through as-is
/// so device-side bugs stay visible.
pub fn from_wire(raw: &str) -> Result<f64, ValueParseError> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ValueParseError::new(raw)),
    }
}
