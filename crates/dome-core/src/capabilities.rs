//! Dome Capability Table
//!
//! The dome controller firmware only understands two commands: report the
//! azimuth and slew to an azimuth. Everything else a dome interface can ask
//! for (homing, parking, shutter control, ...) has no wire counterpart.
//!
//! [`DOME_CAPABILITIES`] is the single table consulted both when reporting
//! capability flags to the controlling application and when the dispatcher
//! decides whether a command may be put on the wire at all.
//!
//! # Example
//!
//! ```rust
//! use dome_core::capabilities::{is_supported, CapabilityFlags, DomeOperation};
//!
//! assert!(is_supported(DomeOperation::SetAzimuth));
//! assert!(!is_supported(DomeOperation::FindHome));
//!
//! let flags = CapabilityFlags::current();
//! assert!(flags.can_set_azimuth);
//! assert!(!flags.can_find_home);
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Operation Enum
// =============================================================================

/// Every operation a dome interface may request from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomeOperation {
    /// Read the current azimuth (`+G;`)
    QueryAzimuth,
    /// Slew to an absolute azimuth (`+MA<deg>;`)
    SetAzimuth,
    /// Stop a slew in progress
    AbortSlew,
    /// Search for the home sensor
    FindHome,
    /// Move to the park position
    Park,
    /// Store the current position as the park position
    SetPark,
    /// Open or close the shutter
    SetShutter,
    /// Redefine the current azimuth without moving
    SyncAzimuth,
    /// Drive the shutter to an altitude
    SetAltitude,
    /// Slave the dome to a telescope
    Slave,
}

impl DomeOperation {
    /// All operations, in reporting order.
    pub const ALL: [DomeOperation; 10] = [
        Self::QueryAzimuth,
        Self::SetAzimuth,
        Self::AbortSlew,
        Self::FindHome,
        Self::Park,
        Self::SetPark,
        Self::SetShutter,
        Self::SyncAzimuth,
        Self::SetAltitude,
        Self::Slave,
    ];

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryAzimuth => "query azimuth",
            Self::SetAzimuth => "slew to azimuth",
            Self::AbortSlew => "abort slew",
            Self::FindHome => "find home",
            Self::Park => "park",
            Self::SetPark => "set park",
            Self::SetShutter => "shutter control",
            Self::SyncAzimuth => "sync azimuth",
            Self::SetAltitude => "slew to altitude",
            Self::Slave => "slaving",
        }
    }
}

impl std::fmt::Display for DomeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Capability Table
// =============================================================================

/// Operations the controller firmware actually implements.
pub static DOME_CAPABILITIES: &[DomeOperation] =
    &[DomeOperation::QueryAzimuth, DomeOperation::SetAzimuth];

/// Whether `operation` has a wire counterpart on this controller.
pub fn is_supported(operation: DomeOperation) -> bool {
    DOME_CAPABILITIES.contains(&operation)
}

/// Capability flags surfaced to the controlling application.
///
/// Always derived from [`DOME_CAPABILITIES`]; there is no way to construct a
/// set of flags that disagrees with what the dispatcher will accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityFlags {
    /// Slewing to an azimuth is possible
    pub can_set_azimuth: bool,
    /// Opening and closing the shutter is possible
    pub can_set_shutter: bool,
    /// Homing is possible
    pub can_find_home: bool,
    /// Parking is possible
    pub can_park: bool,
    /// Setting the park position is possible
    pub can_set_park: bool,
    /// Syncing the azimuth is possible
    pub can_sync_azimuth: bool,
    /// Slewing the shutter altitude is possible
    pub can_set_altitude: bool,
    /// Slaving to a telescope is possible
    pub can_slave: bool,
}

impl CapabilityFlags {
    /// Flags for the current capability table.
    pub fn current() -> Self {
        Self {
            can_set_azimuth: is_supported(DomeOperation::SetAzimuth),
            can_set_shutter: is_supported(DomeOperation::SetShutter),
            can_find_home: is_supported(DomeOperation::FindHome),
            can_park: is_supported(DomeOperation::Park),
            can_set_park: is_supported(DomeOperation::SetPark),
            can_sync_azimuth: is_supported(DomeOperation::SyncAzimuth),
            can_set_altitude: is_supported(DomeOperation::SetAltitude),
            can_slave: is_supported(DomeOperation::Slave),
        }
    }
}
