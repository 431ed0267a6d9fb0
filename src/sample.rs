//! Raw sample and calibration kind types.

use std::fmt;

/// One three-axis sensor reading in sensor-native units.
///
/// Constructed per received bus message and consumed by exactly one filter;
/// filters do not retain raw history beyond a bounded window. A sample whose
/// message failed numeric parsing is carried with `is_valid = false` rather
/// than dropped, so sample counters still observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleVector {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub is_valid: bool,
}

impl SampleVector {
    /// Create a valid sample.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            x,
            y,
            z,
            is_valid: true,
        }
    }

    /// Create a placeholder for a message that failed to parse.
    pub fn invalid() -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            is_valid: false,
        }
    }
}

/// Which sensor a calibration run targets.
///
/// Selects the raw-message topic suffix, the filter type, and the
/// termination policy. Immutable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationKind {
    Magnetometer,
    Accelerometer,
}

impl CalibrationKind {
    /// Message name the aircraft uses for this sensor's raw stream.
    pub fn raw_message_name(&self) -> &'static str {
        match self {
            CalibrationKind::Magnetometer => "IMU_MAG_RAW",
            CalibrationKind::Accelerometer => "IMU_ACCEL_RAW",
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::Magnetometer => write!(f, "magnetometer"),
            CalibrationKind::Accelerometer => write!(f, "accelerometer"),
        }
    }
}
