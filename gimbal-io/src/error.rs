//! Error types for gimbal I/O

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, GimbalError>;

/// Gimbal I/O error types
#[derive(Debug, thiserror::Error)]
pub enum GimbalError {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Move commanded before the tilt axis was homed
    #[error("Axis not homed")]
    Unhomed,

    /// Homing search ran out before the limit switch triggered
    #[error("Homing timed out before the limit switch triggered")]
    HomingTimeout,

    /// Limit switch behaved inconsistently during homing
    #[error("Homing fault: {0}")]
    HomingFault(&'static str),

    /// Emergency stop engaged; explicit reset required
    #[error("Emergency stop engaged")]
    EmergencyStop,

    /// Device is already executing a move or homing run
    #[error("Device busy")]
    Busy,

    /// No acknowledgement from the device within the deadline
    #[error("No response from device within {0:?}")]
    HardwareTimeout(Duration),

    /// Line that does not parse as a command or response
    #[error("Invalid line: {0}")]
    InvalidLine(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error reported by the device that has no typed mapping
    #[error("Device error: {0}")]
    Device(String),
}
