//! Gimbal I/O - two-axis stepper head control
//!
//! Speaks a newline-delimited text protocol to the gimbal and provides
//! both sides of the link:
//!
//! - device side: [`MotionController`] and [`DeviceSession`] run the
//!   homing state machine and interleaved two-axis stepping behind a
//!   [`Transport`]
//! - client side: [`GimbalDriver`] converts absolute orientation goals
//!   into relative moves and waits for acknowledgements
//!
//! The [`SimDriver`] stepper bank and the [`MemoryLink`] transport pair
//! wire both sides together for tests and dry-runs without hardware.

pub mod axis;
pub mod controller;
pub mod driver;
pub mod error;
pub mod port;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use axis::{Axis, AxisConfig, Direction, NEGLIGIBLE_MOVE_DEG};
pub use controller::{ControllerState, HomingConfig, MotionConfig, MotionController, StepDriver};
pub use driver::{DriverConfig, GimbalDriver};
pub use error::{GimbalError, Result};
pub use port::{MotionPort, PortStatus, SimulatedGimbal};
pub use session::DeviceSession;
pub use sim::SimDriver;
pub use transport::{MemoryLink, MockTransport, SerialTransport, Transport};
