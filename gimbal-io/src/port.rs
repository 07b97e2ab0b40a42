//! Capability seam over the gimbal head

use crate::error::{GimbalError, Result};
use std::time::Duration;

/// Pose and readiness snapshot of a motion port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortStatus {
    /// Tilt reference established
    pub homed: bool,
    /// Commanded pan in degrees
    pub pan_deg: f64,
    /// Commanded tilt in degrees
    pub tilt_deg: f64,
}

/// Capability trait over the gimbal head
///
/// Implemented by the serial-backed [`GimbalDriver`](crate::driver::GimbalDriver)
/// and by [`SimulatedGimbal`], so capture coordination runs unchanged
/// against hardware or a dry-run rig.
pub trait MotionPort {
    /// Move to an absolute orientation in degrees
    fn goto(&mut self, pan_deg: f64, tilt_deg: f64) -> Result<()>;

    /// Current commanded pose and homing state
    fn status(&self) -> PortStatus;

    /// Establish the tilt zero reference
    fn home(&mut self) -> Result<()>;

    /// Engage the emergency stop
    fn request_stop(&mut self) -> Result<()>;

    /// Clear the emergency stop
    fn reset(&mut self) -> Result<()>;
}

/// In-memory gimbal for dry-runs and coordinator tests
///
/// Tracks pose like the real head and honors the homing and stop
/// lifecycle; failures can be injected to exercise abort paths.
pub struct SimulatedGimbal {
    status: PortStatus,
    stopped: bool,
    goto_log: Vec<(f64, f64)>,
    fail_on_goto: Option<usize>,
    fail_homing: bool,
}

impl SimulatedGimbal {
    /// Fresh unhomed gimbal at pose (0, 0)
    pub fn new() -> Self {
        SimulatedGimbal {
            status: PortStatus {
                homed: false,
                pan_deg: 0.0,
                tilt_deg: 0.0,
            },
            stopped: false,
            goto_log: Vec::new(),
            fail_on_goto: None,
            fail_homing: false,
        }
    }

    /// Fail the nth accepted goto (0-based) with a hardware timeout
    pub fn fail_on_goto(&mut self, index: usize) {
        self.fail_on_goto = Some(index);
    }

    /// Make homing runs fail with a timeout
    pub fn fail_homing(&mut self) {
        self.fail_homing = true;
    }

    /// Every accepted goto, in order
    pub fn goto_log(&self) -> &[(f64, f64)] {
        &self.goto_log
    }
}

impl Default for SimulatedGimbal {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionPort for SimulatedGimbal {
    fn goto(&mut self, pan_deg: f64, tilt_deg: f64) -> Result<()> {
        if self.stopped {
            return Err(GimbalError::EmergencyStop);
        }
        if !self.status.homed {
            return Err(GimbalError::Unhomed);
        }
        if self.fail_on_goto == Some(self.goto_log.len()) {
            return Err(GimbalError::HardwareTimeout(Duration::from_secs(5)));
        }

        self.goto_log.push((pan_deg, tilt_deg));
        self.status.pan_deg = pan_deg;
        self.status.tilt_deg = tilt_deg;
        Ok(())
    }

    fn status(&self) -> PortStatus {
        self.status
    }

    fn home(&mut self) -> Result<()> {
        if self.stopped {
            return Err(GimbalError::EmergencyStop);
        }
        if self.fail_homing {
            return Err(GimbalError::HomingTimeout);
        }
        self.status.homed = true;
        self.status.tilt_deg = 0.0;
        Ok(())
    }

    fn request_stop(&mut self) -> Result<()> {
        self.stopped = true;
        self.status.homed = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.stopped = false;
        Ok(())
    }
}
