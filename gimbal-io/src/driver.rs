//! Client driver for a gimbal served over a transport

use crate::axis;
use crate::error::{GimbalError, Result};
use crate::port::{MotionPort, PortStatus};
use crate::protocol::{Command, Response};
use crate::transport::{self, Transport};
use std::time::{Duration, Instant};

/// Moves with both deltas under this use the tighter ack deadline
const SHORT_MOVE_DEG: f64 = 5.0;

/// Sleep between reads while waiting on an acknowledgement
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Acknowledgement deadlines
///
/// Deadlines are inactivity windows: any line from the device (progress
/// included) resets the clock, so only true silence trips them.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Deadline while waiting on a move acknowledgement
    pub ack_timeout: Duration,
    /// Tighter deadline for short moves
    pub short_ack_timeout: Duration,
    /// Deadline for a homing run, covering the full search window
    pub homing_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            ack_timeout: Duration::from_secs(5),
            short_ack_timeout: Duration::from_secs(2),
            homing_timeout: Duration::from_secs(40),
        }
    }
}

/// Line the driver is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    GoalReached,
    HomingComplete,
    Stopped,
    Ok,
}

/// Hardware-backed gimbal client
///
/// Tracks the commanded pose, converts absolute goals into relative
/// degree deltas, and speaks the line protocol over the transport. Pan
/// deltas are normalized to the shortest path; the tilt axis is
/// mechanically bounded and never wraps.
pub struct GimbalDriver<T: Transport> {
    transport: T,
    config: DriverConfig,
    pending: Vec<u8>,
    pan_deg: f64,
    tilt_deg: f64,
    homed: bool,
}

impl<T: Transport> GimbalDriver<T> {
    /// Create a driver with default deadlines
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DriverConfig::default())
    }

    /// Create a driver with explicit deadlines
    pub fn with_config(transport: T, config: DriverConfig) -> Self {
        GimbalDriver {
            transport,
            config,
            pending: Vec::new(),
            pan_deg: 0.0,
            tilt_deg: 0.0,
            homed: false,
        }
    }

    /// Commanded pose in degrees (pan, tilt)
    pub fn pose(&self) -> (f64, f64) {
        (self.pan_deg, self.tilt_deg)
    }

    /// Move to an absolute orientation
    ///
    /// A goal within the negligible threshold of the current pose sends
    /// nothing, and the tracked pose is left untouched so sub-threshold
    /// goals cannot accumulate into real error.
    pub fn goto(&mut self, pan_deg: f64, tilt_deg: f64) -> Result<()> {
        let pan_delta = wrap_deg(pan_deg - self.pan_deg);
        let tilt_delta = tilt_deg - self.tilt_deg;

        if axis::is_negligible(pan_delta, tilt_delta) {
            log::debug!("Goal ({:.2}, {:.2}) within threshold, not moving", pan_deg, tilt_deg);
            return Ok(());
        }

        self.drain_stale()?;
        let line = Command::Move {
            pan_deg: pan_delta,
            tilt_deg: tilt_delta,
        }
        .encode();
        transport::write_line(&mut self.transport, &line)?;

        let window = if pan_delta.abs() < SHORT_MOVE_DEG && tilt_delta.abs() < SHORT_MOVE_DEG {
            self.config.short_ack_timeout
        } else {
            self.config.ack_timeout
        };
        self.await_ack(window, Ack::GoalReached)?;

        self.pan_deg = wrap_deg(pan_deg);
        self.tilt_deg = tilt_deg;
        Ok(())
    }

    /// Run the homing sequence; on success the tilt pose is zero
    pub fn home(&mut self) -> Result<()> {
        self.drain_stale()?;
        transport::write_line(&mut self.transport, &Command::Home.encode())?;
        self.await_ack(self.config.homing_timeout, Ack::HomingComplete)?;

        self.tilt_deg = 0.0;
        self.homed = true;
        log::info!("Gimbal homed");
        Ok(())
    }

    /// Set the signed homing offset for subsequent runs
    pub fn set_offset(&mut self, offset_deg: f64) -> Result<()> {
        self.drain_stale()?;
        let line = Command::Offset(offset_deg).encode();
        transport::write_line(&mut self.transport, &line)?;
        self.await_ack(self.config.short_ack_timeout, Ack::Ok)
    }

    /// Engage the emergency stop
    ///
    /// Sent without draining so it goes out immediately; stale lines are
    /// skipped while waiting for the acknowledgement.
    pub fn stop(&mut self) -> Result<()> {
        transport::write_line(&mut self.transport, &Command::Stop.encode())?;
        self.await_ack(self.config.short_ack_timeout, Ack::Stopped)?;
        self.homed = false;
        Ok(())
    }

    /// Clear the emergency stop; the device returns to unhomed
    pub fn reset(&mut self) -> Result<()> {
        self.drain_stale()?;
        transport::write_line(&mut self.transport, &Command::Reset.encode())?;
        self.await_ack(self.config.short_ack_timeout, Ack::Ok)?;
        self.homed = false;
        Ok(())
    }

    /// Discard leftover lines from earlier exchanges
    fn drain_stale(&mut self) -> Result<()> {
        transport::drain_into(&mut self.transport, &mut self.pending)?;
        while let Some(line) = transport::take_line(&mut self.pending) {
            if !line.is_empty() {
                log::debug!("Discarding stale line: {}", line);
            }
        }
        Ok(())
    }

    /// Wait for an acknowledgement, tolerating progress lines
    fn await_ack(&mut self, window: Duration, want: Ack) -> Result<()> {
        let mut last_activity = Instant::now();
        loop {
            transport::drain_into(&mut self.transport, &mut self.pending)?;

            let mut saw_line = false;
            while let Some(line) = transport::take_line(&mut self.pending) {
                if line.is_empty() {
                    continue;
                }
                saw_line = true;
                match Response::parse(&line)? {
                    Response::GoalReached if want == Ack::GoalReached => return Ok(()),
                    Response::HomingComplete if want == Ack::HomingComplete => return Ok(()),
                    Response::Ok if want == Ack::Ok => return Ok(()),
                    Response::Stopped if want == Ack::Stopped => return Ok(()),
                    Response::Stopped => return Err(GimbalError::EmergencyStop),
                    Response::Error(code) => {
                        let error = code.into_error();
                        if matches!(error, GimbalError::Unhomed) {
                            self.homed = false;
                        }
                        return Err(error);
                    }
                    other => log::trace!("Gimbal: {}", other.encode()),
                }
            }

            if saw_line {
                last_activity = Instant::now();
            }
            if last_activity.elapsed() >= window {
                return Err(GimbalError::HardwareTimeout(window));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<T: Transport> MotionPort for GimbalDriver<T> {
    fn goto(&mut self, pan_deg: f64, tilt_deg: f64) -> Result<()> {
        GimbalDriver::goto(self, pan_deg, tilt_deg)
    }

    fn status(&self) -> PortStatus {
        PortStatus {
            homed: self.homed,
            pan_deg: self.pan_deg,
            tilt_deg: self.tilt_deg,
        }
    }

    fn home(&mut self) -> Result<()> {
        GimbalDriver::home(self)
    }

    fn request_stop(&mut self) -> Result<()> {
        self.stop()
    }

    fn reset(&mut self) -> Result<()> {
        GimbalDriver::reset(self)
    }
}

/// Normalize an angle to (-180, 180] degrees
fn wrap_deg(angle: f64) -> f64 {
    let mut wrapped = angle % 360.0;
    if wrapped > 180.0 {
        wrapped -= 360.0;
    } else if wrapped <= -180.0 {
        wrapped += 360.0;
    }
    wrapped
}
