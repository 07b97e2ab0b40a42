//! Device-side session: binds a motion controller to a transport

use crate::controller::{ControllerState, MotionController, MotionHooks, StepDriver};
use crate::error::{GimbalError, Result};
use crate::protocol::{Command, ErrorCode, Response};
use crate::transport::{self, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleep between polls when no command is pending
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Serves the line protocol for one gimbal
///
/// Single-threaded: commands are handled one at a time, and while a move
/// or homing run is stepping, the controller polls the session between
/// iterations so an inbound `STOP` lands within one step. Any other
/// command arriving mid-run is refused with `ERROR: BUSY`.
pub struct DeviceSession<T: Transport, D: StepDriver> {
    transport: T,
    controller: MotionController<D>,
    estop: Arc<AtomicBool>,
    pending: Vec<u8>,
}

impl<T: Transport, D: StepDriver> DeviceSession<T, D> {
    /// Bind a controller to a transport
    pub fn new(transport: T, controller: MotionController<D>) -> Self {
        let estop = controller.estop_flag();
        DeviceSession {
            transport,
            controller,
            estop,
            pending: Vec::new(),
        }
    }

    /// Access the controller (used by tests and status reporting)
    pub fn controller(&self) -> &MotionController<D> {
        &self.controller
    }

    /// Handle at most one pending command line
    ///
    /// Returns whether a line was consumed. Does not block waiting for
    /// input; a partial line stays buffered until its newline arrives.
    pub fn service_next(&mut self) -> Result<bool> {
        transport::drain_into(&mut self.transport, &mut self.pending)?;
        match transport::take_line(&mut self.pending) {
            Some(line) => {
                if !line.is_empty() {
                    self.dispatch(&line)?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Serve command lines until `shutdown` is set
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!("Gimbal session started");
        while !shutdown.load(Ordering::SeqCst) {
            if !self.service_next()? {
                std::thread::sleep(IDLE_POLL);
            }
        }
        log::info!("Gimbal session stopped");
        Ok(())
    }

    fn dispatch(&mut self, line: &str) -> Result<()> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(_) => {
                log::warn!("Rejected command line: {:?}", line);
                return self.respond(Response::Error(ErrorCode::BadCommand));
            }
        };

        match command {
            Command::Move { pan_deg, tilt_deg } => self.handle_move(pan_deg, tilt_deg),
            Command::Home => self.handle_home(),
            Command::Offset(value) => match self.controller.set_offset(value) {
                Ok(()) => self.respond(Response::Ok),
                Err(_) => self.respond(Response::Error(ErrorCode::OffsetRange)),
            },
            Command::Stop => {
                self.controller.stop()?;
                self.respond(Response::Stopped)
            }
            Command::Reset => {
                self.controller.reset();
                self.respond(Response::Ok)
            }
        }
    }

    fn handle_move(&mut self, pan_deg: f64, tilt_deg: f64) -> Result<()> {
        if self.controller.state() == ControllerState::Stopped {
            return self.respond(Response::Error(ErrorCode::Stopped));
        }

        let mut hooks = SessionHooks {
            transport: &mut self.transport,
            pending: &mut self.pending,
            estop: self.estop.clone(),
        };
        match self.controller.move_by(pan_deg, tilt_deg, &mut hooks) {
            Ok(()) => self.respond(Response::GoalReached),
            Err(GimbalError::Unhomed) => self.respond(Response::Error(ErrorCode::Unhomed)),
            Err(GimbalError::EmergencyStop) => self.respond(Response::Stopped),
            Err(e) => Err(e),
        }
    }

    fn handle_home(&mut self) -> Result<()> {
        if self.controller.state() == ControllerState::Stopped {
            return self.respond(Response::Error(ErrorCode::Stopped));
        }

        let mut hooks = SessionHooks {
            transport: &mut self.transport,
            pending: &mut self.pending,
            estop: self.estop.clone(),
        };
        match self.controller.home(&mut hooks) {
            Ok(()) => self.respond(Response::HomingComplete),
            Err(GimbalError::HomingTimeout) => {
                self.respond(Response::Error(ErrorCode::HomingTimeout))
            }
            Err(GimbalError::HomingFault(_)) => {
                self.respond(Response::Error(ErrorCode::HomingFault))
            }
            Err(GimbalError::EmergencyStop) => self.respond(Response::Stopped),
            Err(e) => Err(e),
        }
    }

    fn respond(&mut self, response: Response) -> Result<()> {
        transport::write_line(&mut self.transport, &response.encode())
    }
}

/// Loop hooks wired back to the session's transport
///
/// `poll` is where a `STOP` received mid-run takes effect: it raises the
/// emergency-stop flag the controller checks on the same iteration.
struct SessionHooks<'a, T: Transport> {
    transport: &'a mut T,
    pending: &'a mut Vec<u8>,
    estop: Arc<AtomicBool>,
}

impl<T: Transport> MotionHooks for SessionHooks<'_, T> {
    fn moving(&mut self) -> Result<()> {
        transport::write_line(self.transport, &Response::Moving.encode())
    }

    fn progress(&mut self, pan_remaining: u32, tilt_remaining: u32) -> Result<()> {
        let line = Response::Progress {
            pan_remaining,
            tilt_remaining,
        }
        .encode();
        transport::write_line(self.transport, &line)
    }

    fn homing_backoff(&mut self) -> Result<()> {
        transport::write_line(self.transport, &Response::HomingBackoff.encode())
    }

    fn homing_search(&mut self) -> Result<()> {
        transport::write_line(self.transport, &Response::HomingSearch.encode())
    }

    fn poll(&mut self) -> Result<()> {
        transport::drain_into(self.transport, self.pending)?;
        while let Some(line) = transport::take_line(self.pending) {
            if line.is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Ok(Command::Stop) => {
                    self.estop.store(true, Ordering::SeqCst);
                }
                Ok(_) => {
                    transport::write_line(
                        self.transport,
                        &Response::Error(ErrorCode::Busy).encode(),
                    )?;
                }
                Err(_) => {
                    transport::write_line(
                        self.transport,
                        &Response::Error(ErrorCode::BadCommand).encode(),
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{HomingConfig, MotionConfig};
    use crate::sim::SimDriver;
    use crate::transport::MockTransport;

    fn fast_config() -> MotionConfig {
        MotionConfig {
            step_delay: Duration::ZERO,
            homing: HomingConfig {
                search_step_delay: Duration::ZERO,
                ..HomingConfig::default()
            },
            ..MotionConfig::default()
        }
    }

    fn homed_session(transport: MockTransport) -> DeviceSession<MockTransport, SimDriver> {
        let mut controller =
            MotionController::new(SimDriver::with_switch_at(-50), fast_config());
        controller.home(&mut ()).unwrap();
        DeviceSession::new(transport, controller)
    }

    fn written(transport: &MockTransport) -> String {
        String::from_utf8(transport.get_written()).unwrap()
    }

    #[test]
    fn test_move_reports_progress_and_goal() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"10 -5\n");
        assert!(session.service_next().unwrap());

        // 56 pan / 6 tilt steps; progress every 20 iterations
        assert_eq!(
            written(&transport),
            "MOVING\nMOVING: PAN=36 TILT=0\nMOVING: PAN=16 TILT=0\nGOAL_REACHED\n"
        );
    }

    #[test]
    fn test_negligible_move_short_circuits() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"0.05 0.02\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "GOAL_REACHED\n");
    }

    #[test]
    fn test_move_before_homing_is_refused() {
        let transport = MockTransport::new();
        let controller = MotionController::new(SimDriver::new(), fast_config());
        let mut session = DeviceSession::new(transport.clone(), controller);

        transport.inject_read(b"5 5\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "ERROR: UNHOMED\n");
    }

    #[test]
    fn test_homing_over_the_wire() {
        let transport = MockTransport::new();
        let controller = MotionController::new(SimDriver::with_switch_at(-50), fast_config());
        let mut session = DeviceSession::new(transport.clone(), controller);

        transport.inject_read(b"HOME\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "HOMING: SEARCH\nHOMING_COMPLETE\n");
        assert_eq!(session.controller().state(), ControllerState::Homed);
    }

    #[test]
    fn test_pre_triggered_homing_reports_backoff() {
        let transport = MockTransport::new();
        let controller = MotionController::new(SimDriver::with_switch_at(0), fast_config());
        let mut session = DeviceSession::new(transport.clone(), controller);

        transport.inject_read(b"HOME\n");
        session.service_next().unwrap();
        assert_eq!(
            written(&transport),
            "HOMING: BACKOFF\nHOMING: SEARCH\nHOMING_COMPLETE\n"
        );
    }

    #[test]
    fn test_homing_timeout_reported() {
        let transport = MockTransport::new();
        let mut config = fast_config();
        config.homing.search_timeout = Duration::from_millis(20);
        config.homing.search_step_delay = Duration::from_micros(50);
        let controller = MotionController::new(SimDriver::new(), config);
        let mut session = DeviceSession::new(transport.clone(), controller);

        transport.inject_read(b"HOME\n");
        session.service_next().unwrap();
        assert_eq!(
            written(&transport),
            "HOMING: SEARCH\nERROR: HOMING_TIMEOUT\n"
        );
        assert_eq!(session.controller().state(), ControllerState::HomingFailed);
    }

    #[test]
    fn test_stop_then_reset_lifecycle() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        // STOP queued behind the move aborts it before the first step
        transport.inject_read(b"10 0\nSTOP\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "MOVING\nSTOPPED\n");
        assert_eq!(session.controller().state(), ControllerState::Stopped);
        transport.clear_written();

        transport.inject_read(b"5 0\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "ERROR: STOPPED\n");
        transport.clear_written();

        transport.inject_read(b"RESET\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "OK\n");
        transport.clear_written();

        // Reference was lost with the torque, so homing is required again
        transport.inject_read(b"5 0\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "ERROR: UNHOMED\n");
    }

    #[test]
    fn test_stop_while_idle_acknowledged() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"STOP\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "STOPPED\n");
    }

    #[test]
    fn test_non_stop_command_mid_move_is_busy() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"10 0\nOFFSET 1\n");
        session.service_next().unwrap();

        let output = written(&transport);
        assert!(output.starts_with("MOVING\nERROR: BUSY\n"));
        assert!(output.ends_with("GOAL_REACHED\n"));
        // The refused offset did not stick
        assert_eq!(session.controller().offset_deg(), 0.0);
    }

    #[test]
    fn test_offset_commands() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"OFFSET 3.5\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "OK\n");
        assert_eq!(session.controller().offset_deg(), 3.5);
        transport.clear_written();

        transport.inject_read(b"OFFSET 99\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "ERROR: OFFSET_RANGE\n");
        assert_eq!(session.controller().offset_deg(), 3.5);
    }

    #[test]
    fn test_garbage_line_rejected() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"WOBBLE\n");
        session.service_next().unwrap();
        assert_eq!(written(&transport), "ERROR: BAD_COMMAND\n");
    }

    #[test]
    fn test_blank_lines_ignored() {
        let transport = MockTransport::new();
        let mut session = homed_session(transport.clone());

        transport.inject_read(b"\n\n");
        assert!(session.service_next().unwrap());
        assert!(session.service_next().unwrap());
        assert!(!session.service_next().unwrap());
        assert_eq!(written(&transport), "");
    }
}
