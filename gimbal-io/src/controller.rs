//! Motion controller: homing state machine and interleaved two-axis stepping

use crate::axis::{self, Axis, AxisConfig, Direction};
use crate::error::{GimbalError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Progress is reported every this many loop iterations
const PROGRESS_EVERY: u32 = 20;

/// Homing drives the tilt axis in this direction until the switch triggers
const SEARCH_DIRECTION: Direction = Direction::Reverse;

/// Capability trait over the physical stepper bank
///
/// The real implementation wraps GPIO step/dir/enable lines; the
/// [`SimDriver`](crate::sim::SimDriver) models the same surface for
/// tests and dry-runs.
pub trait StepDriver {
    /// Advance one motor step on an axis
    fn step(&mut self, axis: Axis, direction: Direction) -> Result<()>;

    /// Engage or release holding torque on an axis
    fn set_hold(&mut self, axis: Axis, hold: bool) -> Result<()>;

    /// Current tilt limit switch state (true = triggered)
    fn limit_switch(&mut self) -> Result<bool>;

    /// Wait between steps
    fn pause(&mut self, duration: Duration);
}

/// Hooks the stepping loops call between iterations
///
/// The device session implements these to emit progress lines and to
/// service inbound `STOP` commands while a run is active. Every method
/// has a no-op default; tests that need no hooks pass `&mut ()`.
pub trait MotionHooks {
    /// Stepping for a move is about to begin
    fn moving(&mut self) -> Result<()> {
        Ok(())
    }

    /// Remaining steps per axis at a progress interval
    fn progress(&mut self, _pan_remaining: u32, _tilt_remaining: u32) -> Result<()> {
        Ok(())
    }

    /// Homing began backing off a pre-triggered switch
    fn homing_backoff(&mut self) -> Result<()> {
        Ok(())
    }

    /// Homing began searching for the switch
    fn homing_search(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called every loop iteration; may set the emergency-stop flag
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }
}

impl MotionHooks for () {}

/// Motion controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No tilt reference established; moves are rejected
    Unhomed,
    /// Backing a pre-triggered limit switch off before the search
    HomingBackoff,
    /// Stepping toward the limit switch
    HomingSearch,
    /// Tilt reference established; moves are accepted
    Homed,
    /// Last homing run failed; homing may be retried
    HomingFailed,
    /// Emergency stop engaged; only reset leaves this state
    Stopped,
}

/// Events that drive controller state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Homing run entered the backoff phase
    BackoffStarted,
    /// Homing run entered the search phase
    SearchStarted,
    /// Switch found and offset verified; tilt zero is established
    SwitchFound,
    /// Homing run failed (timeout or switch fault)
    Fault,
    /// Emergency stop engaged
    EmergencyStop,
    /// Emergency stop cleared
    Reset,
}

impl ControllerState {
    /// Next state for an event; unrelated events leave the state unchanged
    pub fn next(self, event: ControllerEvent) -> ControllerState {
        use ControllerEvent as E;
        use ControllerState as S;

        match (self, event) {
            (_, E::EmergencyStop) => S::Stopped,
            (S::Stopped, E::Reset) => S::Unhomed,
            (S::Stopped, _) => S::Stopped,
            // Torque was released, so any prior tilt reference is void
            (_, E::Reset) => S::Unhomed,
            (S::Unhomed | S::Homed | S::HomingFailed, E::BackoffStarted) => S::HomingBackoff,
            (S::HomingBackoff, E::SearchStarted) => S::HomingSearch,
            (S::HomingSearch, E::SwitchFound) => S::Homed,
            (S::HomingBackoff | S::HomingSearch, E::Fault) => S::HomingFailed,
            (state, _) => state,
        }
    }
}

/// Homing run tuning
#[derive(Debug, Clone)]
pub struct HomingConfig {
    /// Single backoff nudge when the switch starts out triggered
    pub backoff_step_deg: f64,
    /// Fault if the switch is still engaged after this much backoff travel
    pub backoff_max_deg: f64,
    /// Wall-clock limit on the switch search, the run's only timeout
    pub search_timeout: Duration,
    /// Delay between search steps (slower than move pacing)
    pub search_step_delay: Duration,
    /// Largest accepted homing offset magnitude
    pub offset_max_deg: f64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        HomingConfig {
            backoff_step_deg: 0.9,
            backoff_max_deg: 10.0,
            search_timeout: Duration::from_secs(30),
            search_step_delay: Duration::from_millis(5),
            offset_max_deg: 15.0,
        }
    }
}

/// Motion controller tuning
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Pan axis geometry
    pub pan: AxisConfig,
    /// Tilt axis geometry
    pub tilt: AxisConfig,
    /// Delay between interleaved move iterations
    pub step_delay: Duration,
    /// Homing parameters
    pub homing: HomingConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            pan: AxisConfig::pan_default(),
            tilt: AxisConfig::tilt_default(),
            step_delay: Duration::from_micros(1200),
            homing: HomingConfig::default(),
        }
    }
}

/// Two-axis motion controller
///
/// Owns the controller state value and the step driver. The emergency-stop
/// flag is the only piece of state mutated from outside an active loop; it
/// is checked every iteration and leaves the controller in
/// [`ControllerState::Stopped`] until an explicit reset.
pub struct MotionController<D: StepDriver> {
    driver: D,
    config: MotionConfig,
    state: ControllerState,
    estop: Arc<AtomicBool>,
    offset_deg: f64,
}

impl<D: StepDriver> MotionController<D> {
    /// Create a controller in the unhomed state
    pub fn new(driver: D, config: MotionConfig) -> Self {
        MotionController {
            driver,
            config,
            state: ControllerState::Unhomed,
            estop: Arc::new(AtomicBool::new(false)),
            offset_deg: 0.0,
        }
    }

    /// Current state machine value
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Shared emergency-stop flag; setting it aborts the active loop
    pub fn estop_flag(&self) -> Arc<AtomicBool> {
        self.estop.clone()
    }

    /// Homing offset applied after the switch triggers
    pub fn offset_deg(&self) -> f64 {
        self.offset_deg
    }

    /// Access the step driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Set the signed homing offset for subsequent runs
    pub fn set_offset(&mut self, offset_deg: f64) -> Result<()> {
        if !offset_deg.is_finite() || offset_deg.abs() > self.config.homing.offset_max_deg {
            return Err(GimbalError::InvalidParameter(format!(
                "homing offset {} outside ±{}",
                offset_deg, self.config.homing.offset_max_deg
            )));
        }
        self.offset_deg = offset_deg;
        Ok(())
    }

    /// Engage the emergency stop and release holding torque
    pub fn stop(&mut self) -> Result<()> {
        self.estop.store(true, Ordering::SeqCst);
        self.state = self.state.next(ControllerEvent::EmergencyStop);
        log::warn!("Emergency stop engaged");
        self.release_hold()
    }

    /// Clear the emergency stop; the tilt reference is gone, so back to unhomed
    pub fn reset(&mut self) {
        self.estop.store(false, Ordering::SeqCst);
        self.state = self.state.next(ControllerEvent::Reset);
        log::info!("Emergency stop cleared, controller unhomed");
    }

    /// Execute a relative move on both axes
    ///
    /// Deltas below the negligible threshold on both axes complete
    /// immediately without issuing a single step. Otherwise the loop
    /// interleaves the axes, stepping each one while its remaining count
    /// is positive, and aborts within one iteration of the emergency-stop
    /// flag being set.
    pub fn move_by<H: MotionHooks>(
        &mut self,
        pan_deg: f64,
        tilt_deg: f64,
        hooks: &mut H,
    ) -> Result<()> {
        match self.state {
            ControllerState::Homed => {}
            ControllerState::Stopped => return Err(GimbalError::EmergencyStop),
            _ => return Err(GimbalError::Unhomed),
        }

        if axis::is_negligible(pan_deg, tilt_deg) {
            log::debug!(
                "Move ({:.3}, {:.3}) below threshold, already at goal",
                pan_deg,
                tilt_deg
            );
            return Ok(());
        }

        let mut pan_remaining = self.config.pan.steps_for(pan_deg);
        let mut tilt_remaining = self.config.tilt.steps_for(tilt_deg);
        let pan_dir = Direction::from_delta(pan_deg);
        let tilt_dir = Direction::from_delta(tilt_deg);

        log::info!(
            "Move ({:.2}, {:.2}) deg: {} pan steps, {} tilt steps",
            pan_deg,
            tilt_deg,
            pan_remaining,
            tilt_remaining
        );

        self.driver.set_hold(Axis::Pan, true)?;
        self.driver.set_hold(Axis::Tilt, true)?;
        hooks.moving()?;

        let mut iteration: u32 = 0;
        while pan_remaining > 0 || tilt_remaining > 0 {
            hooks.poll()?;
            if self.estop_engaged() {
                return self.abort_stopped();
            }

            if pan_remaining > 0 {
                self.driver.step(Axis::Pan, pan_dir)?;
                pan_remaining -= 1;
            }
            if tilt_remaining > 0 {
                self.driver.step(Axis::Tilt, tilt_dir)?;
                tilt_remaining -= 1;
            }

            iteration += 1;
            if iteration % PROGRESS_EVERY == 0 && (pan_remaining > 0 || tilt_remaining > 0) {
                hooks.progress(pan_remaining, tilt_remaining)?;
            }
            self.driver.pause(self.config.step_delay);
        }

        // Torque stays engaged so the head holds still for the capture
        Ok(())
    }

    /// Run the homing sequence on the tilt axis
    ///
    /// Backoff (when the switch starts out triggered), then search until
    /// the switch triggers or the timeout elapses, then the signed offset
    /// move. The post-offset rest point becomes tilt zero; holding torque
    /// is released once homed.
    pub fn home<H: MotionHooks>(&mut self, hooks: &mut H) -> Result<()> {
        if self.state == ControllerState::Stopped {
            return Err(GimbalError::EmergencyStop);
        }

        self.driver.set_hold(Axis::Tilt, true)?;

        let run = self
            .backoff(hooks)
            .and_then(|_| self.search(hooks))
            .and_then(|_| self.apply_offset(hooks));

        match run {
            Ok(()) => {
                self.state = self.state.next(ControllerEvent::SwitchFound);
                self.driver.set_hold(Axis::Tilt, false)?;
                log::info!("Homing complete, tilt zeroed (offset {:.2} deg)", self.offset_deg);
                Ok(())
            }
            Err(GimbalError::EmergencyStop) => {
                self.abort_stopped().and(Err(GimbalError::EmergencyStop))
            }
            Err(e) => {
                self.state = self.state.next(ControllerEvent::Fault);
                self.driver.set_hold(Axis::Tilt, false)?;
                log::warn!("Homing failed: {}", e);
                Err(e)
            }
        }
    }

    fn backoff<H: MotionHooks>(&mut self, hooks: &mut H) -> Result<()> {
        self.state = self.state.next(ControllerEvent::BackoffStarted);
        if !self.driver.limit_switch()? {
            return Ok(());
        }

        hooks.homing_backoff()?;
        log::info!("Limit switch engaged before homing, backing off");

        let budget = self.config.tilt.steps_for(self.config.homing.backoff_max_deg);
        let nudge = self
            .config
            .tilt
            .steps_for(self.config.homing.backoff_step_deg)
            .max(1);
        let mut taken = 0u32;

        while self.driver.limit_switch()? {
            hooks.poll()?;
            if self.estop_engaged() {
                return Err(GimbalError::EmergencyStop);
            }
            if taken >= budget {
                return Err(GimbalError::HomingFault("switch never released during backoff"));
            }
            for _ in 0..nudge.min(budget - taken) {
                self.driver.step(Axis::Tilt, SEARCH_DIRECTION.opposite())?;
                taken += 1;
            }
            self.driver.pause(self.config.homing.search_step_delay);
        }
        Ok(())
    }

    fn search<H: MotionHooks>(&mut self, hooks: &mut H) -> Result<()> {
        self.state = self.state.next(ControllerEvent::SearchStarted);
        hooks.homing_search()?;
        log::info!("Searching for tilt limit switch");

        let deadline = Instant::now() + self.config.homing.search_timeout;
        while !self.driver.limit_switch()? {
            hooks.poll()?;
            if self.estop_engaged() {
                return Err(GimbalError::EmergencyStop);
            }
            if Instant::now() >= deadline {
                return Err(GimbalError::HomingTimeout);
            }
            self.driver.step(Axis::Tilt, SEARCH_DIRECTION)?;
            self.driver.pause(self.config.homing.search_step_delay);
        }
        Ok(())
    }

    /// Offset move after the switch triggers; the switch must not still be
    /// engaged afterwards, otherwise the zero point is ambiguous
    fn apply_offset<H: MotionHooks>(&mut self, hooks: &mut H) -> Result<()> {
        let steps = self.config.tilt.steps_for(self.offset_deg);
        if steps == 0 {
            return Ok(());
        }

        let direction = Direction::from_delta(self.offset_deg);
        for _ in 0..steps {
            hooks.poll()?;
            if self.estop_engaged() {
                return Err(GimbalError::EmergencyStop);
            }
            self.driver.step(Axis::Tilt, direction)?;
            self.driver.pause(self.config.step_delay);
        }

        if self.driver.limit_switch()? {
            return Err(GimbalError::HomingFault("switch still engaged after offset move"));
        }
        Ok(())
    }

    fn estop_engaged(&self) -> bool {
        self.estop.load(Ordering::SeqCst)
    }

    fn abort_stopped(&mut self) -> Result<()> {
        self.state = self.state.next(ControllerEvent::EmergencyStop);
        self.release_hold()?;
        Err(GimbalError::EmergencyStop)
    }

    fn release_hold(&mut self) -> Result<()> {
        self.driver.set_hold(Axis::Pan, false)?;
        self.driver.set_hold(Axis::Tilt, false)
    }
}
