//! Simulated stepper bank for tests and dry-runs

use crate::axis::{Axis, Direction};
use crate::controller::StepDriver;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Limit switch behavior of a simulated rig
#[derive(Debug, Clone, Copy, Default)]
enum SwitchModel {
    /// Never triggers
    #[default]
    Absent,
    /// Triggered whenever the tilt position is at or below this step
    Below(i64),
    /// Always triggered (wiring fault)
    Stuck,
}

#[derive(Default)]
struct SimInner {
    log: Vec<(Axis, Direction)>,
    pan_position: i64,
    tilt_position: i64,
    pan_hold: bool,
    tilt_hold: bool,
    switch: SwitchModel,
}

/// Step driver that moves virtual axes instead of motors
///
/// Positions are tracked in motor steps per axis. Clones share state, so
/// a test can keep a handle while the controller owns the driver.
#[derive(Clone)]
pub struct SimDriver {
    inner: Arc<Mutex<SimInner>>,
}

impl SimDriver {
    /// Rig without a reachable limit switch
    pub fn new() -> Self {
        SimDriver {
            inner: Arc::new(Mutex::new(SimInner::default())),
        }
    }

    /// Rig whose switch engages at or below the given tilt step
    pub fn with_switch_at(step: i64) -> Self {
        let driver = SimDriver::new();
        driver.inner.lock().switch = SwitchModel::Below(step);
        driver
    }

    /// Rig whose switch never releases
    pub fn with_switch_stuck() -> Self {
        let driver = SimDriver::new();
        driver.inner.lock().switch = SwitchModel::Stuck;
        driver
    }

    /// Move or remove the switch region mid-test
    pub fn set_switch_at(&self, step: Option<i64>) {
        self.inner.lock().switch = match step {
            Some(s) => SwitchModel::Below(s),
            None => SwitchModel::Absent,
        };
    }

    /// Every step taken so far, in order
    pub fn log(&self) -> Vec<(Axis, Direction)> {
        self.inner.lock().log.clone()
    }

    /// Forget the step log (positions are kept)
    pub fn clear_log(&self) {
        self.inner.lock().log.clear();
    }

    /// Pan position in motor steps from power-on
    pub fn pan_position(&self) -> i64 {
        self.inner.lock().pan_position
    }

    /// Tilt position in motor steps from power-on
    pub fn tilt_position(&self) -> i64 {
        self.inner.lock().tilt_position
    }

    /// Holding torque state of an axis
    pub fn holding(&self, axis: Axis) -> bool {
        let inner = self.inner.lock();
        match axis {
            Axis::Pan => inner.pan_hold,
            Axis::Tilt => inner.tilt_hold,
        }
    }
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StepDriver for SimDriver {
    fn step(&mut self, axis: Axis, direction: Direction) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.log.push((axis, direction));
        match axis {
            Axis::Pan => inner.pan_position += direction.sign(),
            Axis::Tilt => inner.tilt_position += direction.sign(),
        }
        Ok(())
    }

    fn set_hold(&mut self, axis: Axis, hold: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        match axis {
            Axis::Pan => inner.pan_hold = hold,
            Axis::Tilt => inner.tilt_hold = hold,
        }
        Ok(())
    }

    fn limit_switch(&mut self) -> Result<bool> {
        let inner = self.inner.lock();
        let engaged = match inner.switch {
            SwitchModel::Absent => false,
            SwitchModel::Below(at) => inner.tilt_position <= at,
            SwitchModel::Stuck => true,
        };
        Ok(engaged)
    }

    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}
