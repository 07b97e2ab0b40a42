//! Capture run coordination
//!
//! Walks the planned route one leaf at a time: carriage to the standoff
//! point, gimbal to the fitted aim angles, a stabilization pause, then the
//! shutter and a metadata record. The coordinator holds exclusive mutable
//! access to every collaborator for the whole run, so no command can
//! interleave with another.
//!
//! The first refusal from any collaborator ends the run; everything
//! captured before it is handed back together with the failure, so a half
//! finished route still yields its photographs. Only a fully completed
//! route is followed by the best-effort return to the rest pose.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use nalgebra::Point3;

use canopy::LeafModel;
use gimbal_io::{GimbalError, MotionPort};

use crate::error::{NavError, Result};
use crate::rig::{CameraPort, CaptureRecord, CncPort, MetadataSink, RobotPose, epoch_seconds};

/// Capture run tuning
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Settle time between aiming and the shutter
    pub stabilization: Duration,
    /// Negate commanded tilt for rigs with a mirrored tilt axis
    pub invert_tilt: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            stabilization: Duration::from_secs(3),
            invert_tilt: false,
        }
    }
}

/// Why a run stopped early
#[derive(Debug)]
pub struct RunFailure {
    /// Leaf being visited when the run died; `None` for failures before
    /// the first leaf (homing, abort during setup)
    pub leaf_id: Option<u32>,
    pub error: NavError,
}

/// Outcome of a capture run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Records written before the run ended, in route order
    pub captured: Vec<CaptureRecord>,
    /// Present when the run stopped before the route was done
    pub failure: Option<RunFailure>,
}

impl RunReport {
    /// True when every planned leaf was captured
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Drives one capture run over the route
pub struct CaptureCoordinator<'a> {
    gimbal: &'a mut dyn MotionPort,
    cnc: &'a mut dyn CncPort,
    camera: &'a mut dyn CameraPort,
    sink: &'a mut dyn MetadataSink,
    config: CoordinatorConfig,
    abort: Arc<AtomicBool>,
}

impl<'a> CaptureCoordinator<'a> {
    pub fn new(
        gimbal: &'a mut dyn MotionPort,
        cnc: &'a mut dyn CncPort,
        camera: &'a mut dyn CameraPort,
        sink: &'a mut dyn MetadataSink,
        config: CoordinatorConfig,
    ) -> Self {
        CaptureCoordinator {
            gimbal,
            cnc,
            camera,
            sink,
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that aborts the run between hardware commands
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Visit every leaf on the route in order
    ///
    /// Homes the gimbal first when it has no tilt reference. Stops at the
    /// first refusal and reports what was captured up to that point.
    pub fn run(&mut self, route: &[LeafModel]) -> RunReport {
        let mut report = RunReport::default();

        if !self.gimbal.status().homed {
            log::info!("Gimbal is unhomed, homing before the route");
            if let Err(e) = self.home_checked() {
                log::warn!("Run aborted before the first leaf: {e}");
                report.failure = Some(RunFailure {
                    leaf_id: None,
                    error: e,
                });
                return report;
            }
        }

        for leaf in route {
            match self.visit(leaf) {
                Ok(record) => report.captured.push(record),
                Err(e) => {
                    log::warn!("Run aborted at leaf {}: {e}", leaf.id);
                    report.failure = Some(RunFailure {
                        leaf_id: Some(leaf.id),
                        error: e,
                    });
                    return report;
                }
            }
        }

        log::info!("Route complete, {} leaves captured", report.captured.len());
        self.return_to_rest();
        report
    }

    fn home_checked(&mut self) -> Result<()> {
        self.check_abort()?;
        self.gimbal.home()?;
        Ok(())
    }

    /// One leaf: move, aim, settle, shoot, record
    fn visit(&mut self, leaf: &LeafModel) -> Result<CaptureRecord> {
        self.check_abort()?;
        log::info!(
            "Leaf {}: carriage to ({:.3}, {:.3}, {:.3})",
            leaf.id,
            leaf.target.x,
            leaf.target.y,
            leaf.target.z
        );
        self.cnc.goto(leaf.target)?;

        self.check_abort()?;
        let tilt = if self.config.invert_tilt {
            -leaf.orientation.tilt_deg
        } else {
            leaf.orientation.tilt_deg
        };
        self.gimbal.goto(leaf.orientation.pan_deg, tilt)?;

        // The settle window is where an operator abort usually lands.
        thread::sleep(self.config.stabilization);
        self.check_abort()?;
        self.camera.capture()?;

        let position = self.cnc.position();
        let status = self.gimbal.status();
        let record = CaptureRecord {
            leaf_id: leaf.id,
            pose: RobotPose {
                x: position.x,
                y: position.y,
                z: position.z,
                pan_deg: status.pan_deg,
                tilt_deg: status.tilt_deg,
            },
            timestamp: epoch_seconds(),
        };
        self.sink.record(&record)?;
        Ok(record)
    }

    fn check_abort(&mut self) -> Result<()> {
        if self.abort.load(Ordering::SeqCst) {
            log::warn!("Abort requested, stopping the rig");
            if let Err(e) = self.gimbal.request_stop() {
                log::warn!("Stop request failed: {e}");
            }
            return Err(NavError::Gimbal(GimbalError::EmergencyStop));
        }
        Ok(())
    }

    /// Park the rig after a completed route; failures here only log
    fn return_to_rest(&mut self) {
        if let Err(e) = self.gimbal.goto(0.0, 0.0) {
            log::warn!("Rest pose move failed: {e}");
        }
        if let Err(e) = self.cnc.goto(Point3::origin()) {
            log::warn!("Carriage return failed: {e}");
        }
    }
}
