//! Rig collaborators around the gimbal head
//!
//! The gimbal already speaks through [`MotionPort`](gimbal_io::MotionPort);
//! the CNC carriage and the camera trigger get the same treatment here, a
//! one-method seam each, so a capture run can be driven end-to-end with or
//! without hardware on the bench. Capture metadata lands in an append-only
//! JSON-lines log, one record per shot.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use gimbal_io::{DeviceSession, MemoryLink, MotionConfig, MotionController, SimDriver};

use crate::error::{NavError, Result};

/// Full rig pose at the moment of capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pan_deg: f64,
    pub tilt_deg: f64,
}

/// One line of the capture log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Leaf the shot was aimed at
    pub leaf_id: u32,
    /// Rig pose when the shutter fired
    pub pose: RobotPose,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

/// Capability trait over the CNC carriage moving the gimbal
pub trait CncPort {
    /// Move the carriage to an absolute position in meters
    fn goto(&mut self, target: Point3<f64>) -> Result<()>;

    /// Current commanded position
    fn position(&self) -> Point3<f64>;
}

/// Capability trait over the camera trigger
pub trait CameraPort {
    /// Fire the shutter once
    fn capture(&mut self) -> Result<()>;
}

/// Destination for capture records
pub trait MetadataSink {
    fn record(&mut self, record: &CaptureRecord) -> Result<()>;
}

/// Seconds since the Unix epoch, zero if the clock reads before it
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================
// Simulated collaborators
// ============================================================

/// In-memory CNC carriage for dry-runs and coordinator tests
pub struct SimulatedCnc {
    position: Point3<f64>,
    moves: Vec<Point3<f64>>,
    fail_on_move: Option<usize>,
}

impl SimulatedCnc {
    /// Fresh carriage parked at the origin
    pub fn new() -> Self {
        SimulatedCnc {
            position: Point3::origin(),
            moves: Vec::new(),
            fail_on_move: None,
        }
    }

    /// Fail the nth accepted move (0-based)
    pub fn fail_on_move(&mut self, index: usize) {
        self.fail_on_move = Some(index);
    }

    /// Every accepted move, in order
    pub fn moves(&self) -> &[Point3<f64>] {
        &self.moves
    }
}

impl Default for SimulatedCnc {
    fn default() -> Self {
        Self::new()
    }
}

impl CncPort for SimulatedCnc {
    fn goto(&mut self, target: Point3<f64>) -> Result<()> {
        if self.fail_on_move == Some(self.moves.len()) {
            return Err(NavError::Cnc("Carriage stalled".to_string()));
        }
        self.moves.push(target);
        self.position = target;
        Ok(())
    }

    fn position(&self) -> Point3<f64> {
        self.position
    }
}

/// In-memory camera for dry-runs and coordinator tests
#[derive(Debug, Default)]
pub struct SimulatedCamera {
    captures: usize,
    fail_on_capture: Option<usize>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the nth capture (0-based)
    pub fn fail_on_capture(&mut self, index: usize) {
        self.fail_on_capture = Some(index);
    }

    /// Shots fired so far
    pub fn captures(&self) -> usize {
        self.captures
    }
}

impl CameraPort for SimulatedCamera {
    fn capture(&mut self) -> Result<()> {
        if self.fail_on_capture == Some(self.captures) {
            return Err(NavError::Camera("Trigger did not acknowledge".to_string()));
        }
        self.captures += 1;
        Ok(())
    }
}

// ============================================================
// Metadata sinks
// ============================================================

/// Append-only JSON-lines capture log
///
/// One record per line, flushed as written, so an interrupted run keeps
/// everything captured up to the failure.
pub struct JsonlSink {
    file: File,
    path: PathBuf,
}

impl JsonlSink {
    /// Open `captures.jsonl` under `dir`, creating the directory as needed
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join("captures.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlSink { file, path })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetadataSink for JsonlSink {
    fn record(&mut self, record: &CaptureRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}

/// Record collector for tests
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<CaptureRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[CaptureRecord] {
        &self.records
    }
}

impl MetadataSink for MemorySink {
    fn record(&mut self, record: &CaptureRecord) -> Result<()> {
        self.records.push(*record);
        Ok(())
    }
}

// ============================================================
// In-process gimbal device
// ============================================================

/// Tilt switch location of the simulated rig, in motor steps
const SIM_SWITCH_STEP: i64 = -40;

/// An in-process gimbal device served over a memory link
///
/// Runs the same session loop the device side runs on hardware, stepping
/// a simulated rig with its tilt switch a little below zero. Dropping the
/// value shuts the session down and joins the thread.
pub struct SimulatedLink {
    shutdown: Arc<AtomicBool>,
    server: Option<JoinHandle<()>>,
}

impl SimulatedLink {
    /// Serve a simulated device and hand back the host end of the link
    pub fn spawn(config: MotionConfig) -> Result<(MemoryLink, SimulatedLink)> {
        let (host_end, device_end) = MemoryLink::pair();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let server = thread::Builder::new()
            .name("gimbal-sim".to_string())
            .spawn(move || {
                let sim = SimDriver::with_switch_at(SIM_SWITCH_STEP);
                let mut session = DeviceSession::new(device_end, MotionController::new(sim, config));
                if let Err(e) = session.run(&flag) {
                    log::error!("Simulated gimbal session failed: {e}");
                }
            })?;
        Ok((
            host_end,
            SimulatedLink {
                shutdown,
                server: Some(server),
            },
        ))
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gimbal_io::{DriverConfig, GimbalDriver, HomingConfig};
    use std::time::Duration;

    fn sample_record(leaf_id: u32) -> CaptureRecord {
        CaptureRecord {
            leaf_id,
            pose: RobotPose {
                x: 0.1,
                y: 0.2,
                z: 0.3,
                pan_deg: 12.0,
                tilt_deg: -4.5,
            },
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_simulated_cnc_tracks_moves() {
        let mut cnc = SimulatedCnc::new();
        cnc.goto(Point3::new(0.1, 0.2, 0.3)).unwrap();
        cnc.goto(Point3::new(0.4, 0.5, 0.6)).unwrap();
        assert_eq!(cnc.position(), Point3::new(0.4, 0.5, 0.6));
        assert_eq!(cnc.moves().len(), 2);
    }

    #[test]
    fn test_simulated_cnc_injected_failure() {
        let mut cnc = SimulatedCnc::new();
        cnc.fail_on_move(1);
        cnc.goto(Point3::new(0.1, 0.0, 0.0)).unwrap();
        let err = cnc.goto(Point3::new(0.2, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, NavError::Cnc(_)));
        assert_eq!(cnc.moves().len(), 1);
        assert_eq!(cnc.position(), Point3::new(0.1, 0.0, 0.0));
    }

    #[test]
    fn test_simulated_camera_injected_failure() {
        let mut camera = SimulatedCamera::new();
        camera.fail_on_capture(1);
        camera.capture().unwrap();
        let err = camera.capture().unwrap_err();
        assert!(matches!(err, NavError::Camera(_)));
        assert_eq!(camera.captures(), 1);
    }

    #[test]
    fn test_memory_sink_collects_records() {
        let mut sink = MemorySink::new();
        sink.record(&sample_record(3)).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].leaf_id, 3);
    }

    #[test]
    fn test_jsonl_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlSink::create(dir.path().join("run")).unwrap();
        sink.record(&sample_record(1)).unwrap();
        sink.record(&sample_record(2)).unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: CaptureRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.leaf_id, 2);
        assert_eq!(parsed.pose.tilt_deg, -4.5);
        assert_eq!(parsed.timestamp, 1_700_000_000);
    }

    #[test]
    fn test_jsonl_sink_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut sink = JsonlSink::create(dir.path()).unwrap();
            sink.record(&sample_record(1)).unwrap();
        }
        let mut sink = JsonlSink::create(dir.path()).unwrap();
        sink.record(&sample_record(2)).unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_simulated_link_serves_a_driver() {
        let config = MotionConfig {
            step_delay: Duration::from_micros(200),
            homing: HomingConfig {
                search_step_delay: Duration::from_micros(100),
                search_timeout: Duration::from_secs(5),
                ..HomingConfig::default()
            },
            ..MotionConfig::default()
        };
        let (link, _server) = SimulatedLink::spawn(config).unwrap();
        let mut driver = GimbalDriver::with_config(link, DriverConfig::default());

        driver.home().unwrap();
        driver.goto(10.0, -5.0).unwrap();
        assert_eq!(driver.pose(), (10.0, -5.0));
    }
}
