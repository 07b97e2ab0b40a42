//! leaf-nav - Leaf photography orchestrator
//!
//! One run end to end: load the reconstructed plant cloud, detect
//! photographable leaves, let the operator pick a subset, order the picks
//! into a nearest-first route and capture every stop with the CNC/gimbal
//! rig. Capture metadata lands in a JSON-lines log under the configured
//! output directory.
//!
//! With `capture.simulate` set (the default) the gimbal is served by an
//! in-process device thread over a memory link, so a full run works on a
//! bench with no hardware attached.

mod config;
mod coordinator;
mod error;
mod prompt;
mod rig;

use std::env;
use std::sync::atomic::Ordering;
use std::time::Duration;

use nalgebra::Point3;

use canopy::{LeafModel, PointCloud, Selection, detect_leaves, plan_route};
use gimbal_io::{GimbalDriver, MotionPort, SerialTransport, Transport};

use crate::config::AppConfig;
use crate::coordinator::{CaptureCoordinator, CoordinatorConfig, RunReport};
use crate::error::{NavError, Result};
use crate::prompt::{StdinPrompt, select_leaves};
use crate::rig::{JsonlSink, SimulatedCamera, SimulatedCnc, SimulatedLink};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `leaf-nav <path>` (positional)
/// - `leaf-nav --config <path>` (flag-based)
/// - `leaf-nav -c <path>` (short flag)
///
/// Defaults to `leaf-nav.toml` in the working directory.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "leaf-nav.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = parse_config_path();
    log::info!("Using config: {config_path}");
    let config = AppConfig::load_or_default(&config_path)?;

    // =========================================================================
    // Detection
    // =========================================================================

    log::info!("Loading cloud {}", config.cloud.path);
    let cloud = PointCloud::load(&config.cloud.path, config.cloud.scale)?;
    let detection = detect_leaves(&cloud, &config.detection_params()?)?;
    if detection.leaves.is_empty() {
        log::warn!("No photographable leaves found, nothing to do");
        return Ok(());
    }
    log::info!("Detected {} leaves", detection.leaves.len());

    // =========================================================================
    // Selection and route
    // =========================================================================

    let selected = match select_leaves(&mut StdinPrompt, &detection.leaves)? {
        Selection::Leaves(ids) => ids,
        Selection::Quit => {
            log::info!("Operator quit before capture");
            return Ok(());
        }
    };
    let route = plan_route(&detection.leaves, &selected, Point3::origin());
    log::info!("Route: {} stops", route.len());

    // =========================================================================
    // Capture
    // =========================================================================

    let report = if config.capture.simulate {
        log::info!("Simulate mode: serving an in-process gimbal");
        let (link, _server) = SimulatedLink::spawn(config.motion_config())?;
        drive(link, &config, &route)?
    } else {
        log::info!(
            "Opening gimbal port {} at {} baud",
            config.gimbal.port,
            config.gimbal.baud
        );
        let transport = SerialTransport::open(&config.gimbal.port, config.gimbal.baud)?;
        drive(transport, &config, &route)?
    };

    if let Some(failure) = report.failure {
        match failure.leaf_id {
            Some(id) => log::error!("Run aborted at leaf {id}: {}", failure.error),
            None => log::error!("Run aborted before the first leaf: {}", failure.error),
        }
        return Err(failure.error);
    }
    log::info!("Run complete: {} leaves captured", report.captured.len());
    Ok(())
}

/// Build the gimbal driver on `transport` and run the route over it
fn drive<T: Transport>(transport: T, config: &AppConfig, route: &[LeafModel]) -> Result<RunReport> {
    let mut gimbal = GimbalDriver::with_config(transport, config.driver_config());
    if config.gimbal.homing_offset_deg != 0.0 {
        gimbal.set_offset(config.gimbal.homing_offset_deg)?;
    }
    run_capture(&mut gimbal, config, route)
}

/// Wire up the rig collaborators and hand the route to the coordinator
fn run_capture(
    gimbal: &mut dyn MotionPort,
    config: &AppConfig,
    route: &[LeafModel],
) -> Result<RunReport> {
    let mut cnc = SimulatedCnc::new();
    let mut camera = SimulatedCamera::new();
    let mut sink = JsonlSink::create(&config.capture.output_dir)?;
    log::info!("Capture log: {}", sink.path().display());

    let coordinator_config = CoordinatorConfig {
        stabilization: Duration::from_secs_f64(config.capture.stabilization_secs),
        invert_tilt: config.capture.invert_tilt,
    };
    let mut coordinator =
        CaptureCoordinator::new(gimbal, &mut cnc, &mut camera, &mut sink, coordinator_config);

    let abort = coordinator.abort_flag();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        abort.store(true, Ordering::SeqCst);
    })
    .map_err(|e| NavError::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    Ok(coordinator.run(route))
}
