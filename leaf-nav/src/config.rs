//! Configuration for the leaf-nav application
//!
//! One TOML file covers the whole run: where the point cloud lives, how
//! the surface is extracted and segmented, how leaves are fitted, and the
//! serial/motion parameters of the gimbal rig. Sections map one-to-one
//! onto the pipeline stages so a greenhouse operator can tune a stage
//! without reading the code behind it.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canopy::{CropMethod, DetectionParams, FitParams, LinkMode, Roi};
use gimbal_io::{AxisConfig, DriverConfig, HomingConfig, MotionConfig};

use crate::error::{NavError, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub cloud: CloudConfig,
    pub surface: SurfaceConfig,
    pub graph: GraphConfig,
    pub segmentation: SegmentationConfig,
    pub fitting: FittingConfig,
    pub gimbal: GimbalConfig,
    pub capture: CaptureConfig,
}

/// Point cloud input
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    /// Path to the reconstructed plant cloud (PLY or XYZ)
    pub path: String,
    /// Unit conversion applied on load (0.001 for millimeter clouds)
    pub scale: f64,
}

/// Surface extraction parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SurfaceConfig {
    /// Height crop strategy: "single_furthest", "top_percentage" or "none"
    pub crop_method: String,
    /// Fraction of the vertical extent dropped by "top_percentage"
    pub crop_fraction: f64,
    /// Downward slack below the furthest-point height for "single_furthest"
    pub z_offset: f64,
    /// Fixed probe radius in meters; omitted, it is derived from point spacing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    /// Horizontal window isolating the plant from its neighbors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<RoiConfig>,
}

/// Axis-aligned region of interest in meters
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RoiConfig {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl From<RoiConfig> for Roi {
    fn from(c: RoiConfig) -> Self {
        Roi {
            min_x: c.min_x,
            max_x: c.max_x,
            min_y: c.min_y,
            max_y: c.max_y,
        }
    }
}

/// Connectivity graph parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Link mode: "radius" or "knn"
    pub link: String,
    /// Fixed neighborhood radius in meters; omitted, the surface spacing
    /// estimate is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    /// Neighbor count for "knn" mode
    pub knn: usize,
}

/// Louvain segmentation parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentationConfig {
    /// Modularity resolution; omitted, it is derived from point density
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    /// Seed shared by sampling and the restart sequence
    pub seed: u64,
    /// Louvain restarts, best modularity wins
    pub restarts: usize,
    /// Clusters smaller than this are treated as noise; omitted, it is
    /// derived from the surface size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cluster_size: Option<usize>,
}

/// Plane fitting parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FittingConfig {
    /// Camera standoff along the leaf normal, in meters
    pub target_distance: f64,
    /// Distance from the fitted plane under which a point counts as inlier
    pub inlier_distance: f64,
    /// Minimum inlier fraction for a cluster to pass as a leaf
    pub min_inlier_ratio: f64,
}

/// Gimbal hardware and motion parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GimbalConfig {
    /// Serial port of the gimbal controller
    pub port: String,
    /// Serial baud rate
    pub baud: u32,
    /// Pan motor step angle in degrees
    pub pan_step_angle: f64,
    /// Pan gear reduction ratio
    pub pan_reduction: f64,
    /// Tilt motor step angle in degrees
    pub tilt_step_angle: f64,
    /// Tilt gear reduction ratio
    pub tilt_reduction: f64,
    /// Microseconds between interleaved step iterations
    pub step_delay_us: u64,
    /// Homing backoff nudge in degrees
    pub backoff_step_deg: f64,
    /// Maximum homing backoff travel in degrees
    pub backoff_max_deg: f64,
    /// Wall-clock limit on the homing switch search
    pub search_timeout_secs: f64,
    /// Milliseconds between homing search steps
    pub search_step_delay_ms: u64,
    /// Largest accepted homing offset magnitude in degrees
    pub offset_max_deg: f64,
    /// Pan offset applied after homing, for rigs whose switch is not at zero
    pub homing_offset_deg: f64,
    /// Deadline while waiting on a move acknowledgement
    pub ack_timeout_secs: f64,
    /// Tighter deadline for short moves
    pub short_ack_timeout_secs: f64,
    /// Deadline for a full homing run
    pub homing_timeout_secs: f64,
}

/// Capture run parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Settle time between aiming and triggering the camera, in seconds
    pub stabilization_secs: f64,
    /// Negate commanded tilt for rigs with a mirrored tilt axis
    pub invert_tilt: bool,
    /// Directory receiving the capture metadata log
    pub output_dir: String,
    /// Run against the in-process gimbal instead of real hardware
    pub simulate: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    ///
    /// A missing file is the normal first-run case and only warns; a file
    /// that exists but fails to parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "Config file {} not found, using greenhouse defaults",
                path.display()
            );
            Ok(Self::greenhouse_defaults())
        }
    }

    /// Default configuration for the greenhouse rig
    ///
    /// Matches the two-axis gimbal build: 0.9 degree steppers, 5:1 pan
    /// reduction, direct-drive tilt. Production runs should use a proper
    /// TOML configuration file.
    pub fn greenhouse_defaults() -> Self {
        Self {
            cloud: CloudConfig {
                path: "plant.ply".to_string(),
                scale: 0.001,
            },
            surface: SurfaceConfig {
                crop_method: "single_furthest".to_string(),
                crop_fraction: 0.25,
                z_offset: 0.0,
                alpha: None,
                roi: None,
            },
            graph: GraphConfig {
                link: "radius".to_string(),
                radius: None,
                knn: 8,
            },
            segmentation: SegmentationConfig {
                resolution: None,
                seed: 42,
                restarts: 5,
                min_cluster_size: None,
            },
            fitting: FittingConfig {
                target_distance: 0.10,
                inlier_distance: 0.005,
                min_inlier_ratio: 0.7,
            },
            gimbal: GimbalConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud: 9600,
                pan_step_angle: 0.9,
                pan_reduction: 5.0,
                tilt_step_angle: 0.9,
                tilt_reduction: 1.0,
                step_delay_us: 1200,
                backoff_step_deg: 0.9,
                backoff_max_deg: 10.0,
                search_timeout_secs: 30.0,
                search_step_delay_ms: 5,
                offset_max_deg: 15.0,
                homing_offset_deg: 0.0,
                ack_timeout_secs: 5.0,
                short_ack_timeout_secs: 2.0,
                homing_timeout_secs: 40.0,
            },
            capture: CaptureConfig {
                stabilization_secs: 3.0,
                invert_tilt: false,
                output_dir: "captures".to_string(),
                simulate: true,
            },
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Detection parameters for the canopy pipeline
    pub fn detection_params(&self) -> Result<DetectionParams> {
        let crop = match self.surface.crop_method.as_str() {
            "none" => CropMethod::None,
            "top_percentage" => CropMethod::TopPercentage {
                percentage: self.surface.crop_fraction,
            },
            "single_furthest" => CropMethod::SingleFurthest {
                z_offset: self.surface.z_offset,
            },
            other => {
                return Err(NavError::Config(format!(
                    "Unknown crop_method '{other}' (expected 'none', 'top_percentage' or 'single_furthest')"
                )));
            }
        };
        let link = match self.graph.link.as_str() {
            "radius" => LinkMode::Radius(self.graph.radius),
            "knn" => LinkMode::Knn(self.graph.knn),
            other => {
                return Err(NavError::Config(format!(
                    "Unknown graph link mode '{other}' (expected 'radius' or 'knn')"
                )));
            }
        };
        Ok(DetectionParams {
            crop,
            roi: self.surface.roi.map(Roi::from),
            alpha: self.surface.alpha,
            link,
            seed: self.segmentation.seed,
            resolution: self.segmentation.resolution,
            min_cluster_size: self.segmentation.min_cluster_size,
            restarts: self.segmentation.restarts,
            fit: FitParams {
                target_distance: self.fitting.target_distance,
                min_inlier_ratio: self.fitting.min_inlier_ratio,
                inlier_distance: self.fitting.inlier_distance,
            },
        })
    }

    /// Motion controller parameters for the gimbal firmware side
    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            pan: AxisConfig::new(self.gimbal.pan_step_angle, self.gimbal.pan_reduction),
            tilt: AxisConfig::new(self.gimbal.tilt_step_angle, self.gimbal.tilt_reduction),
            step_delay: Duration::from_micros(self.gimbal.step_delay_us),
            homing: HomingConfig {
                backoff_step_deg: self.gimbal.backoff_step_deg,
                backoff_max_deg: self.gimbal.backoff_max_deg,
                search_timeout: Duration::from_secs_f64(self.gimbal.search_timeout_secs),
                search_step_delay: Duration::from_millis(self.gimbal.search_step_delay_ms),
                offset_max_deg: self.gimbal.offset_max_deg,
            },
        }
    }

    /// Ack deadlines for the host-side gimbal driver
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            ack_timeout: Duration::from_secs_f64(self.gimbal.ack_timeout_secs),
            short_ack_timeout: Duration::from_secs_f64(self.gimbal.short_ack_timeout_secs),
            homing_timeout: Duration::from_secs_f64(self.gimbal.homing_timeout_secs),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::greenhouse_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::greenhouse_defaults();
        assert_eq!(config.cloud.path, "plant.ply");
        assert_eq!(config.cloud.scale, 0.001);
        assert_eq!(config.surface.crop_method, "single_furthest");
        assert!(config.surface.alpha.is_none());
        assert!(config.surface.roi.is_none());
        assert_eq!(config.graph.link, "radius");
        assert_eq!(config.segmentation.seed, 42);
        assert_eq!(config.fitting.target_distance, 0.10);
        assert_eq!(config.gimbal.port, "/dev/ttyUSB0");
        assert_eq!(config.gimbal.pan_reduction, 5.0);
        assert!(config.capture.simulate);
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::greenhouse_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        // Should contain all sections
        assert!(toml_string.contains("[cloud]"));
        assert!(toml_string.contains("[surface]"));
        assert!(toml_string.contains("[graph]"));
        assert!(toml_string.contains("[segmentation]"));
        assert!(toml_string.contains("[fitting]"));
        assert!(toml_string.contains("[gimbal]"));
        assert!(toml_string.contains("[capture]"));

        // Should contain key values
        assert!(toml_string.contains("crop_method = \"single_furthest\""));
        assert!(toml_string.contains("pan_step_angle = 0.9"));
        // Omitted optionals stay out of the file
        assert!(!toml_string.contains("alpha"));
        assert!(!toml_string.contains("[surface.roi]"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[cloud]
path = "greenhouse/row3.ply"
scale = 0.001

[surface]
crop_method = "top_percentage"
crop_fraction = 0.35
z_offset = 0.0
alpha = 0.02

[surface.roi]
min_x = -0.2
max_x = 0.2
min_y = -0.2
max_y = 0.2

[graph]
link = "knn"
knn = 12

[segmentation]
resolution = 0.8
seed = 7
restarts = 3

[fitting]
target_distance = 0.12
inlier_distance = 0.004
min_inlier_ratio = 0.6

[gimbal]
port = "/dev/ttyACM0"
baud = 115200
pan_step_angle = 1.8
pan_reduction = 5.0
tilt_step_angle = 1.8
tilt_reduction = 1.0
step_delay_us = 800
backoff_step_deg = 0.9
backoff_max_deg = 10.0
search_timeout_secs = 30.0
search_step_delay_ms = 5
offset_max_deg = 15.0
homing_offset_deg = 2.5
ack_timeout_secs = 5.0
short_ack_timeout_secs = 2.0
homing_timeout_secs = 40.0

[capture]
stabilization_secs = 1.5
invert_tilt = true
output_dir = "runs/row3"
simulate = false
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.cloud.path, "greenhouse/row3.ply");
        assert_eq!(config.surface.alpha, Some(0.02));
        assert_eq!(config.surface.roi.unwrap().min_x, -0.2);
        assert_eq!(config.graph.link, "knn");
        assert_eq!(config.graph.knn, 12);
        assert!(config.graph.radius.is_none());
        assert_eq!(config.segmentation.resolution, Some(0.8));
        assert_eq!(config.gimbal.baud, 115200);
        assert_eq!(config.gimbal.homing_offset_deg, 2.5);
        assert!(config.capture.invert_tilt);
        assert!(!config.capture.simulate);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf-nav.toml");

        let mut config = AppConfig::greenhouse_defaults();
        config.gimbal.port = "/dev/ttyS5".to_string();
        config.surface.alpha = Some(0.015);
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.gimbal.port, "/dev/ttyS5");
        assert_eq!(loaded.surface.alpha, Some(0.015));
        assert_eq!(loaded.cloud.path, config.cloud.path);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cloud.path, "plant.ply");
    }

    #[test]
    fn test_detection_params_conversion() {
        let mut config = AppConfig::greenhouse_defaults();
        config.surface.crop_method = "top_percentage".to_string();
        config.surface.crop_fraction = 0.4;
        config.surface.roi = Some(RoiConfig {
            min_x: -0.1,
            max_x: 0.1,
            min_y: -0.3,
            max_y: 0.3,
        });
        config.graph.link = "knn".to_string();
        config.graph.knn = 6;

        let params = config.detection_params().unwrap();
        assert_eq!(params.crop, CropMethod::TopPercentage { percentage: 0.4 });
        assert_eq!(params.link, LinkMode::Knn(6));
        let roi = params.roi.unwrap();
        assert_eq!(roi.min_y, -0.3);
        assert_eq!(params.fit.target_distance, 0.10);
        assert_eq!(params.fit.inlier_distance, 0.005);
    }

    #[test]
    fn test_unknown_crop_method_rejected() {
        let mut config = AppConfig::greenhouse_defaults();
        config.surface.crop_method = "bottom_half".to_string();
        let err = config.detection_params().unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
    }

    #[test]
    fn test_unknown_link_mode_rejected() {
        let mut config = AppConfig::greenhouse_defaults();
        config.graph.link = "delaunay".to_string();
        let err = config.detection_params().unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
    }

    #[test]
    fn test_motion_config_conversion() {
        let config = AppConfig::greenhouse_defaults();
        let motion = config.motion_config();
        assert_eq!(motion.step_delay, Duration::from_micros(1200));
        assert_eq!(motion.homing.search_timeout, Duration::from_secs(30));
        assert_eq!(motion.homing.offset_max_deg, 15.0);

        let driver = config.driver_config();
        assert_eq!(driver.ack_timeout, Duration::from_secs(5));
        assert_eq!(driver.homing_timeout, Duration::from_secs(40));
    }
}
