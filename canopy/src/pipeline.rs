//! End-to-end leaf detection.
//!
//! Chains the geometry stages: surface extraction, connectivity graph,
//! community segmentation, per-leaf plane fitting. Selection and route
//! planning stay separate since they need operator input.

use crate::cloud::PointCloud;
use crate::error::Result;
use crate::fit::{self, FitParams, LeafModel};
use crate::graph::{self, LinkMode, SurfaceGraph};
use crate::segment::{self, SegmentParams};
use crate::surface::{self, CropMethod, Roi, Surface, SurfaceParams};

/// Knobs for the whole detection chain.
#[derive(Debug, Clone)]
pub struct DetectionParams {
    pub crop: CropMethod,
    /// Optional horizontal window applied before the height crop.
    pub roi: Option<Roi>,
    /// Surface probe radius; `None` derives it from point spacing.
    pub alpha: Option<f64>,
    /// How surface points are joined into graph edges.
    pub link: LinkMode,
    /// Seed for every randomized stage (sampling, Louvain restarts).
    pub seed: u64,
    /// Modularity resolution; `None` derives it from point density.
    pub resolution: Option<f64>,
    /// Noise threshold; `None` derives it from the surface size.
    pub min_cluster_size: Option<usize>,
    pub restarts: usize,
    pub fit: FitParams,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            crop: CropMethod::SingleFurthest { z_offset: 0.0 },
            roi: None,
            alpha: None,
            link: LinkMode::default(),
            seed: 42,
            resolution: None,
            min_cluster_size: None,
            restarts: segment::DEFAULT_RESTARTS,
            fit: FitParams::default(),
        }
    }
}

/// Detected leaves plus the surface they came from, for reporting.
#[derive(Debug, Clone)]
pub struct Detection {
    pub surface: Surface,
    pub leaves: Vec<LeafModel>,
}

/// Run the full detection chain on a loaded cloud.
///
/// Returns an empty leaf list when segmentation finds nothing above the
/// noise threshold; callers decide whether that is worth aborting over.
pub fn detect_leaves(cloud: &PointCloud, params: &DetectionParams) -> Result<Detection> {
    let surface = surface::extract(
        cloud,
        &SurfaceParams {
            crop: params.crop,
            roi: params.roi,
            alpha: params.alpha,
            seed: params.seed,
        },
    )?;

    let graph = match params.link {
        LinkMode::Radius(fixed) => {
            SurfaceGraph::build(&surface.points, fixed.unwrap_or(surface.radius))?
        }
        LinkMode::Knn(k) => SurfaceGraph::build_knn(&surface.points, k)?,
    };
    let resolution =
        params.resolution.unwrap_or_else(|| graph::auto_resolution(&surface.points));
    let min_cluster_size = params
        .min_cluster_size
        .unwrap_or_else(|| segment::default_min_cluster_size(surface.points.len()));

    let clusters = segment::segment(
        &graph,
        &SegmentParams {
            resolution,
            min_cluster_size,
            restarts: params.restarts,
            seed: params.seed,
        },
    );

    let leaves = fit::fit_clusters(&clusters, &surface.points, &params.fit);
    Ok(Detection { surface, leaves })
}
