//! Canopy surface extraction.
//!
//! Raw reconstructions include pot, soil and interior foliage that the
//! camera can never face squarely. This module reduces the cloud to the
//! photographable outer surface: an optional horizontal window and a
//! height crop cut away pot and background, an alpha-extreme filter
//! keeps only points with an empty tangent ball on at least one side,
//! and a thin trim above the lowest surviving point drops rim artifacts.
//! The probe radius is either configured or estimated from the mean
//! point spacing.

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::cloud::PointCloud;
use crate::error::{CloudError, Result};

/// Radius used when the cloud is too small for neighbor statistics.
pub const FALLBACK_RADIUS: f64 = 0.01;

/// Below this many points the adaptive estimate is meaningless.
const MIN_POINTS_FOR_ESTIMATE: usize = 10;

/// At most this many points are sampled for the 1-NN statistic.
const RADIUS_SAMPLE_LIMIT: usize = 1000;

/// Neighborhood radius as a multiple of the mean 1-NN spacing.
const RADIUS_SPACING_FACTOR: f64 = 5.0;

/// Fraction of the vertical extent trimmed above the lowest surface point.
const BASE_TRIM_FRACTION: f64 = 0.005;

/// How the cloud is cut down to the region of interest before extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropMethod {
    /// Keep the whole cloud.
    None,
    /// Cut at `percentage` of the way up the vertical extent. With 0.35 the
    /// bottom 35% of the height range (pot and soil, typically) is dropped.
    TopPercentage { percentage: f64 },
    /// Cut at the height of the point furthest from the XY centroid, minus
    /// `z_offset`. Outstretched leaves sit at the rim of the plant, so their
    /// height marks where the canopy begins.
    SingleFurthest { z_offset: f64 },
}

/// Axis-aligned horizontal window. Points outside it are discarded
/// before any other processing, which cuts away neighboring plants and
/// rig structure caught by the reconstruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Roi {
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

/// Knobs for the extraction chain.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceParams {
    pub crop: CropMethod,
    /// Optional horizontal window applied before the height crop.
    pub roi: Option<Roi>,
    /// Probe ball radius; `None` derives it from the mean point spacing.
    pub alpha: Option<f64>,
    /// Seed for the spacing sample.
    pub seed: u64,
}

impl Default for SurfaceParams {
    fn default() -> Self {
        SurfaceParams {
            crop: CropMethod::SingleFurthest { z_offset: 0.0 },
            roi: None,
            alpha: None,
            seed: 42,
        }
    }
}

/// The extracted outer surface and the spacing-derived neighborhood
/// radius, which downstream stages reuse as the default edge radius.
#[derive(Debug, Clone)]
pub struct Surface {
    pub points: Vec<Point3<f64>>,
    pub radius: f64,
}

/// Run the full extraction chain on a loaded cloud.
pub fn extract(cloud: &PointCloud, params: &SurfaceParams) -> Result<Surface> {
    let windowed = match params.roi {
        Some(roi) => clip_roi(cloud.points(), roi)?,
        None => cloud.points().to_vec(),
    };
    let cropped = crop(&windowed, params.crop)?;
    log::info!("Crop kept {} of {} points", cropped.len(), cloud.len());

    let radius = adaptive_radius(&cropped, params.seed);
    let alpha = params.alpha.unwrap_or(radius);
    log::debug!("Neighborhood radius {radius:.4} m, probe radius {alpha:.4} m");

    let mut surface = alpha_extreme(&cropped, alpha);
    if surface.is_empty() {
        log::warn!("Surface filter removed every point, falling back to cropped cloud");
        surface = cropped;
    }
    let surface = trim_base(surface);
    log::info!("Surface extraction kept {} points", surface.len());

    Ok(Surface { points: surface, radius })
}

/// Keep points inside the horizontal window.
pub fn clip_roi(points: &[Point3<f64>], roi: Roi) -> Result<Vec<Point3<f64>>> {
    let kept: Vec<Point3<f64>> = points.iter().filter(|p| roi.contains(p)).copied().collect();
    if kept.is_empty() {
        return Err(CloudError::OutsideRoi.into());
    }
    log::debug!("ROI kept {} of {} points", kept.len(), points.len());
    Ok(kept)
}

/// Apply a crop method, keeping points at or above the computed height.
pub fn crop(points: &[Point3<f64>], method: CropMethod) -> Result<Vec<Point3<f64>>> {
    let threshold = match method {
        CropMethod::None => return Ok(points.to_vec()),
        CropMethod::TopPercentage { percentage } => {
            let (min_z, max_z) = z_extent(points);
            max_z - (max_z - min_z) * (1.0 - percentage)
        }
        CropMethod::SingleFurthest { z_offset } => {
            let (cx, cy) = xy_centroid(points);
            let furthest = points
                .iter()
                .max_by(|a, b| {
                    let da = (a.x - cx).powi(2) + (a.y - cy).powi(2);
                    let db = (b.x - cx).powi(2) + (b.y - cy).powi(2);
                    da.total_cmp(&db)
                })
                .copied()
                .unwrap_or_else(Point3::origin);
            furthest.z - z_offset
        }
    };

    let kept: Vec<Point3<f64>> = points.iter().filter(|p| p.z >= threshold).copied().collect();
    if kept.is_empty() {
        return Err(CloudError::NothingInRegion { threshold }.into());
    }
    Ok(kept)
}

/// Estimate a neighborhood radius from the mean nearest-neighbor spacing
/// over a bounded sample. Small clouds fall back to [`FALLBACK_RADIUS`].
pub fn adaptive_radius(points: &[Point3<f64>], seed: u64) -> f64 {
    if points.len() < MIN_POINTS_FOR_ESTIMATE {
        return FALLBACK_RADIUS;
    }

    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (i, p) in points.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let sample_size = points.len().min(RADIUS_SAMPLE_LIMIT);
    let sample = rand::seq::index::sample(&mut rng, points.len(), sample_size);

    let mut total = 0.0;
    for i in sample {
        let p = points[i];
        // Two nearest: the point itself at distance zero, then its neighbor.
        let neighbors = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], 2);
        if let Some(nearest) = neighbors.get(1) {
            total += nearest.distance.sqrt();
        }
    }

    let radius = RADIUS_SPACING_FACTOR * total / sample_size as f64;
    if radius > 0.0 { radius } else { FALLBACK_RADIUS }
}

/// Keep points with an empty open tangent ball of radius `alpha` on at
/// least one side of the locally fitted surface. Points on a thin sheet
/// have both tangent balls empty, points on the boundary of a solid
/// region have one, and buried points have none. The tangent direction
/// is the least-variance axis of the neighborhood covariance.
fn alpha_extreme(points: &[Point3<f64>], alpha: f64) -> Vec<Point3<f64>> {
    if points.len() <= 4 {
        return points.to_vec();
    }

    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (i, p) in points.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }

    let reach_sq = (2.0 * alpha) * (2.0 * alpha);
    let mut kept = Vec::new();
    for p in points {
        // The query point itself is part of its neighborhood.
        let neighbors = tree.within_unsorted::<SquaredEuclidean>(&[p.x, p.y, p.z], reach_sq);
        if neighbors.len() < 4 {
            // Too sparse to orient a tangent plane; boundary by default.
            kept.push(*p);
            continue;
        }

        let mut mean = Vector3::zeros();
        for n in &neighbors {
            mean += points[n.item as usize].coords;
        }
        mean /= neighbors.len() as f64;

        let mut cov = Matrix3::zeros();
        for n in &neighbors {
            let centered = points[n.item as usize].coords - mean;
            cov += centered * centered.transpose();
        }
        let eigen = cov.symmetric_eigen();
        let mut min_idx = 0;
        for k in 1..3 {
            if eigen.eigenvalues[k] < eigen.eigenvalues[min_idx] {
                min_idx = k;
            }
        }
        let normal: Vector3<f64> = eigen.eigenvectors.column(min_idx).into();

        // The point sits at distance exactly alpha from each probe center,
        // so anything strictly closer blocks that side.
        let empty_side = [1.0f64, -1.0].into_iter().any(|side| {
            let probe = p + normal * (side * alpha);
            let nearest = tree.nearest_one::<SquaredEuclidean>(&[probe.x, probe.y, probe.z]);
            nearest.distance.sqrt() >= alpha * (1.0 - 1e-6)
        });
        if empty_side {
            kept.push(*p);
        }
    }
    kept
}

/// Drop points within a thin band above the lowest surviving point. The
/// crop boundary leaves a ragged rim of half-cut leaves there.
fn trim_base(points: Vec<Point3<f64>>) -> Vec<Point3<f64>> {
    let (min_z, max_z) = z_extent(&points);
    let threshold = min_z + BASE_TRIM_FRACTION * (max_z - min_z);
    points.into_iter().filter(|p| p.z >= threshold).collect()
}

fn z_extent(points: &[Point3<f64>]) -> (f64, f64) {
    let mut min_z = f64::INFINITY;
    let mut max_z = f64::NEG_INFINITY;
    for p in points {
        min_z = min_z.min(p.z);
        max_z = max_z.max(p.z);
    }
    (min_z, max_z)
}

fn xy_centroid(points: &[Point3<f64>]) -> (f64, f64) {
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in points {
        cx += p.x;
        cy += p.y;
    }
    let n = points.len().max(1) as f64;
    (cx / n, cy / n)
}
