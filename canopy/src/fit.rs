//! Per-leaf plane fitting and camera target computation.
//!
//! Each cluster gets a plane fitted by covariance eigendecomposition:
//! the eigenvector of the smallest eigenvalue is the surface normal. The
//! sign ambiguity is resolved by pointing the normal away from the plant
//! center (the centroid of all surface points, dropped to the lowest
//! height so normals lean outward rather than downward). The camera
//! target sits on the normal at the configured standoff distance, aimed
//! back at the centroid.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{FitError, Result};
use crate::segment::LeafCluster;

/// Eigenvalue ratio below which the cluster counts as collinear.
const RANK_THRESHOLD: f64 = 1e-8;

/// Camera standoff from the leaf surface, in metres.
pub const DEFAULT_TARGET_DISTANCE: f64 = 0.10;

/// Fits with a lower inlier fraction are rejected as non-planar.
pub const DEFAULT_MIN_INLIER_RATIO: f64 = 0.7;

/// Point-to-plane distance for a point to count as an inlier, in metres.
pub const DEFAULT_INLIER_DISTANCE: f64 = 0.005;

#[derive(Debug, Clone)]
pub struct FitParams {
    pub target_distance: f64,
    pub min_inlier_ratio: f64,
    pub inlier_distance: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            target_distance: DEFAULT_TARGET_DISTANCE,
            min_inlier_ratio: DEFAULT_MIN_INLIER_RATIO,
            inlier_distance: DEFAULT_INLIER_DISTANCE,
        }
    }
}

/// Camera viewing orientation in degrees. Pan 0 faces +Y, positive pan
/// turns counterclockwise seen from above; tilt is elevation from the
/// horizontal plane, negative looking down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub pan_deg: f64,
    pub tilt_deg: f64,
}

/// A photographable leaf: fitted plane, camera target, and aim angles.
#[derive(Debug, Clone)]
pub struct LeafModel {
    pub id: u32,
    pub point_count: usize,
    pub centroid: Point3<f64>,
    /// Unit normal, oriented away from the plant center.
    pub normal: Vector3<f64>,
    /// Fraction of cluster points within `inlier_distance` of the plane.
    pub inlier_ratio: f64,
    /// Camera position: centroid + target_distance * normal.
    pub target: Point3<f64>,
    pub orientation: Orientation,
}

/// Plant center used to orient normals: the surface centroid dropped to
/// the lowest point height, approximating the stem base.
pub fn plant_center(points: &[Point3<f64>]) -> Point3<f64> {
    let mut center = Vector3::zeros();
    let mut min_z = f64::INFINITY;
    for p in points {
        center += p.coords;
        min_z = min_z.min(p.z);
    }
    center /= points.len().max(1) as f64;
    Point3::new(center.x, center.y, min_z)
}

/// Aim angles for a camera at `from` looking at `at`.
pub fn aim(from: Point3<f64>, at: Point3<f64>) -> Orientation {
    let d = at - from;
    let pan_deg = -d.x.atan2(d.y).to_degrees();
    let tilt_deg = d.z.atan2(d.x.hypot(d.y)).to_degrees();
    Orientation { pan_deg, tilt_deg }
}

/// Fit every cluster, skipping degenerate or non-planar ones with a
/// warning. Surviving models keep their cluster ids.
pub fn fit_clusters(
    clusters: &[LeafCluster],
    points: &[Point3<f64>],
    params: &FitParams,
) -> Vec<LeafModel> {
    let center = plant_center(points);
    let mut models = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        match fit_cluster(cluster, points, center, params) {
            Ok(model) => models.push(model),
            Err(err) => log::warn!("Skipping cluster {}: {err}", cluster.id),
        }
    }
    log::info!("Fitted {} of {} clusters", models.len(), clusters.len());
    models
}

/// Fit a plane to one cluster and derive its camera target.
pub fn fit_cluster(
    cluster: &LeafCluster,
    points: &[Point3<f64>],
    plant_center: Point3<f64>,
    params: &FitParams,
) -> Result<LeafModel> {
    let cluster_points: Vec<Point3<f64>> =
        cluster.indices.iter().map(|&i| points[i]).collect();
    if cluster_points.len() < 3 {
        return Err(FitError::TooFewPoints { count: cluster_points.len() }.into());
    }

    let mut centroid = Vector3::zeros();
    for p in &cluster_points {
        centroid += p.coords;
    }
    centroid /= cluster_points.len() as f64;

    let mut cov = Matrix3::zeros();
    for p in &cluster_points {
        let centered = p.coords - centroid;
        cov += centered * centered.transpose();
    }

    let eigen = cov.symmetric_eigen();
    let mut indexed: Vec<(usize, f64)> =
        eigen.eigenvalues.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let (min_idx, _) = indexed[0];
    let (_, second) = indexed[1];
    let (_, largest) = indexed[2];

    // Rank check: a plane needs two significant spread directions. Rank 1
    // means a line, rank 0 means coincident points.
    if largest <= RANK_THRESHOLD || second / largest < RANK_THRESHOLD {
        return Err(FitError::Collinear.into());
    }

    let mut normal: Vector3<f64> = eigen.eigenvectors.column(min_idx).into();
    normal.normalize_mut();

    let centroid = Point3::from(centroid);
    let to_center = plant_center - centroid;
    if normal.dot(&to_center) > 0.0 {
        normal = -normal;
    }

    let inliers = cluster_points
        .iter()
        .filter(|p| normal.dot(&(*p - centroid)).abs() <= params.inlier_distance)
        .count();
    let inlier_ratio = inliers as f64 / cluster_points.len() as f64;
    if inlier_ratio < params.min_inlier_ratio {
        return Err(FitError::NotPlanar { ratio: inlier_ratio, min: params.min_inlier_ratio }.into());
    }

    let target = centroid + normal * params.target_distance;
    let orientation = aim(target, centroid);

    Ok(LeafModel {
        id: cluster.id,
        point_count: cluster_points.len(),
        centroid,
        normal,
        inlier_ratio,
        target,
        orientation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CanopyError;
    use approx::assert_relative_eq;

    fn cluster_of(indices: std::ops::Range<usize>) -> LeafCluster {
        LeafCluster { id: 1, indices: indices.collect() }
    }

    fn flat_patch(height: f64) -> Vec<Point3<f64>> {
        let mut points = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                points.push(Point3::new(x as f64 * 0.01, y as f64 * 0.01, height));
            }
        }
        points
    }

    #[test]
    fn test_fit_horizontal_leaf() {
        let points = flat_patch(0.5);
        let model = fit_cluster(
            &cluster_of(0..points.len()),
            &points,
            Point3::new(0.02, 0.02, 0.0),
            &FitParams::default(),
        )
        .unwrap();

        // Normal points up, away from the plant base below.
        assert_relative_eq!(model.normal.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(model.normal.norm(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(model.inlier_ratio, 1.0);
        assert_relative_eq!((model.target - model.centroid).norm(), 0.1, epsilon = 1e-6);
        // Camera above the leaf looks straight down.
        assert_relative_eq!(model.orientation.tilt_deg, -90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_tilted_leaf() {
        // Plane z = x, base center straight below the centroid.
        let mut points = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                points.push(Point3::new(x as f64 * 0.01, y as f64 * 0.01, x as f64 * 0.01));
            }
        }
        let model = fit_cluster(
            &cluster_of(0..points.len()),
            &points,
            Point3::new(0.02, 0.02, 0.0),
            &FitParams { inlier_distance: 0.001, ..FitParams::default() },
        )
        .unwrap();

        let inv_sqrt2 = 1.0 / 2.0f64.sqrt();
        assert_relative_eq!(model.normal.x, -inv_sqrt2, epsilon = 1e-9);
        assert_relative_eq!(model.normal.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(model.normal.z, inv_sqrt2, epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(0.01, 0.0, 0.0)];
        let err = fit_cluster(
            &cluster_of(0..2),
            &points,
            Point3::origin(),
            &FitParams::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CanopyError::Fit(FitError::TooFewPoints { count: 2 })
        ));
    }

    #[test]
    fn test_collinear_points() {
        let points: Vec<Point3<f64>> =
            (0..10).map(|i| Point3::new(i as f64 * 0.01, 0.0, 0.0)).collect();
        let err = fit_cluster(
            &cluster_of(0..10),
            &points,
            Point3::origin(),
            &FitParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CanopyError::Fit(FitError::Collinear)));
    }

    #[test]
    fn test_thick_blob_rejected_as_non_planar() {
        let mut points = Vec::new();
        for x in 0..6 {
            for y in 0..6 {
                for z in 0..6 {
                    points.push(Point3::new(
                        x as f64 * 0.02,
                        y as f64 * 0.02,
                        z as f64 * 0.02,
                    ));
                }
            }
        }
        let err = fit_cluster(
            &cluster_of(0..points.len()),
            &points,
            Point3::origin(),
            &FitParams::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CanopyError::Fit(FitError::NotPlanar { .. })
        ));
    }

    #[test]
    fn test_slightly_wavy_leaf_passes() {
        let mut points = Vec::new();
        for x in 0..6 {
            for y in 0..6 {
                let ripple = if (x + y) % 2 == 0 { 0.001 } else { -0.001 };
                points.push(Point3::new(x as f64 * 0.01, y as f64 * 0.01, 0.3 + ripple));
            }
        }
        let model = fit_cluster(
            &cluster_of(0..points.len()),
            &points,
            Point3::new(0.0, 0.0, 0.0),
            &FitParams::default(),
        )
        .unwrap();
        assert_relative_eq!(model.inlier_ratio, 1.0);
        assert!(model.normal.z > 0.99);
    }

    #[test]
    fn test_fit_clusters_skips_degenerate() {
        // One good patch, one line; the line is skipped, ids keep holes.
        let mut points = flat_patch(0.5);
        let line_start = points.len();
        for i in 0..12 {
            points.push(Point3::new(0.1 + i as f64 * 0.01, 0.0, 0.1));
        }
        let clusters = vec![
            LeafCluster { id: 1, indices: (line_start..points.len()).collect() },
            LeafCluster { id: 2, indices: (0..line_start).collect() },
        ];

        let models = fit_clusters(&clusters, &points, &FitParams::default());
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, 2);
    }

    #[test]
    fn test_plant_center_uses_base_height() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.1),
            Point3::new(0.2, 0.0, 0.5),
            Point3::new(0.1, 0.3, 0.9),
        ];
        let center = plant_center(&points);
        assert_relative_eq!(center.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(center.y, 0.1, epsilon = 1e-12);
        assert_relative_eq!(center.z, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_aim_cardinal_directions() {
        let origin = Point3::origin();
        let north = aim(origin, Point3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(north.pan_deg, 0.0);
        assert_relative_eq!(north.tilt_deg, 0.0);

        let east = aim(origin, Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(east.pan_deg, -90.0);
        assert_relative_eq!(east.tilt_deg, 0.0);

        let down = aim(origin, Point3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(down.tilt_deg, -90.0);

        let up_forward = aim(origin, Point3::new(0.0, 1.0, 1.0));
        assert_relative_eq!(up_forward.pan_deg, 0.0);
        assert_relative_eq!(up_forward.tilt_deg, 45.0);
    }
}
