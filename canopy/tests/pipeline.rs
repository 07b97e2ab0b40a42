//! Leaf Detection Pipeline Tests
//!
//! Synthetic plant scenarios to validate the whole geometry chain without
//! a real reconstruction. The plant is built from parts with known ground
//! truth:
//! - a pot disk near the ground (must be cropped away)
//! - a sparse vertical stem (must be dropped as noise)
//! - two 13x13 leaf patches with a checkerboard ripple, one horizontal
//!   on top, one vertical at the side (must come out as two leaves with
//!   outward normals)
//!
//! Run with: `cargo test --test pipeline`

use approx::assert_relative_eq;
use canopy::plan::plan_route;
use canopy::select::{Selection, parse_selection};
use canopy::{
    CropMethod, DetectionParams, LeafModel, LinkMode, PointCloud, Roi, detect_leaves,
};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Synthetic plant
// ============================================================================

const PATCH_SPACING: f64 = 0.005;
const RIPPLE: f64 = 0.0004;

/// Leaf patch in the XY plane at height `z`, rippled so the surface
/// filter sees a real sheet instead of a degenerate flat grid.
fn horizontal_leaf(cx: f64, cy: f64, z: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for i in 0..13 {
        for j in 0..13 {
            let ripple = if (i + j) % 2 == 0 { RIPPLE } else { -RIPPLE };
            points.push(Point3::new(
                cx + (i as f64 - 6.0) * PATCH_SPACING,
                cy + (j as f64 - 6.0) * PATCH_SPACING,
                z + ripple,
            ));
        }
    }
    points
}

/// Leaf patch in the YZ plane at `x`, facing along the X axis.
fn vertical_leaf(x: f64, cy: f64, cz: f64) -> Vec<Point3<f64>> {
    let mut points = Vec::new();
    for i in 0..13 {
        for j in 0..13 {
            let ripple = if (i + j) % 2 == 0 { RIPPLE } else { -RIPPLE };
            points.push(Point3::new(
                x + ripple,
                cy + (i as f64 - 6.0) * PATCH_SPACING,
                cz + (j as f64 - 6.0) * PATCH_SPACING,
            ));
        }
    }
    points
}

fn two_leaf_plant() -> Vec<Point3<f64>> {
    let mut points = Vec::new();

    // Pot disk at the base, below the crop threshold.
    for i in 0..10 {
        for j in 0..10 {
            let x = (i as f64 - 4.5) * 0.02;
            let y = (j as f64 - 4.5) * 0.02;
            if x * x + y * y <= 0.01 {
                points.push(Point3::new(x, y, 0.01));
            }
        }
    }

    // Sparse stem up the middle.
    for k in 0..29 {
        points.push(Point3::new(0.0, 0.0, 0.02 + k as f64 * 0.01));
    }

    points.extend(horizontal_leaf(0.15, 0.0, 0.30));
    points.extend(vertical_leaf(-0.15, 0.0, 0.25));
    points
}

fn detect(points: Vec<Point3<f64>>) -> canopy::Detection {
    // Points are built in metres already; scale 1.0 keeps them as-is. The
    // low resolution keeps each rippled patch a single community; the
    // density-derived default would tile these uniform synthetic sheets.
    let cloud = PointCloud::from_points(points, 1.0).unwrap();
    let params = DetectionParams {
        crop: CropMethod::TopPercentage { percentage: 0.5 },
        resolution: Some(0.1),
        ..DetectionParams::default()
    };
    detect_leaves(&cloud, &params).unwrap()
}

fn leaf_near(leaves: &[LeafModel], x_sign: f64) -> &LeafModel {
    leaves
        .iter()
        .find(|m| m.centroid.x.signum() == x_sign)
        .expect("no leaf on that side of the plant")
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn test_detects_two_leaves_with_outward_normals() {
    let detection = detect(two_leaf_plant());

    // Pot and most of the stem are gone before segmentation.
    assert!(detection.surface.points.iter().all(|p| p.z > 0.14));
    assert_eq!(detection.leaves.len(), 2);

    // Horizontal top leaf: normal up, camera overhead looking down.
    let top = leaf_near(&detection.leaves, 1.0);
    assert!(top.normal.z > 0.99, "top leaf normal {:?}", top.normal);
    assert_relative_eq!(top.normal.norm(), 1.0, epsilon = 1e-6);
    assert!(top.inlier_ratio >= 0.7);
    assert_relative_eq!((top.target - top.centroid).norm(), 0.1, epsilon = 1e-6);
    assert!(top.target.z > top.centroid.z);
    assert_relative_eq!(top.orientation.tilt_deg, -90.0, epsilon = 2.0);

    // Vertical side leaf: normal outward along -X, camera looks back +X.
    let side = leaf_near(&detection.leaves, -1.0);
    assert!(side.normal.x < -0.99, "side leaf normal {:?}", side.normal);
    assert!(side.target.x < side.centroid.x);
    assert_relative_eq!(side.orientation.pan_deg, -90.0, epsilon = 2.0);
    assert_relative_eq!(side.orientation.tilt_deg, 0.0, epsilon = 2.0);

    // Both patches survive mostly intact.
    assert!(top.point_count > 100);
    assert!(side.point_count > 100);
}

#[test]
fn test_detection_is_reproducible() {
    let a = detect(two_leaf_plant());
    let b = detect(two_leaf_plant());

    assert_eq!(a.leaves.len(), b.leaves.len());
    for (la, lb) in a.leaves.iter().zip(&b.leaves) {
        assert_eq!(la.id, lb.id);
        assert_eq!(la.point_count, lb.point_count);
        assert_relative_eq!(la.centroid.x, lb.centroid.x, epsilon = 1e-12);
        assert_relative_eq!(la.normal.z, lb.normal.z, epsilon = 1e-12);
    }
}

#[test]
fn test_roi_excludes_side_leaf() {
    // A window around the top leaf: the vertical leaf at x = -0.15 never
    // enters the pipeline.
    let cloud = PointCloud::from_points(two_leaf_plant(), 1.0).unwrap();
    let params = DetectionParams {
        crop: CropMethod::TopPercentage { percentage: 0.5 },
        roi: Some(Roi { min_x: -0.05, max_x: 0.30, min_y: -0.10, max_y: 0.10 }),
        resolution: Some(0.1),
        ..DetectionParams::default()
    };
    let detection = detect_leaves(&cloud, &params).unwrap();

    assert_eq!(detection.leaves.len(), 1);
    assert!(detection.leaves[0].centroid.x > 0.0);
    assert!(detection.surface.points.iter().all(|p| p.x >= -0.05));
}

#[test]
fn test_knn_graph_finds_the_same_leaves() {
    let cloud = PointCloud::from_points(two_leaf_plant(), 1.0).unwrap();
    let params = DetectionParams {
        crop: CropMethod::TopPercentage { percentage: 0.5 },
        link: LinkMode::Knn(8),
        resolution: Some(0.1),
        ..DetectionParams::default()
    };
    let detection = detect_leaves(&cloud, &params).unwrap();

    assert_eq!(detection.leaves.len(), 2);
    let top = leaf_near(&detection.leaves, 1.0);
    assert!(top.normal.z > 0.99);
    let side = leaf_near(&detection.leaves, -1.0);
    assert!(side.normal.x < -0.99);
}

#[test]
fn test_scattered_noise_yields_no_leaves() {
    // A shapeless scatter: clusters may form, but nothing fits a plane.
    let mut rng = StdRng::seed_from_u64(9);
    let points: Vec<Point3<f64>> = (0..40)
        .map(|_| {
            Point3::new(
                rng.gen_range(0.0..0.2),
                rng.gen_range(0.0..0.2),
                rng.gen_range(0.0..0.2),
            )
        })
        .collect();

    let cloud = PointCloud::from_points(points, 1.0).unwrap();
    let detection = detect_leaves(&cloud, &DetectionParams {
        crop: CropMethod::None,
        resolution: Some(0.1),
        ..DetectionParams::default()
    })
    .unwrap();
    assert!(detection.leaves.is_empty());
}

// ============================================================================
// Selection and route planning over detected leaves
// ============================================================================

#[test]
fn test_selection_and_route_over_detection() {
    let detection = detect(two_leaf_plant());
    let leaves = &detection.leaves;

    let selection = parse_selection("all", leaves).unwrap();
    let ids = match selection {
        Selection::Leaves(ids) => ids,
        Selection::Quit => panic!("unexpected quit"),
    };
    assert_eq!(ids.len(), 2);

    // The camera parks on the -X side, so the side leaf comes first.
    let start = Point3::new(-0.4, 0.0, 0.25);
    let route = plan_route(leaves, &ids, start);
    assert_eq!(route.len(), 2);
    assert!(route[0].centroid.x < 0.0);
    assert!(route[1].centroid.x > 0.0);

    // Selecting a single id narrows the route to that leaf.
    let one = leaf_near(leaves, 1.0).id;
    let solo = plan_route(leaves, &[one], start);
    assert_eq!(solo.len(), 1);
    assert_eq!(solo[0].id, one);
}
