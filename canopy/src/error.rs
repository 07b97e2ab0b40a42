//! Error types for the canopy pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CanopyError>;

/// Point-cloud input failures. Fatal to the batch: nothing downstream can
/// run without a usable cloud.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed point data at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Unsupported cloud format: {0}")]
    UnsupportedFormat(String),

    #[error("Point cloud is empty")]
    Empty,

    #[error("No points survive cropping (z threshold {threshold:.4} m)")]
    NothingInRegion { threshold: f64 },

    #[error("All points fall outside the region of interest")]
    OutsideRoi,
}

/// Plane-fit failures for a single cluster. Recoverable: the offending
/// cluster is skipped and the batch continues.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Cluster has {count} points, need at least 3")]
    TooFewPoints { count: usize },

    #[error("Cluster points are collinear, plane normal is undefined")]
    Collinear,

    #[error("Planarity {ratio:.2} below minimum {min:.2}")]
    NotPlanar { ratio: f64, min: f64 },
}

/// Operator selection failures. Recoverable: the caller re-prompts.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Unknown leaf ids: {0:?}")]
    UnknownIds(Vec<u32>),

    #[error("Selection is not a list of leaf ids: {0}")]
    Malformed(String),

    #[error("Empty selection")]
    Empty,
}

/// Canopy pipeline error type
#[derive(Error, Debug)]
pub enum CanopyError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("Connectivity graph is empty after dropping isolated points")]
    EmptyGraph,
}
