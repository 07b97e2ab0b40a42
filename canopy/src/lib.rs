//! Canopy - leaf targeting geometry for plant imaging rigs
//!
//! Turns an unordered 3D reconstruction of a plant into an ordered list
//! of camera targets, one per photographable leaf.
//!
//! # Pipeline
//!
//! ```text
//! PointCloud ──> Surface ──> SurfaceGraph ──> LeafCluster ──> LeafModel
//!   (load,       (crop,       (radius/kNN      (Louvain        (plane fit,
//!    scale)       alpha        neighbors,       communities)    target +
//!                 filter)      1/d weights)                     aim angles)
//!                                                                  │
//!                            selection (operator) ──> route ◄──────┘
//! ```
//!
//! Everything here is pure geometry: no hardware, no I/O beyond loading
//! the cloud. Random stages (neighbor sampling, Louvain restarts) are
//! seeded, so a given cloud and parameter set always produces the same
//! leaves.

pub mod cloud;
pub mod error;
pub mod fit;
pub mod graph;
pub mod pipeline;
pub mod plan;
pub mod segment;
pub mod select;
pub mod surface;

// Re-export commonly used types
pub use cloud::PointCloud;
pub use error::{CanopyError, Result};
pub use fit::{FitParams, LeafModel, Orientation};
pub use graph::LinkMode;
pub use pipeline::{Detection, DetectionParams, detect_leaves};
pub use plan::plan_route;
pub use select::{Selection, format_leaf_table, parse_selection};
pub use surface::{CropMethod, Roi, SurfaceParams};
