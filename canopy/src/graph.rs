//! Spatial connectivity graph over the canopy surface.
//!
//! Nodes are surface points, edges connect spatial neighbors (all pairs
//! within a radius, or each point to its k nearest), and edge weights
//! are inverse distances so that tightly packed regions bind strongly.
//! Points that end up with no edge at all are dropped here; as graph
//! nodes they could only ever become singleton clusters. Community
//! detection runs on this graph to split the canopy into leaves.

use std::collections::HashSet;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Point3;

use crate::error::{CanopyError, Result};

/// Distances below this are clamped before inversion.
const MIN_EDGE_DISTANCE: f64 = 1e-6;

/// Floor for the automatic modularity resolution.
const MIN_RESOLUTION: f64 = 0.1;

/// How surface points are joined into edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkMode {
    /// Every pair within a radius; `None` reuses the surface spacing radius.
    Radius(Option<f64>),
    /// Each point to its k nearest neighbors, symmetrized.
    Knn(usize),
}

impl Default for LinkMode {
    fn default() -> Self {
        LinkMode::Radius(None)
    }
}

/// Weighted undirected graph stored as adjacency lists. Every edge appears
/// in both endpoint lists. Node indices are compact; [`point_index`] maps
/// them back to the surface slice the graph was built from.
///
/// [`point_index`]: SurfaceGraph::point_index
#[derive(Debug, Clone)]
pub struct SurfaceGraph {
    adjacency: Vec<Vec<(u32, f64)>>,
    point_ids: Vec<u32>,
    edge_count: usize,
    total_weight: f64,
}

impl SurfaceGraph {
    /// Connect every pair of points within `radius` of each other.
    pub fn build(points: &[Point3<f64>], radius: f64) -> Result<SurfaceGraph> {
        let tree = index(points);
        let radius_sq = radius * radius;

        let mut edges = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let found = tree.within_unsorted::<SquaredEuclidean>(&[p.x, p.y, p.z], radius_sq);
            for n in found {
                let j = n.item as usize;
                if j <= i {
                    continue;
                }
                edges.push((i as u32, j as u32, edge_weight(n.distance)));
            }
        }
        Self::assemble(points.len(), edges)
    }

    /// Connect each point to its `k` nearest neighbors. An edge exists when
    /// either endpoint picks the other, keeping the graph undirected.
    pub fn build_knn(points: &[Point3<f64>], k: usize) -> Result<SurfaceGraph> {
        if k == 0 {
            return Err(CanopyError::EmptyGraph);
        }
        let tree = index(points);

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for (i, p) in points.iter().enumerate() {
            // k + 1 because the query point is its own nearest neighbor.
            let found = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k + 1);
            for n in found {
                let j = n.item as usize;
                if j == i {
                    continue;
                }
                let key = (i.min(j) as u32, i.max(j) as u32);
                if seen.insert(key) {
                    edges.push((key.0, key.1, edge_weight(n.distance)));
                }
            }
        }
        Self::assemble(points.len(), edges)
    }

    /// Compact the edge list into adjacency form, leaving out points that
    /// picked up no edge.
    fn assemble(point_count: usize, edges: Vec<(u32, u32, f64)>) -> Result<SurfaceGraph> {
        if edges.is_empty() {
            return Err(CanopyError::EmptyGraph);
        }

        let mut connected = vec![false; point_count];
        for &(i, j, _) in &edges {
            connected[i as usize] = true;
            connected[j as usize] = true;
        }

        let mut node_of = vec![u32::MAX; point_count];
        let mut point_ids = Vec::new();
        for (i, &linked) in connected.iter().enumerate() {
            if linked {
                node_of[i] = point_ids.len() as u32;
                point_ids.push(i as u32);
            }
        }
        let dropped = point_count - point_ids.len();
        if dropped > 0 {
            log::debug!("Dropped {dropped} isolated surface points");
        }

        let mut adjacency: Vec<Vec<(u32, f64)>> = vec![Vec::new(); point_ids.len()];
        let mut total_weight = 0.0f64;
        let edge_count = edges.len();
        for (i, j, weight) in edges {
            let a = node_of[i as usize];
            let b = node_of[j as usize];
            adjacency[a as usize].push((b, weight));
            adjacency[b as usize].push((a, weight));
            total_weight += weight;
        }
        log::info!("Connectivity graph: {} nodes, {} edges", point_ids.len(), edge_count);

        Ok(SurfaceGraph { adjacency, point_ids, edge_count, total_weight })
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Sum of edge weights, each undirected edge counted once.
    #[inline]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Incident `(neighbor, weight)` pairs of a node.
    #[inline]
    pub fn neighbors(&self, node: usize) -> &[(u32, f64)] {
        &self.adjacency[node]
    }

    /// Weighted degree of a node.
    pub fn degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|(_, w)| w).sum()
    }

    /// Index of the surface point behind a graph node.
    #[inline]
    pub fn point_index(&self, node: usize) -> usize {
        self.point_ids[node] as usize
    }
}

fn index(points: &[Point3<f64>]) -> KdTree<f64, 3> {
    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (i, p) in points.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }
    tree
}

fn edge_weight(distance_sq: f64) -> f64 {
    1.0 / distance_sq.sqrt().max(MIN_EDGE_DISTANCE)
}

/// Modularity resolution derived from point density: denser clouds need a
/// higher resolution to keep leaves from merging. Degenerate bounding
/// boxes fall back to the floor value.
pub fn auto_resolution(points: &[Point3<f64>]) -> f64 {
    let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }
    let volume = (max.x - min.x) * (max.y - min.y) * (max.z - min.z);
    let density = if volume > 0.0 { points.len() as f64 / volume } else { 1.0 };
    let resolution = (density.log10() / 2.0).max(MIN_RESOLUTION);
    log::debug!("Point density {density:.1} /m^3, resolution {resolution:.2}");
    resolution
}
