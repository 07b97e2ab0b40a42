//! Leaf segmentation by modularity optimization.
//!
//! Runs Louvain community detection on the surface connectivity graph.
//! The greedy optimization is order-sensitive, so it is restarted several
//! times with shuffled node orders and the partition with the best plain
//! modularity wins. All shuffling comes from a seeded generator, making
//! the whole segmentation reproducible.
//!
//! # Algorithm
//!
//! ```text
//! 1. Every node starts in its own community
//! 2. Local pass: move each node to the neighboring community with the
//!    largest modularity gain, repeat until no move improves
//! 3. Aggregate: collapse communities into nodes, intra-community edges
//!    become self loops
//! 4. Repeat from 2 on the aggregated graph until stable
//! ```
//!
//! The resolution coefficient scales the null-model term of the gain:
//! higher resolution favors more, smaller communities.

use std::collections::HashMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::graph::SurfaceGraph;

/// Number of shuffled restarts of the whole optimization.
pub const DEFAULT_RESTARTS: usize = 5;

/// Moves below this modularity gain are not taken.
const MIN_GAIN: f64 = 1e-7;

/// Tuning knobs for the segmentation.
#[derive(Debug, Clone)]
pub struct SegmentParams {
    /// Modularity resolution; see [`crate::graph::auto_resolution`].
    pub resolution: f64,
    /// Communities smaller than this are discarded as noise.
    pub min_cluster_size: usize,
    /// Shuffled restarts; the best-modularity partition is kept.
    pub restarts: usize,
    /// Seed for the shuffle generator.
    pub seed: u64,
}

/// Default noise threshold: a thirtieth of the cloud, at least 10 points.
pub fn default_min_cluster_size(point_count: usize) -> usize {
    (point_count / 30).max(10)
}

/// A detected leaf candidate: a community of surface point indices.
///
/// Ids start at 1 and follow detection order (decreasing size). They stay
/// stable through later stages even when some clusters are skipped.
#[derive(Debug, Clone)]
pub struct LeafCluster {
    pub id: u32,
    pub indices: Vec<usize>,
}

impl LeafCluster {
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Partition the surface graph into leaf clusters.
///
/// Clusters below `min_cluster_size` are dropped as noise (the graph
/// already dropped isolated points at build time). The result is sorted
/// by decreasing size, ties broken by smallest member index, and may be
/// empty when nothing passes the size filter.
pub fn segment(graph: &SurfaceGraph, params: &SegmentParams) -> Vec<LeafCluster> {
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut best_partition: Option<Vec<usize>> = None;
    let mut best_modularity = f64::NEG_INFINITY;

    for restart in 0..params.restarts.max(1) {
        let partition = louvain(graph, params.resolution, &mut rng);
        let q = modularity(graph, &partition);
        log::debug!("Louvain restart {}: modularity {q:.4}", restart + 1);
        if q > best_modularity {
            best_modularity = q;
            best_partition = Some(partition);
        }
    }
    log::info!("Best modularity over {} restarts: {best_modularity:.4}", params.restarts.max(1));

    let partition = match best_partition {
        Some(p) => p,
        None => return Vec::new(),
    };

    // Group node indices by community.
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (node, &com) in partition.iter().enumerate() {
        groups.entry(com).or_default().push(node);
    }

    let mut clusters: Vec<Vec<usize>> = groups
        .into_values()
        .filter(|members| members.len() >= params.min_cluster_size)
        .collect();
    clusters.sort_by_key(|members| (std::cmp::Reverse(members.len()), members[0]));

    log::info!(
        "Segmentation found {} clusters above {} points",
        clusters.len(),
        params.min_cluster_size
    );

    clusters
        .into_iter()
        .enumerate()
        .map(|(i, members)| LeafCluster {
            id: i as u32 + 1,
            // Back from graph nodes to surface point indices.
            indices: members.into_iter().map(|n| graph.point_index(n)).collect(),
        })
        .collect()
}

/// One full Louvain run: local passes and aggregation until stable.
/// Returns the community label of every original node.
fn louvain(graph: &SurfaceGraph, resolution: f64, rng: &mut StdRng) -> Vec<usize> {
    let n = graph.node_count();
    let mut partition: Vec<usize> = (0..n).collect();
    let mut level = LevelGraph::from_surface(graph);

    loop {
        let (assignment, moved) = one_level(&level, resolution, rng);
        if !moved {
            break;
        }

        // Compact the community labels of this level.
        let mut labels: Vec<usize> = assignment.clone();
        labels.sort_unstable();
        labels.dedup();
        let dense: HashMap<usize, usize> =
            labels.iter().enumerate().map(|(new, &old)| (old, new)).collect();

        for com in partition.iter_mut() {
            *com = dense[&assignment[*com]];
        }
        level = level.aggregate(&assignment, &dense);

        if level.node_count() <= 1 {
            break;
        }
    }
    partition
}

/// Working graph for one aggregation level. Self loops are kept apart
/// from the adjacency lists; their weight counts twice toward degrees.
struct LevelGraph {
    adj: Vec<Vec<(u32, f64)>>,
    self_weight: Vec<f64>,
    /// Sum of edge weights, each edge and self loop counted once.
    total_weight: f64,
}

impl LevelGraph {
    fn from_surface(graph: &SurfaceGraph) -> LevelGraph {
        let n = graph.node_count();
        let adj = (0..n).map(|i| graph.neighbors(i).to_vec()).collect();
        LevelGraph { adj, self_weight: vec![0.0; n], total_weight: graph.total_weight() }
    }

    fn node_count(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, node: usize) -> f64 {
        let adjacent: f64 = self.adj[node].iter().map(|(_, w)| w).sum();
        adjacent + 2.0 * self.self_weight[node]
    }

    /// Collapse communities into nodes using the dense relabeling.
    fn aggregate(&self, assignment: &[usize], dense: &HashMap<usize, usize>) -> LevelGraph {
        let k = dense.len();
        let mut self_weight = vec![0.0f64; k];
        let mut between: HashMap<(usize, usize), f64> = HashMap::new();

        for (node, &w) in self.self_weight.iter().enumerate() {
            self_weight[dense[&assignment[node]]] += w;
        }
        for (i, edges) in self.adj.iter().enumerate() {
            let ci = dense[&assignment[i]];
            for &(j, w) in edges {
                let j = j as usize;
                if j < i {
                    continue;
                }
                let cj = dense[&assignment[j]];
                if ci == cj {
                    self_weight[ci] += w;
                } else {
                    let key = (ci.min(cj), ci.max(cj));
                    *between.entry(key).or_insert(0.0) += w;
                }
            }
        }

        let mut adj: Vec<Vec<(u32, f64)>> = vec![Vec::new(); k];
        for (&(a, b), &w) in &between {
            adj[a].push((b as u32, w));
            adj[b].push((a as u32, w));
        }
        LevelGraph { adj, self_weight, total_weight: self.total_weight }
    }
}

/// One local-move pass group: sweep shuffled nodes until no move improves.
/// Returns the community of each node and whether anything moved at all.
fn one_level(level: &LevelGraph, resolution: f64, rng: &mut StdRng) -> (Vec<usize>, bool) {
    let n = level.node_count();
    let m = level.total_weight;
    let mut node2com: Vec<usize> = (0..n).collect();
    let mut com_tot: Vec<f64> = (0..n).map(|i| level.degree(i)).collect();

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);

    let mut any_moved = false;
    loop {
        let mut moved_this_pass = false;
        for &node in &order {
            let com = node2com[node];
            let k = level.degree(node);

            // Weights from this node into each neighboring community.
            let mut neigh: HashMap<usize, f64> = HashMap::new();
            for &(j, w) in &level.adj[node] {
                *neigh.entry(node2com[j as usize]).or_insert(0.0) += w;
            }

            com_tot[com] -= k;
            let own_links = neigh.get(&com).copied().unwrap_or(0.0);
            let remove_cost = -own_links + resolution * com_tot[com] * k / (2.0 * m);

            let mut candidates: Vec<(usize, f64)> = neigh.into_iter().collect();
            candidates.sort_unstable_by_key(|&(c, _)| c);

            let mut best_com = com;
            let mut best_gain = 0.0;
            for (c, links) in candidates {
                if c == com {
                    continue;
                }
                let gain = remove_cost + links - resolution * com_tot[c] * k / (2.0 * m);
                if gain > best_gain + MIN_GAIN {
                    best_gain = gain;
                    best_com = c;
                }
            }

            com_tot[best_com] += k;
            node2com[node] = best_com;
            if best_com != com {
                moved_this_pass = true;
                any_moved = true;
            }
        }
        if !moved_this_pass {
            break;
        }
    }
    (node2com, any_moved)
}

/// Plain modularity (resolution 1) of a partition on the original graph,
/// used to pick the best restart.
fn modularity(graph: &SurfaceGraph, partition: &[usize]) -> f64 {
    let m = graph.total_weight();
    if m <= 0.0 {
        return 0.0;
    }

    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut total: HashMap<usize, f64> = HashMap::new();
    for node in 0..graph.node_count() {
        let com = partition[node];
        *total.entry(com).or_insert(0.0) += graph.degree(node);
        for &(j, w) in graph.neighbors(node) {
            if (j as usize) > node && partition[j as usize] == com {
                *internal.entry(com).or_insert(0.0) += w;
            }
        }
    }

    total
        .iter()
        .map(|(com, tot)| {
            let inc = internal.get(com).copied().unwrap_or(0.0);
            inc / m - (tot / (2.0 * m)).powi(2)
        })
        .sum()
}
