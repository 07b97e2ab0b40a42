//! Route planning over the selected leaves.
//!
//! Greedy nearest-neighbor ordering: from the robot's current position,
//! repeatedly visit the closest unvisited target. Not optimal, but it
//! avoids the pathological zig-zag of visiting leaves in id order.

use nalgebra::Point3;

use crate::fit::LeafModel;

/// Order the selected leaves into a visit sequence starting from `start`.
///
/// Ties on distance break toward the lower leaf id, which keeps the
/// route deterministic. The result is a permutation of the selection.
pub fn plan_route(models: &[LeafModel], selected: &[u32], start: Point3<f64>) -> Vec<LeafModel> {
    let mut remaining: Vec<LeafModel> = selected
        .iter()
        .filter_map(|id| models.iter().find(|m| m.id == *id).cloned())
        .collect();

    let mut route = Vec::with_capacity(remaining.len());
    let mut position = start;
    while !remaining.is_empty() {
        let mut best = 0usize;
        let mut best_key = (f64::INFINITY, u32::MAX);
        for (i, m) in remaining.iter().enumerate() {
            let key = ((m.target - position).norm(), m.id);
            if key.0.total_cmp(&best_key.0).then(key.1.cmp(&best_key.1)).is_lt() {
                best_key = key;
                best = i;
            }
        }
        let next = remaining.swap_remove(best);
        position = next.target;
        route.push(next);
    }

    let ids: Vec<u32> = route.iter().map(|m| m.id).collect();
    log::info!("Planned route over {} leaves: {ids:?}", route.len());
    route
}
