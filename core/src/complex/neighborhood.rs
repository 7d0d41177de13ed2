//! Neighborhood statistics over representation sets
//!
//! Implements the fuzzy-set weighting at the heart of the spatial complex:
//! k-nearest-neighbor search (exact below a sample-count cutoff, randomized
//! candidate search above it), the per-sample bandwidth fit that calibrates
//! the expected number of effective neighbors, membership conversion, and the
//! probabilistic-union symmetrization
//!
//! ```text
//! p_ij + p_ji - p_ij * p_ji
//! ```
//!
//! The module also hosts the two distributional comparisons the rest of the
//! pipeline derives from neighborhoods: the neighbor-preserving rate between
//! consecutive representation snapshots and the symmetric Hausdorff distance
//! used by the segmenter.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;

use log::debug;
use nalgebra::DMatrix;
use rand::seq::index::sample as index_sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Bandwidth bisection iterations
const SMOOTH_KNN_ITERATIONS: usize = 64;

/// Bandwidth bisection tolerance on the effective neighbor count
const SMOOTH_KNN_TOLERANCE: f64 = 1e-5;

/// Candidate multiplier for the randomized neighbor search
const APPROX_CANDIDATE_FACTOR: usize = 12;

/// k-nearest neighbors of every sample: indices and distances, row-aligned
/// with the representation matrix, `k` entries per sample sorted ascending
/// by distance. Self-neighbors are excluded.
#[derive(Debug, Clone)]
pub struct NeighborGraph {
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f64>>,
    pub k: usize,
}

/// Per-sample bandwidth (sigma) and minimum-distance offset (rho) from the
/// smooth-kNN fit; reused by the temporal constructor so spatial and temporal
/// weights share a scale.
#[derive(Debug, Clone)]
pub struct NeighborStats {
    pub sigmas: Vec<f64>,
    pub rhos: Vec<f64>,
}

fn euclidean(data: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    (data.row(i) - data.row(j)).norm()
}

fn k_smallest(mut candidates: Vec<(usize, f64)>, k: usize) -> (Vec<usize>, Vec<f64>) {
    candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(k);
    candidates.into_iter().unzip()
}

/// Exact or randomized k-nearest-neighbor graph.
///
/// Below `approx_cutoff` samples the search is an exact brute-force scan;
/// above it each sample ranks a random candidate subset instead. `k` clamps
/// to the available neighbor count.
pub fn knn_graph(data: &DMatrix<f64>, k: usize, approx_cutoff: usize, seed: u64) -> NeighborGraph {
    let n = data.nrows();
    let k = k.min(n.saturating_sub(1));
    if n <= approx_cutoff {
        exact_knn(data, k)
    } else {
        debug!("randomized neighbor search over {} samples (k={})", n, k);
        approximate_knn(data, k, seed)
    }
}

fn exact_knn(data: &DMatrix<f64>, k: usize) -> NeighborGraph {
    let n = data.nrows();
    let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let candidates: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(data, i, j)))
                .collect();
            k_smallest(candidates, k)
        })
        .collect();
    let (indices, distances) = rows.into_iter().unzip();
    NeighborGraph { indices, distances, k }
}

fn approximate_knn(data: &DMatrix<f64>, k: usize, seed: u64) -> NeighborGraph {
    let n = data.nrows();
    let pool = (k * APPROX_CANDIDATE_FACTOR).min(n - 1);
    let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed ^ (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let candidates: Vec<(usize, f64)> = index_sample(&mut rng, n, pool.min(n))
                .into_iter()
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(data, i, j)))
                .collect();
            k_smallest(candidates, k)
        })
        .collect();
    let (indices, distances) = rows.into_iter().unzip();
    NeighborGraph { indices, distances, k }
}

/// Fit per-sample `rho` and `sigma` so that the effective neighbor count
/// matches `log2(k)`:
///
/// ```text
/// sum_j exp(-(max(0, d_ij - rho_i)) / sigma_i) = log2(k)
/// ```
///
/// `rho` is the nearest strictly-positive neighbor distance; `sigma` is found
/// by bisection per sample.
pub fn smooth_knn_stats(graph: &NeighborGraph) -> NeighborStats {
    let target = (graph.k.max(2) as f64).log2();
    let fitted: Vec<(f64, f64)> = graph
        .distances
        .par_iter()
        .map(|dists| {
            let rho = dists
                .iter()
                .copied()
                .find(|&d| d > 0.0)
                .unwrap_or(0.0);
            let sigma = fit_sigma(dists, rho, target);
            (sigma, rho)
        })
        .collect();
    let (sigmas, rhos) = fitted.into_iter().unzip();
    NeighborStats { sigmas, rhos }
}

fn fit_sigma(distances: &[f64], rho: f64, target: f64) -> f64 {
    if distances.is_empty() {
        return 1.0;
    }
    let effective = |sigma: f64| -> f64 {
        distances
            .iter()
            .map(|&d| (-(d - rho).max(0.0) / sigma).exp())
            .sum()
    };

    let mut lo = 0.0_f64;
    let mut hi = f64::INFINITY;
    let mut mid = 1.0_f64;
    for _ in 0..SMOOTH_KNN_ITERATIONS {
        let value = effective(mid);
        if (value - target).abs() < SMOOTH_KNN_TOLERANCE {
            break;
        }
        if value > target {
            hi = mid;
            mid = 0.5 * (lo + hi);
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { 0.5 * (lo + hi) };
        }
    }
    mid.max(1e-12)
}

/// Directed membership strengths for every (sample, neighbor) pair.
///
/// Returns parallel arrays `(from, to, strength)` with
/// `strength = exp(-(max(0, d - rho)) / sigma)`.
pub fn membership_strengths(
    graph: &NeighborGraph,
    stats: &NeighborStats,
) -> (Vec<u32>, Vec<u32>, Vec<f64>) {
    let mut from = Vec::with_capacity(graph.indices.len() * graph.k);
    let mut to = Vec::with_capacity(graph.indices.len() * graph.k);
    let mut strengths = Vec::with_capacity(graph.indices.len() * graph.k);
    for (i, (neighbors, dists)) in graph.indices.iter().zip(&graph.distances).enumerate() {
        for (&j, &d) in neighbors.iter().zip(dists) {
            let p = (-(d - stats.rhos[i]).max(0.0) / stats.sigmas[i]).exp();
            from.push(i as u32);
            to.push(j as u32);
            strengths.push(p);
        }
    }
    (from, to, strengths)
}

/// Symmetrize directed memberships via the probabilistic union
/// `p_ij + p_ji - p_ij * p_ji`, materializing both directions once each.
pub fn symmetrize(
    from: &[u32],
    to: &[u32],
    strengths: &[f64],
) -> (Vec<u32>, Vec<u32>, Vec<f64>) {
    let mut directed: HashMap<(u32, u32), f64> = HashMap::with_capacity(strengths.len());
    for i in 0..strengths.len() {
        directed.insert((from[i], to[i]), strengths[i]);
    }

    // walk the input order, not the map, so edge order is deterministic
    let mut sym_from = Vec::with_capacity(strengths.len());
    let mut sym_to = Vec::with_capacity(strengths.len());
    let mut sym_p = Vec::with_capacity(strengths.len());
    for i in 0..strengths.len() {
        let (a, b) = (from[i], to[i]);
        let p_ab = strengths[i];
        let p_ba = directed.get(&(b, a)).copied().unwrap_or(0.0);
        // emit from the canonical direction so each pair lands exactly twice
        if a < b || p_ba == 0.0 {
            let union = p_ab + p_ba - p_ab * p_ba;
            sym_from.push(a);
            sym_to.push(b);
            sym_p.push(union);
            sym_from.push(b);
            sym_to.push(a);
            sym_p.push(union);
        }
    }
    (sym_from, sym_to, sym_p)
}

/// Fraction of each sample's top-k neighborhood retained when moving from
/// `prev` to `curr`, averaged over the shared sample universe. Bounded in
/// [0, 1]; equals 1 when both representation sets coincide.
pub fn neighbor_preserving_rate(
    prev: &DMatrix<f64>,
    curr: &DMatrix<f64>,
    k: usize,
    approx_cutoff: usize,
    seed: u64,
) -> f64 {
    let shared = prev.nrows().min(curr.nrows());
    if shared < 2 || k == 0 {
        return 0.0;
    }
    let prev_view = prev.rows(0, shared).into_owned();
    let curr_view = curr.rows(0, shared).into_owned();
    let prev_graph = knn_graph(&prev_view, k, approx_cutoff, seed);
    let curr_graph = knn_graph(&curr_view, k, approx_cutoff, seed);

    let per_sample: Vec<f64> = (0..shared)
        .into_par_iter()
        .map(|i| {
            let before: std::collections::HashSet<usize> =
                prev_graph.indices[i].iter().copied().collect();
            let kept = curr_graph.indices[i]
                .iter()
                .filter(|j| before.contains(j))
                .count();
            kept as f64 / prev_graph.k.max(1) as f64
        })
        .collect();
    per_sample.iter().sum::<f64>() / shared as f64
}

/// Symmetric Hausdorff distance between two representation sets:
/// the larger of the two directed max-min distances.
pub fn hausdorff_distance(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    let directed = |x: &DMatrix<f64>, y: &DMatrix<f64>| -> f64 {
        (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                (0..y.nrows())
                    .map(|j| (x.row(i) - y.row(j)).norm())
                    .fold(f64::INFINITY, f64::min)
            })
            .reduce(|| 0.0, f64::max)
    };
    directed(a, b).max(directed(b, a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid_data(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, 2, |i, c| if c == 0 { i as f64 } else { 0.0 })
    }

    #[test]
    fn exact_knn_finds_line_neighbors() {
        let data = grid_data(5);
        let graph = knn_graph(&data, 2, 1000, 0);
        assert_eq!(graph.indices[0], vec![1, 2]);
        assert_eq!(graph.indices[2].len(), 2);
        assert!(graph.indices[2].contains(&1) && graph.indices[2].contains(&3));
    }

    #[test]
    fn knn_clamps_k_to_available_samples() {
        let data = grid_data(3);
        let graph = knn_graph(&data, 15, 1000, 0);
        assert_eq!(graph.k, 2);
        for neighbors in &graph.indices {
            assert_eq!(neighbors.len(), 2);
        }
    }

    #[test]
    fn randomized_search_emits_full_neighbor_lists() {
        let data = grid_data(64);
        // cutoff below the sample count forces the randomized path
        let graph = knn_graph(&data, 4, 32, 7);
        assert_eq!(graph.k, 4);
        for (i, neighbors) in graph.indices.iter().enumerate() {
            assert!(!neighbors.contains(&i));
            assert_eq!(neighbors.len(), 4);
        }
    }

    #[test]
    fn knn_excludes_self_edges() {
        let data = grid_data(6);
        let graph = knn_graph(&data, 3, 1000, 0);
        for (i, neighbors) in graph.indices.iter().enumerate() {
            assert!(!neighbors.contains(&i));
        }
    }

    #[test]
    fn sigma_fit_hits_effective_neighbor_target() {
        let distances = vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0];
        let rho = 0.5;
        let target = 3.0;
        let sigma = fit_sigma(&distances, rho, target);
        let effective: f64 = distances
            .iter()
            .map(|&d| (-(d - rho).max(0.0) / sigma).exp())
            .sum();
        assert_abs_diff_eq!(effective, target, epsilon = 1e-3);
    }

    #[test]
    fn membership_is_one_at_rho_and_decays() {
        let data = grid_data(5);
        let graph = knn_graph(&data, 3, 1000, 0);
        let stats = smooth_knn_stats(&graph);
        let (_, _, strengths) = membership_strengths(&graph, &stats);
        // nearest neighbor sits exactly at rho: full membership
        assert_abs_diff_eq!(strengths[0], 1.0, epsilon = 1e-9);
        for &p in &strengths {
            assert!(p > 0.0 && p <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn symmetrization_is_a_probabilistic_union() {
        let from = vec![0u32, 1u32];
        let to = vec![1u32, 0u32];
        let strengths = vec![0.8, 0.5];
        let (_, _, sym) = symmetrize(&from, &to, &strengths);
        let expected = 0.8 + 0.5 - 0.8 * 0.5;
        assert_eq!(sym.len(), 2);
        assert_abs_diff_eq!(sym[0], expected, epsilon = 1e-12);
        assert_abs_diff_eq!(sym[1], expected, epsilon = 1e-12);
    }

    #[test]
    fn npr_is_one_for_identical_sets() {
        let data = grid_data(20);
        let rate = neighbor_preserving_rate(&data, &data, 5, 1000, 0);
        assert_abs_diff_eq!(rate, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn npr_is_bounded_for_shuffled_sets() {
        let prev = grid_data(20);
        let curr = DMatrix::from_fn(20, 2, |i, c| {
            if c == 0 { (19 - i) as f64 * 3.7 } else { (i as f64).sin() }
        });
        let rate = neighbor_preserving_rate(&prev, &curr, 5, 1000, 0);
        assert!((0.0..=1.0).contains(&rate));
    }

    #[test]
    fn hausdorff_of_identical_sets_is_zero() {
        let data = grid_data(8);
        assert_abs_diff_eq!(hausdorff_distance(&data, &data), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn hausdorff_detects_an_outlier() {
        let a = grid_data(4);
        let mut b = grid_data(4);
        b[(3, 0)] = 100.0;
        let d = hausdorff_distance(&a, &b);
        assert!(d > 90.0);
    }
}
