//! Spatial edge construction
//!
//! Builds the within-checkpoint proximity complex: k-nearest-neighbor graphs
//! over sample representations (optionally mixed with decision-boundary
//! probes), converted into symmetrized membership probabilities. The
//! multi-checkpoint variant batches a whole checkpoint window into one
//! concatenated complex and threads the previous round's anchor state
//! through a fitted frame correction for warm-started training.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::time::Instant;

use log::{debug, info};
use nalgebra::DMatrix;

use crate::complex::neighborhood::{
    knn_graph, membership_strengths, smooth_knn_stats, symmetrize, NeighborStats,
};
use crate::complex::{AnchorState, ComplexError, EdgeProvenance, EdgeSet};
use crate::provider::{Checkpoint, DataProvider};

/// Sample counts of one checkpoint block inside a concatenated complex.
#[derive(Debug, Clone, Copy)]
pub struct BlockSize {
    /// Training samples at this checkpoint
    pub train: usize,
    /// Boundary probes appended after them
    pub boundary: usize,
}

impl BlockSize {
    pub fn total(&self) -> usize {
        self.train + self.boundary
    }
}

/// Output of a single-checkpoint spatial construction.
#[derive(Debug)]
pub struct SpatialComplex {
    pub edges: EdgeSet,
    /// Concatenated feature rows: training samples then boundary probes
    pub features: DMatrix<f64>,
    /// Per-dimension attention weights, row-aligned with `features`
    pub attention: DMatrix<f64>,
    pub stats: NeighborStats,
}

/// Output of a multi-checkpoint (windowed) spatial construction.
#[derive(Debug)]
pub struct WindowComplex {
    pub edges: EdgeSet,
    /// Feature rows concatenated oldest checkpoint first
    pub features: DMatrix<f64>,
    pub attention: DMatrix<f64>,
    /// Block sizes, one per checkpoint, oldest first
    pub time_step_nums: Vec<BlockSize>,
    /// Neighbor statistics aligned with `features` rows
    pub stats: NeighborStats,
    /// Previous-round anchors remapped onto this window's feature rows
    pub anchors: Option<AnchorState>,
    /// Fitted frame correction, identity when no anchors were supplied
    pub coefficients: (f64, f64),
}

fn stack_with_boundary(
    provider: &dyn DataProvider,
    checkpoint: Checkpoint,
    b_n_epochs: f64,
    l_bound: f64,
) -> Result<(DMatrix<f64>, BlockSize), ComplexError> {
    let data = provider.train_representation(checkpoint)?;
    let train = data.nrows();
    if train == 0 {
        return Err(ComplexError::EmptyCheckpoint(checkpoint));
    }
    if b_n_epochs <= 0.0 {
        return Ok((data.as_ref().clone(), BlockSize { train, boundary: 0 }));
    }
    let budget = (train / 10).max(1);
    let probes = provider.estimate_boundary(checkpoint, budget, l_bound)?;
    let boundary = probes.nrows();
    let mut stacked = DMatrix::zeros(train + boundary, data.ncols());
    stacked.rows_mut(0, train).copy_from(&*data);
    stacked.rows_mut(train, boundary).copy_from(&probes);
    Ok((stacked, BlockSize { train, boundary }))
}

fn attention_for(block: BlockSize, dim: usize) -> DMatrix<f64> {
    // training rows carry full attention, boundary probes none
    let mut attention = DMatrix::zeros(block.total(), dim);
    attention.rows_mut(0, block.train).fill(1.0);
    attention
}

fn block_edges(
    features: &DMatrix<f64>,
    n_neighbors: usize,
    approx_cutoff: usize,
    seed: u64,
    offset: u32,
) -> (EdgeSet, NeighborStats) {
    let graph = knn_graph(features, n_neighbors, approx_cutoff, seed);
    let stats = smooth_knn_stats(&graph);
    let (from, to, strengths) = membership_strengths(&graph, &stats);
    let (sym_from, sym_to, sym_p) = symmetrize(&from, &to, &strengths);

    let mut edges = EdgeSet::with_capacity(sym_p.len());
    for i in 0..sym_p.len() {
        edges.push(
            sym_from[i] + offset,
            sym_to[i] + offset,
            sym_p[i],
            EdgeProvenance::Spatial,
        );
    }
    (edges, stats)
}

/// Spatial constructor over one checkpoint.
pub struct SingleCheckpointConstructor<'a> {
    provider: &'a dyn DataProvider,
    checkpoint: Checkpoint,
    n_neighbors: usize,
    b_n_epochs: f64,
    l_bound: f64,
    approx_cutoff: usize,
    seed: u64,
}

impl<'a> SingleCheckpointConstructor<'a> {
    pub fn new(
        provider: &'a dyn DataProvider,
        checkpoint: Checkpoint,
        n_neighbors: usize,
        b_n_epochs: f64,
        l_bound: f64,
        approx_cutoff: usize,
        seed: u64,
    ) -> Self {
        Self { provider, checkpoint, n_neighbors, b_n_epochs, l_bound, approx_cutoff, seed }
    }

    pub fn construct(&self) -> Result<SpatialComplex, ComplexError> {
        let started = Instant::now();
        let (features, block) =
            stack_with_boundary(self.provider, self.checkpoint, self.b_n_epochs, self.l_bound)?;
        let attention = attention_for(block, features.ncols());
        let (edges, stats) =
            block_edges(&features, self.n_neighbors, self.approx_cutoff, self.seed, 0);
        debug!(
            "spatial complex for checkpoint {}: {} samples (+{} boundary), {} edges in {:.3}s",
            self.checkpoint,
            block.train,
            block.boundary,
            edges.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(SpatialComplex { edges, features, attention, stats })
    }
}

/// Spatial constructor over the provider's active checkpoint window.
///
/// Each checkpoint becomes one block of the concatenated feature matrix;
/// edges never cross blocks (temporal correspondence is the temporal
/// constructor's job). When the previous round supplied an anchor set, the
/// anchors are remapped onto the final block (the shared boundary
/// checkpoint) and the frame correction is refit against their embeddings.
pub struct MultiCheckpointConstructor<'a> {
    provider: &'a dyn DataProvider,
    n_neighbors: usize,
    b_n_epochs: f64,
    l_bound: f64,
    approx_cutoff: usize,
    seed: u64,
    init_idxs: Option<&'a [usize]>,
    init_embeddings: Option<&'a DMatrix<f64>>,
}

impl<'a> MultiCheckpointConstructor<'a> {
    pub fn new(
        provider: &'a dyn DataProvider,
        n_neighbors: usize,
        b_n_epochs: f64,
        l_bound: f64,
        approx_cutoff: usize,
        seed: u64,
    ) -> Self {
        Self {
            provider,
            n_neighbors,
            b_n_epochs,
            l_bound,
            approx_cutoff,
            seed,
            init_idxs: None,
            init_embeddings: None,
        }
    }

    /// Supply the previous round's anchor pool for warm-started continuity.
    pub fn with_anchors(mut self, indices: &'a [usize], embeddings: &'a DMatrix<f64>) -> Self {
        self.init_idxs = Some(indices);
        self.init_embeddings = Some(embeddings);
        self
    }

    pub fn construct(&self) -> Result<WindowComplex, ComplexError> {
        let started = Instant::now();
        let checkpoints = self.provider.checkpoints();
        if checkpoints.is_empty() {
            return Err(ComplexError::EmptyCheckpoint(self.provider.window().0));
        }

        let mut blocks: Vec<(DMatrix<f64>, BlockSize)> = Vec::with_capacity(checkpoints.len());
        for &checkpoint in &checkpoints {
            blocks.push(stack_with_boundary(
                self.provider,
                checkpoint,
                self.b_n_epochs,
                self.l_bound,
            )?);
        }
        let dim = blocks[0].0.ncols();
        let total_rows: usize = blocks.iter().map(|(_, b)| b.total()).sum();

        let mut features = DMatrix::zeros(total_rows, dim);
        let mut attention = DMatrix::zeros(total_rows, dim);
        let mut edges = EdgeSet::default();
        let mut stats = NeighborStats { sigmas: Vec::with_capacity(total_rows), rhos: Vec::with_capacity(total_rows) };
        let mut time_step_nums = Vec::with_capacity(blocks.len());

        let mut offset = 0usize;
        for (i, (block_features, block)) in blocks.iter().enumerate() {
            features.rows_mut(offset, block.total()).copy_from(block_features);
            attention
                .rows_mut(offset, block.total())
                .copy_from(&attention_for(*block, dim));
            let (block_edge_set, block_stats) = block_edges(
                block_features,
                self.n_neighbors,
                self.approx_cutoff,
                self.seed.wrapping_add(i as u64),
                offset as u32,
            );
            edges.extend(block_edge_set);
            stats.sigmas.extend(block_stats.sigmas);
            stats.rhos.extend(block_stats.rhos);
            time_step_nums.push(*block);
            offset += block.total();
        }

        let anchors = match (self.init_idxs, self.init_embeddings) {
            (Some(indices), Some(embeddings)) => {
                let last_offset = total_rows - time_step_nums.last().map_or(0, |b| b.total());
                let rows: Vec<usize> = indices.iter().map(|&i| last_offset + i).collect();
                Some(AnchorState::new(rows, embeddings.clone())?)
            }
            _ => None,
        };
        let coefficients = anchors.as_ref().map_or((1.0, 0.0), |a| a.coefficients);

        info!(
            "window complex over {} checkpoints: {} rows, {} edges in {:.3}s",
            checkpoints.len(),
            total_rows,
            edges.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(WindowComplex {
            edges,
            features,
            attention,
            time_step_nums,
            stats,
            anchors,
            coefficients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ArrayProvider;
    use nalgebra::DMatrix;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn gaussian_provider(checkpoints: &[usize], n: usize, dim: usize) -> ArrayProvider {
        let mut provider = ArrayProvider::new(
            *checkpoints.first().unwrap(),
            *checkpoints.last().unwrap(),
            1,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for &cp in checkpoints {
            let data = DMatrix::from_fn(n, dim, |_, _| rng.gen_range(-1.0..1.0));
            let labels = (0..n).map(|i| i % 2).collect();
            provider.insert(cp, data, labels);
        }
        provider
    }

    #[test]
    fn single_checkpoint_complex_has_symmetric_edges() {
        let provider = gaussian_provider(&[1], 30, 4);
        let complex = SingleCheckpointConstructor::new(&provider, 1, 5, 0.0, 0.4, 1000, 0)
            .construct()
            .unwrap();
        assert_eq!(complex.features.nrows(), 30);
        assert_eq!(complex.stats.sigmas.len(), 30);
        // every edge appears in both directions with equal weight
        use std::collections::HashMap;
        let mut weights: HashMap<(u32, u32), f64> = HashMap::new();
        for i in 0..complex.edges.len() {
            weights.insert(
                (complex.edges.from[i], complex.edges.to[i]),
                complex.edges.probabilities[i],
            );
        }
        for (&(a, b), &p) in &weights {
            let reverse = weights.get(&(b, a)).copied().unwrap();
            assert!((p - reverse).abs() < 1e-12);
        }
    }

    #[test]
    fn boundary_probes_carry_zero_attention() {
        let provider = gaussian_provider(&[1], 30, 4);
        let complex = SingleCheckpointConstructor::new(&provider, 1, 5, 1.0, 0.4, 1000, 0)
            .construct()
            .unwrap();
        assert!(complex.features.nrows() > 30);
        for r in 0..30 {
            assert_eq!(complex.attention[(r, 0)], 1.0);
        }
        for r in 30..complex.features.nrows() {
            assert_eq!(complex.attention[(r, 0)], 0.0);
        }
    }

    #[test]
    fn window_complex_keeps_blocks_disjoint() {
        let provider = gaussian_provider(&[1, 2, 3], 20, 4);
        let complex = MultiCheckpointConstructor::new(&provider, 5, 0.0, 0.4, 1000, 0)
            .construct()
            .unwrap();
        assert_eq!(complex.time_step_nums.len(), 3);
        assert_eq!(complex.features.nrows(), 60);
        // no spatial edge crosses a checkpoint block
        for i in 0..complex.edges.len() {
            let a = complex.edges.from[i] as usize / 20;
            let b = complex.edges.to[i] as usize / 20;
            assert_eq!(a, b);
        }
    }

    #[test]
    fn anchors_remap_onto_final_block() {
        let provider = gaussian_provider(&[1, 2, 3], 20, 4);
        let embeddings = DMatrix::from_fn(4, 2, |i, c| (i + c) as f64);
        let indices = vec![0, 5, 10, 15];
        let complex = MultiCheckpointConstructor::new(&provider, 5, 0.0, 0.4, 1000, 0)
            .with_anchors(&indices, &embeddings)
            .construct()
            .unwrap();
        let anchors = complex.anchors.unwrap();
        assert_eq!(anchors.indices, vec![40, 45, 50, 55]);
        assert_eq!(anchors.embeddings.nrows(), 4);
    }
}
