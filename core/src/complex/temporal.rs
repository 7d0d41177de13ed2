//! Temporal edge construction
//!
//! Connects each sample to its counterpart at adjacent checkpoints inside a
//! concatenated window complex. Correspondence is by identity of the sample
//! index; checkpoints with different sample universes align on the
//! intersection only. Probability weights reuse the spatial bandwidth
//! statistics so both edge families live on one scale, and are multiplied by
//! the temporal-to-spatial budget ratio so the shared sampling budget draws
//! the configured number of temporal edges per transition.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::debug;
use nalgebra::DMatrix;

use crate::complex::neighborhood::NeighborStats;
use crate::complex::spatial::BlockSize;
use crate::complex::{EdgeProvenance, EdgeSet};

/// Temporal constructor over a concatenated window complex.
pub struct TemporalEdgeConstructor<'a> {
    features: &'a DMatrix<f64>,
    time_step_nums: &'a [BlockSize],
    stats: &'a NeighborStats,
    t_n_epochs: f64,
    s_n_epochs: f64,
}

impl<'a> TemporalEdgeConstructor<'a> {
    pub fn new(
        features: &'a DMatrix<f64>,
        time_step_nums: &'a [BlockSize],
        stats: &'a NeighborStats,
        t_n_epochs: f64,
        s_n_epochs: f64,
    ) -> Self {
        Self { features, time_step_nums, stats, t_n_epochs, s_n_epochs }
    }

    /// Emit correspondence edges between every adjacent checkpoint pair.
    ///
    /// Boundary probes appended to each block never participate; only the
    /// training-sample prefix of a block has a counterpart at the next
    /// checkpoint.
    pub fn construct(&self) -> EdgeSet {
        let scale = self.t_n_epochs / self.s_n_epochs;
        let mut offsets = Vec::with_capacity(self.time_step_nums.len());
        let mut acc = 0usize;
        for block in self.time_step_nums {
            offsets.push(acc);
            acc += block.total();
        }

        let mut edges = EdgeSet::default();
        for t in 0..self.time_step_nums.len().saturating_sub(1) {
            let shared = self.time_step_nums[t]
                .train
                .min(self.time_step_nums[t + 1].train);
            for i in 0..shared {
                let a = offsets[t] + i;
                let b = offsets[t + 1] + i;
                let d = (self.features.row(a) - self.features.row(b)).norm();

                let p_ab = membership(d, self.stats.rhos[a], self.stats.sigmas[a]);
                let p_ba = membership(d, self.stats.rhos[b], self.stats.sigmas[b]);
                let union = (p_ab + p_ba - p_ab * p_ba) * scale;

                edges.push(a as u32, b as u32, union, EdgeProvenance::Temporal);
                edges.push(b as u32, a as u32, union, EdgeProvenance::Temporal);
            }
        }
        debug!(
            "temporal edges across {} transitions: {}",
            self.time_step_nums.len().saturating_sub(1),
            edges.len()
        );
        edges
    }
}

fn membership(distance: f64, rho: f64, sigma: f64) -> f64 {
    (-(distance - rho).max(0.0) / sigma).exp()
}
