//! Composite embedding losses
//!
//! Structural preservation (a fuzzy cross-entropy over sampled edges with
//! negative sampling), encoder/decoder reconstruction fidelity, and the two
//! continuity regularizers: a penalty against the frozen previous model's
//! embedding of the same inputs, and a hinge on anchor displacement for the
//! segmented variant. Every term returns its value together with
//! embedding-space (or output-space) gradients so the trainer can chain them
//! through the model.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;

use nalgebra::DMatrix;
use rand::Rng;

use crate::model::EmbeddingModel;

/// Numerical floor keeping repulsion gradients finite at zero distance.
const REPULSION_EPSILON: f64 = 1e-3;

/// Floor for squared distances raised to fractional powers.
const DISTANCE_FLOOR: f64 = 1e-12;

/// Fit the low-dimensional membership curve `1 / (1 + a * d^(2b))` against
/// the piecewise target `1` for `d <= min_dist`, `exp(-(d - min_dist) / spread)`
/// beyond it. Coarse grid search followed by shrinking coordinate descent;
/// fully deterministic.
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let grid: Vec<f64> = (1..=300).map(|i| i as f64 * spread * 3.0 / 300.0).collect();
    let target: Vec<f64> = grid
        .iter()
        .map(|&d| {
            if d <= min_dist {
                1.0
            } else {
                (-(d - min_dist) / spread).exp()
            }
        })
        .collect();
    let sse = |a: f64, b: f64| -> f64 {
        grid.iter()
            .zip(&target)
            .map(|(&d, &t)| {
                let f = 1.0 / (1.0 + a * d.powf(2.0 * b));
                (f - t) * (f - t)
            })
            .sum()
    };

    let mut best = (1.0, 1.0);
    let mut best_sse = sse(best.0, best.1);
    let mut a = 0.1;
    while a <= 5.0 {
        let mut b = 0.3;
        while b <= 2.5 {
            let value = sse(a, b);
            if value < best_sse {
                best_sse = value;
                best = (a, b);
            }
            b += 0.02;
        }
        a += 0.05;
    }

    // shrink a local cross pattern around the grid optimum
    let mut step = (0.05_f64, 0.02_f64);
    for _ in 0..40 {
        let candidates = [
            (best.0 + step.0, best.1),
            (best.0 - step.0, best.1),
            (best.0, best.1 + step.1),
            (best.0, best.1 - step.1),
        ];
        let mut improved = false;
        for &(ca, cb) in &candidates {
            if ca > 0.0 && cb > 0.0 {
                let value = sse(ca, cb);
                if value < best_sse {
                    best_sse = value;
                    best = (ca, cb);
                    improved = true;
                }
            }
        }
        if !improved {
            step = (step.0 * 0.5, step.1 * 0.5);
        }
    }
    best
}

/// Structural-preservation loss over sampled edges.
///
/// Attraction pulls connected pairs together through `-ln q`; repulsion
/// pushes each source away from uniformly drawn negatives through
/// `-gamma * ln(1 - q)`, with `q = 1 / (1 + a * d2^b)`.
#[derive(Debug, Clone)]
pub struct UmapLoss {
    pub a: f64,
    pub b: f64,
    pub negative_sample_rate: usize,
    pub repulsion_strength: f64,
}

impl UmapLoss {
    pub fn new(a: f64, b: f64, negative_sample_rate: usize, repulsion_strength: f64) -> Self {
        Self { a, b, negative_sample_rate, repulsion_strength }
    }

    /// Loss and gradients over a batch of embedded edge endpoints
    /// (latent x batch, one edge per column).
    pub fn evaluate<R: Rng>(
        &self,
        z_from: &DMatrix<f64>,
        z_to: &DMatrix<f64>,
        rng: &mut R,
    ) -> (f64, DMatrix<f64>, DMatrix<f64>) {
        let batch = z_from.ncols();
        let scale = 1.0 / batch.max(1) as f64;
        let mut loss = 0.0;
        let mut grad_from = DMatrix::zeros(z_from.nrows(), batch);
        let mut grad_to = DMatrix::zeros(z_to.nrows(), batch);

        for col in 0..batch {
            let diff = z_from.column(col) - z_to.column(col);
            let d2 = diff.norm_squared().max(DISTANCE_FLOOR);
            let powed = self.a * d2.powf(self.b);
            // attraction: d/dd2 ln(1 + a d2^b)
            loss += scale * (1.0 + powed).ln();
            let attract = scale * 2.0 * self.a * self.b * d2.powf(self.b - 1.0) / (1.0 + powed);
            for r in 0..diff.nrows() {
                grad_from[(r, col)] += attract * diff[r];
                grad_to[(r, col)] -= attract * diff[r];
            }

            for _ in 0..self.negative_sample_rate {
                let negative = rng.gen_range(0..batch);
                if negative == col {
                    continue;
                }
                let diff_n = z_from.column(col) - z_to.column(negative);
                let d2n = diff_n.norm_squared().max(DISTANCE_FLOOR);
                let powed_n = self.a * d2n.powf(self.b);
                let q = 1.0 / (1.0 + powed_n);
                loss -= scale * self.repulsion_strength * (1.0 - q + REPULSION_EPSILON).ln();
                let repel = scale * 2.0 * self.repulsion_strength * self.b
                    / ((REPULSION_EPSILON + d2n) * (1.0 + powed_n));
                for r in 0..diff_n.nrows() {
                    grad_from[(r, col)] -= repel * diff_n[r];
                    grad_to[(r, negative)] += repel * diff_n[r];
                }
            }
        }
        (loss, grad_from, grad_to)
    }
}

/// Attention-weighted round-trip reconstruction error.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionLoss {
    pub beta: f64,
}

impl ReconstructionLoss {
    /// Mean of `(1 + beta * attention) * (x - x_hat)^2`; returns the loss and
    /// the gradient with respect to `x_hat`. All matrices are
    /// `input_dim x batch`.
    pub fn evaluate(
        &self,
        x: &DMatrix<f64>,
        x_hat: &DMatrix<f64>,
        attention: &DMatrix<f64>,
    ) -> (f64, DMatrix<f64>) {
        let count = (x.nrows() * x.ncols()).max(1) as f64;
        let mut loss = 0.0;
        let mut grad = DMatrix::zeros(x_hat.nrows(), x_hat.ncols());
        for c in 0..x.ncols() {
            for r in 0..x.nrows() {
                let weight = 1.0 + self.beta * attention[(r, c)];
                let residual = x_hat[(r, c)] - x[(r, c)];
                loss += weight * residual * residual / count;
                grad[(r, c)] = 2.0 * weight * residual / count;
            }
        }
        (loss, grad)
    }
}

/// Hinge on anchor displacement: `mean(max(0, ||z - z_anchor|| - margin))`.
#[derive(Debug, Clone, Copy)]
pub struct SmoothnessLoss {
    pub margin: f64,
}

impl SmoothnessLoss {
    /// `z` and `z_anchor` are `latent x n`, column-aligned.
    pub fn evaluate(&self, z: &DMatrix<f64>, z_anchor: &DMatrix<f64>) -> (f64, DMatrix<f64>) {
        let n = z.ncols().max(1) as f64;
        let mut loss = 0.0;
        let mut grad = DMatrix::zeros(z.nrows(), z.ncols());
        for c in 0..z.ncols() {
            let diff = z.column(c) - z_anchor.column(c);
            let distance = diff.norm();
            if distance > self.margin {
                loss += (distance - self.margin) / n;
                for r in 0..diff.nrows() {
                    grad[(r, c)] = diff[r] / (distance * n);
                }
            }
        }
        (loss, grad)
    }
}

/// Continuity term of the composite loss.
///
/// Either the temporal edges already folded into the structural loss carry
/// the continuity signal (`None`), or an explicit penalty anchors the round
/// to earlier state.
#[derive(Debug)]
pub enum Continuity {
    /// Sliding-window shape: temporal edges only
    None,
    /// Penalty against the frozen previous model's embedding of the same
    /// inputs, pre-weighted by the neighbor-preserving rate
    PreviousModel { model: EmbeddingModel, weight: f64 },
    /// Hinge against the previous round's anchor embeddings, looked up by
    /// global feature-row index
    AnchorSmoothness {
        loss: SmoothnessLoss,
        weight: f64,
        /// anchor embeddings, one row per anchor
        embeddings: DMatrix<f64>,
        /// feature-row index -> row in `embeddings`
        index_of: HashMap<usize, usize>,
    },
}

/// Strategy-specific composition of the loss terms.
#[derive(Debug)]
pub struct CompositeLoss {
    pub umap: UmapLoss,
    pub recon: ReconstructionLoss,
    /// Reconstruction weight
    pub lambda1: f64,
    pub continuity: Continuity,
}
