//! Representation source interface
//!
//! The subject network, its storage layout and its inference stack are all
//! external collaborators; the pipeline only consumes per-checkpoint
//! representation matrices and a handful of derived accessors through the
//! [`DataProvider`] trait. An in-memory implementation backs the test suite
//! and small interactive runs.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DMatrix;
use parking_lot::RwLock;
use thiserror::Error;

/// Index into the subject model's training timeline.
pub type Checkpoint = usize;

/// Representation source errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No representation stored for checkpoint {0}")]
    MissingCheckpoint(Checkpoint),

    #[error("No labels stored for checkpoint {0}")]
    MissingLabels(Checkpoint),

    #[error("Boundary estimation unavailable for checkpoint {0}")]
    BoundaryUnavailable(Checkpoint),
}

/// Per-checkpoint accessor for the subject model's internal representations.
///
/// `update_window` narrows the active checkpoint range for providers with a
/// sliding view; `checkpoints` enumerates the active window in ascending
/// order. Representations are row-major: one sample per row.
pub trait DataProvider: Send + Sync {
    /// Active checkpoint range as (start, end, period).
    fn window(&self) -> (Checkpoint, Checkpoint, usize);

    /// Restrict the active range; period is preserved.
    fn update_window(&self, start: Checkpoint, end: Checkpoint);

    /// Checkpoints of the active window, ascending.
    fn checkpoints(&self) -> Vec<Checkpoint> {
        let (start, end, period) = self.window();
        (start..=end).step_by(period.max(1)).collect()
    }

    /// Representation matrix for one checkpoint (samples x dimensions).
    fn train_representation(&self, checkpoint: Checkpoint) -> Result<Arc<DMatrix<f64>>, ProviderError>;

    /// Ground-truth labels aligned with the representation rows.
    fn train_labels(&self, checkpoint: Checkpoint) -> Result<Arc<Vec<usize>>, ProviderError>;

    /// Classifier scores for arbitrary representation rows.
    fn prediction_scores(
        &self,
        checkpoint: Checkpoint,
        data: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, ProviderError>;

    /// Decision-boundary probes near low-confidence regions.
    fn estimate_boundary(
        &self,
        checkpoint: Checkpoint,
        count: usize,
        lower_bound: f64,
    ) -> Result<DMatrix<f64>, ProviderError>;
}

/// In-memory provider backed by preloaded matrices.
///
/// Boundary probes are synthesized as midpoints of cross-class sample pairs,
/// which is enough fidelity for pipeline tests; production deployments wrap
/// the real inference stack instead.
pub struct ArrayProvider {
    representations: HashMap<Checkpoint, Arc<DMatrix<f64>>>,
    labels: HashMap<Checkpoint, Arc<Vec<usize>>>,
    n_classes: usize,
    window: RwLock<(Checkpoint, Checkpoint, usize)>,
}

impl ArrayProvider {
    pub fn new(start: Checkpoint, end: Checkpoint, period: usize) -> Self {
        Self {
            representations: HashMap::new(),
            labels: HashMap::new(),
            n_classes: 0,
            window: RwLock::new((start, end, period.max(1))),
        }
    }

    /// Register one checkpoint's representation set and labels.
    pub fn insert(&mut self, checkpoint: Checkpoint, data: DMatrix<f64>, labels: Vec<usize>) {
        self.n_classes = self.n_classes.max(labels.iter().copied().max().map_or(0, |m| m + 1));
        self.representations.insert(checkpoint, Arc::new(data));
        self.labels.insert(checkpoint, Arc::new(labels));
    }
}

impl DataProvider for ArrayProvider {
    fn window(&self) -> (Checkpoint, Checkpoint, usize) {
        *self.window.read()
    }

    fn update_window(&self, start: Checkpoint, end: Checkpoint) {
        let mut window = self.window.write();
        *window = (start, end, window.2);
    }

    fn train_representation(&self, checkpoint: Checkpoint) -> Result<Arc<DMatrix<f64>>, ProviderError> {
        self.representations
            .get(&checkpoint)
            .cloned()
            .ok_or(ProviderError::MissingCheckpoint(checkpoint))
    }

    fn train_labels(&self, checkpoint: Checkpoint) -> Result<Arc<Vec<usize>>, ProviderError> {
        self.labels
            .get(&checkpoint)
            .cloned()
            .ok_or(ProviderError::MissingLabels(checkpoint))
    }

    fn prediction_scores(
        &self,
        checkpoint: Checkpoint,
        data: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, ProviderError> {
        // Nearest stored sample's label, one-hot. A stand-in for the subject
        // classifier; adequate for boundary synthesis and tests.
        let stored = self.train_representation(checkpoint)?;
        let labels = self.train_labels(checkpoint)?;
        let classes = self.n_classes.max(1);
        let mut scores = DMatrix::zeros(data.nrows(), classes);
        for i in 0..data.nrows() {
            let query = data.row(i);
            let mut best = (0usize, f64::INFINITY);
            for j in 0..stored.nrows() {
                let d = (query - stored.row(j)).norm_squared();
                if d < best.1 {
                    best = (j, d);
                }
            }
            scores[(i, labels[best.0])] = 1.0;
        }
        Ok(scores)
    }

    fn estimate_boundary(
        &self,
        checkpoint: Checkpoint,
        count: usize,
        _lower_bound: f64,
    ) -> Result<DMatrix<f64>, ProviderError> {
        let data = self.train_representation(checkpoint)?;
        let labels = self.train_labels(checkpoint)?;
        let mut probes: Vec<f64> = Vec::new();
        let dim = data.ncols();
        let mut produced = 0usize;
        'outer: for i in 0..data.nrows() {
            for j in (i + 1)..data.nrows() {
                if labels[i] != labels[j] {
                    for c in 0..dim {
                        probes.push(0.5 * (data[(i, c)] + data[(j, c)]));
                    }
                    produced += 1;
                    if produced == count {
                        break 'outer;
                    }
                }
            }
        }
        if produced == 0 {
            return Err(ProviderError::BoundaryUnavailable(checkpoint));
        }
        Ok(DMatrix::from_row_slice(produced, dim, &probes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_two_classes() -> ArrayProvider {
        let mut provider = ArrayProvider::new(1, 1, 1);
        let data = DMatrix::from_row_slice(4, 2, &[
            0.0, 0.0,
            0.1, 0.0,
            1.0, 1.0,
            1.1, 1.0,
        ]);
        provider.insert(1, data, vec![0, 0, 1, 1]);
        provider
    }

    #[test]
    fn window_updates_preserve_period() {
        let provider = ArrayProvider::new(1, 9, 2);
        provider.update_window(3, 7);
        assert_eq!(provider.window(), (3, 7, 2));
        assert_eq!(provider.checkpoints(), vec![3, 5, 7]);
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let provider = provider_with_two_classes();
        assert!(matches!(
            provider.train_representation(9),
            Err(ProviderError::MissingCheckpoint(9))
        ));
    }

    #[test]
    fn boundary_probes_sit_between_classes() {
        let provider = provider_with_two_classes();
        let probes = provider.estimate_boundary(1, 2, 0.4).unwrap();
        assert_eq!(probes.nrows(), 2);
        for i in 0..probes.nrows() {
            assert!(probes[(i, 0)] > 0.0 && probes[(i, 0)] < 1.2);
        }
    }
}
