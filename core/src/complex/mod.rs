//! Weighted proximity complexes
//!
//! The edge complex is the pipeline's central data structure: directed edges
//! carrying membership probabilities, built spatially within a checkpoint and
//! temporally across checkpoints, then renormalized into the (0, 1] range the
//! sampler draws from.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod neighborhood;
pub mod spatial;
pub mod temporal;

use nalgebra::DMatrix;
use thiserror::Error;

use crate::provider::ProviderError;

/// Margin added to the maximum probability before renormalization.
pub const NORMALIZATION_MARGIN: f64 = 1e-3;

/// Probabilities at or below this threshold are dropped after normalization.
pub const ELIMINATION_THRESHOLD: f64 = 1e-3;

/// Edge construction errors
#[derive(Debug, Error)]
pub enum ComplexError {
    #[error("Representation source failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("Checkpoint {0} has no samples to build a complex from")]
    EmptyCheckpoint(usize),

    #[error("All edge probabilities fell below the retention threshold")]
    DegenerateComplex,

    #[error("Anchor set references {0} samples but only {1} embeddings were supplied")]
    AnchorShapeMismatch(usize, usize),
}

/// Origin of an edge within the complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeProvenance {
    /// Proximity relation inside one checkpoint
    Spatial,
    /// Correspondence relation across adjacent checkpoints
    Temporal,
}

/// Directed weighted edge set in struct-of-arrays layout.
///
/// Endpoints index the concatenated feature matrix of the round that built
/// the complex. The underlying relation is symmetric; both directions are
/// materialized so the sampler sees each incidence once.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    pub from: Vec<u32>,
    pub to: Vec<u32>,
    pub probabilities: Vec<f64>,
    pub provenance: Vec<EdgeProvenance>,
}

impl EdgeSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            from: Vec::with_capacity(capacity),
            to: Vec::with_capacity(capacity),
            probabilities: Vec::with_capacity(capacity),
            provenance: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.from.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty()
    }

    pub fn push(&mut self, from: u32, to: u32, probability: f64, provenance: EdgeProvenance) {
        self.from.push(from);
        self.to.push(to);
        self.probabilities.push(probability);
        self.provenance.push(provenance);
    }

    /// Append another edge set, consuming it.
    pub fn extend(&mut self, other: EdgeSet) {
        self.from.extend(other.from);
        self.to.extend(other.to);
        self.probabilities.extend(other.probabilities);
        self.provenance.extend(other.provenance);
    }

    /// Renormalize probabilities into (0, 1] and drop eliminated edges.
    ///
    /// Divides by `max + NORMALIZATION_MARGIN`, then retains only entries
    /// strictly above [`ELIMINATION_THRESHOLD`]. An empty survivor set is a
    /// reportable failure of the round, never a silent skip.
    pub fn normalized(self) -> Result<EdgeSet, ComplexError> {
        if self.is_empty() {
            return Err(ComplexError::DegenerateComplex);
        }
        let max = self
            .probabilities
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let scale = 1.0 / (max + NORMALIZATION_MARGIN);

        let mut survivors = EdgeSet::with_capacity(self.len());
        for i in 0..self.len() {
            let p = self.probabilities[i] * scale;
            if p > ELIMINATION_THRESHOLD {
                survivors.push(self.from[i], self.to[i], p, self.provenance[i]);
            }
        }
        if survivors.is_empty() {
            return Err(ComplexError::DegenerateComplex);
        }
        Ok(survivors)
    }
}

/// Anchor state threaded between rounds of the incremental strategies.
///
/// Holds the previous round's selected sample indices, their embeddings under
/// the previous model, and the two-scalar frame correction fitted against
/// them. Immutable once built; each round replaces it wholesale.
#[derive(Debug, Clone)]
pub struct AnchorState {
    /// Sample indices (into the shared sample universe) of the anchor pool
    pub indices: Vec<usize>,
    /// Previous-round embeddings of the anchor pool, one row per anchor
    pub embeddings: DMatrix<f64>,
    /// Frame correction (scale, offset) mapping the embeddings into a
    /// consistent coordinate frame
    pub coefficients: (f64, f64),
}

impl AnchorState {
    pub fn new(indices: Vec<usize>, embeddings: DMatrix<f64>) -> Result<Self, ComplexError> {
        if indices.len() != embeddings.nrows() {
            return Err(ComplexError::AnchorShapeMismatch(indices.len(), embeddings.nrows()));
        }
        let coefficients = fit_frame_correction(&embeddings);
        Ok(Self { indices, embeddings, coefficients })
    }

    /// Anchor embeddings mapped through the frame correction.
    pub fn corrected_embeddings(&self) -> DMatrix<f64> {
        let (c0, d0) = self.coefficients;
        let centroid = self.embeddings.row_mean();
        let mut corrected = self.embeddings.clone();
        for mut row in corrected.row_iter_mut() {
            let centered = &row - &centroid;
            let radius = centered.norm();
            if radius > f64::EPSILON && c0 > f64::EPSILON {
                let scaled = (radius - d0) / c0;
                row.copy_from(&(&centroid + centered * (scaled / radius)));
            }
        }
        corrected
    }
}

/// Fit the two-scalar correction `(c0, d0)` for a previous embedding cloud.
///
/// `d0` is the minimum radius about the centroid and `c0` the mean residual
/// radius, so corrected radii `(r - d0) / c0` have unit mean. Degenerate
/// clouds (single point, zero spread) fall back to the identity correction.
pub fn fit_frame_correction(embeddings: &DMatrix<f64>) -> (f64, f64) {
    if embeddings.nrows() < 2 {
        return (1.0, 0.0);
    }
    let centroid = embeddings.row_mean();
    let radii: Vec<f64> = embeddings
        .row_iter()
        .map(|row| (row - &centroid).norm())
        .collect();
    let d0 = radii.iter().copied().fold(f64::INFINITY, f64::min);
    let c0 = radii.iter().map(|r| r - d0).sum::<f64>() / radii.len() as f64;
    if c0 <= f64::EPSILON {
        (1.0, 0.0)
    } else {
        (c0, d0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_edges(probs: &[f64]) -> EdgeSet {
        let mut edges = EdgeSet::default();
        for (i, &p) in probs.iter().enumerate() {
            edges.push(i as u32, (i + 1) as u32, p, EdgeProvenance::Spatial);
        }
        edges
    }

    #[test]
    fn normalization_caps_probabilities_at_one() {
        let edges = raw_edges(&[0.2, 0.8, 0.5]).normalized().unwrap();
        let max = edges.probabilities.iter().cloned().fold(0.0, f64::max);
        assert!(max <= 1.0);
        assert!((max - 1.0).abs() < 2e-3);
        for &p in &edges.probabilities {
            assert!(p > ELIMINATION_THRESHOLD);
        }
    }

    #[test]
    fn normalization_eliminates_vanishing_edges() {
        let edges = raw_edges(&[1.0, 1e-9, 0.5]).normalized().unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn all_vanishing_edges_is_reported() {
        let edges = raw_edges(&[0.0, 0.0]);
        assert!(matches!(edges.normalized(), Err(ComplexError::DegenerateComplex)));
    }

    #[test]
    fn frame_correction_is_identity_for_degenerate_clouds() {
        let single = DMatrix::from_row_slice(1, 2, &[3.0, 4.0]);
        assert_eq!(fit_frame_correction(&single), (1.0, 0.0));
    }

    #[test]
    fn frame_correction_normalizes_residual_radius() {
        // centroid at origin; radii are 1, 1, 3, 3
        let cloud = DMatrix::from_row_slice(4, 2, &[
            1.0, 0.0,
            -1.0, 0.0,
            3.0, 0.0,
            -3.0, 0.0,
        ]);
        let (c0, d0) = fit_frame_correction(&cloud);
        assert!((d0 - 1.0).abs() < 1e-12);
        assert!((c0 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn uniform_radius_cloud_degrades_to_identity() {
        let cloud = DMatrix::from_row_slice(4, 2, &[
            2.0, 0.0,
            -2.0, 0.0,
            0.0, 2.0,
            0.0, -2.0,
        ]);
        assert_eq!(fit_frame_correction(&cloud), (1.0, 0.0));
    }
}
