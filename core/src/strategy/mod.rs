//! Strategy orchestration
//!
//! One state machine per visualization method, all composed from the same
//! pipeline primitives: edge construction, importance sampling and the
//! warm-started trainer. The four variants differ only in round granularity
//! and in how previous-round anchor state threads forward; rounds are
//! strictly sequential because each depends on the model weights the
//! previous round produced.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

mod full_history;
mod incremental;
mod segmented;
mod sliding_window;

pub use full_history::FullHistoryStrategy;
pub use incremental::IncrementalStrategy;
pub use segmented::SegmentedStrategy;
pub use sliding_window::SlidingWindowStrategy;

use nalgebra::DMatrix;
use thiserror::Error;

use crate::complex::{ComplexError, EdgeSet};
use crate::config::ConfigError;
use crate::model::ModelError;
use crate::projector::{Projector, ProjectorError};
use crate::provider::{Checkpoint, DataProvider, ProviderError};
use crate::segment::SegmentError;
use crate::timing::TimingLedger;
use crate::train::TrainerError;

/// Strategy orchestration errors
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("Representation source failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("Edge construction failure: {0}")]
    Complex(#[from] ComplexError),

    #[error("Segmentation failure: {0}")]
    Segment(#[from] SegmentError),

    #[error("Training failure: {0}")]
    Trainer(#[from] TrainerError),

    #[error("Projection failure: {0}")]
    Projector(#[from] ProjectorError),

    #[error("Model failure: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid transition: {0} cannot follow {1}")]
    InvalidTransition(&'static str, &'static str),

    #[error("Incremental strategy was driven without an iteration")]
    IterationUnset,

    #[error("Sink failure: {0}")]
    Sink(String),
}

/// Forward-only lifecycle states shared by every strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Created,
    Initialized,
    Preprocessed,
    Segmented,
    Trained,
    Evaluated,
    Visualized,
}

impl StrategyState {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            StrategyState::Created => "created",
            StrategyState::Initialized => "initialized",
            StrategyState::Preprocessed => "preprocessed",
            StrategyState::Segmented => "segmented",
            StrategyState::Trained => "trained",
            StrategyState::Evaluated => "evaluated",
            StrategyState::Visualized => "visualized",
        }
    }
}

/// Enforce a forward-only transition: `current` must be one of `allowed`.
pub(crate) fn advance(
    current: &mut StrategyState,
    allowed: &[StrategyState],
    next: StrategyState,
) -> Result<(), StrategyError> {
    if allowed.contains(current) {
        *current = next;
        Ok(())
    } else {
        Err(StrategyError::InvalidTransition(next.name(), current.name()))
    }
}

/// Consumer of per-checkpoint evaluation output.
///
/// Metric computation and persistence formats live outside the core; the
/// orchestrator only hands over the trained projection surface and the
/// timing ledger.
pub trait EvaluationSink {
    fn epoch_evaluated(
        &mut self,
        checkpoint: Checkpoint,
        projector: &Projector,
        ledger: &TimingLedger,
    ) -> Result<(), String>;
}

/// Consumer of per-checkpoint projected coordinates.
pub trait VisualizationSink {
    fn render(
        &mut self,
        checkpoint: Checkpoint,
        coordinates: &DMatrix<f64>,
        labels: &[usize],
    ) -> Result<(), String>;
}

/// Sink that drops everything; useful for tests and training-only runs.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EvaluationSink for NoopSink {
    fn epoch_evaluated(
        &mut self,
        _checkpoint: Checkpoint,
        _projector: &Projector,
        _ledger: &TimingLedger,
    ) -> Result<(), String> {
        Ok(())
    }
}

impl VisualizationSink for NoopSink {
    fn render(
        &mut self,
        _checkpoint: Checkpoint,
        _coordinates: &DMatrix<f64>,
        _labels: &[usize],
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Common interface of the four visualization methods.
///
/// The default `visualize_embedding` sequencing matches the full-history
/// shape; variants that visualize before evaluating override it.
pub trait VisualizationStrategy {
    fn init(&mut self) -> Result<(), StrategyError>;
    fn preprocess(&mut self) -> Result<(), StrategyError>;
    fn train(&mut self) -> Result<(), StrategyError>;
    fn evaluate(&mut self, sink: &mut dyn EvaluationSink) -> Result<(), StrategyError>;
    fn visualize(&mut self, sink: &mut dyn VisualizationSink) -> Result<(), StrategyError>;

    /// Structured timing records accumulated so far.
    fn ledger(&self) -> &TimingLedger;

    fn visualize_embedding(
        &mut self,
        evaluation: &mut dyn EvaluationSink,
        visualization: &mut dyn VisualizationSink,
    ) -> Result<(), StrategyError> {
        self.init()?;
        self.preprocess()?;
        self.train()?;
        self.evaluate(evaluation)?;
        self.visualize(visualization)
    }
}

/// Concatenate spatial and temporal edges and renormalize for sampling.
pub(crate) fn combine_and_normalize(
    mut spatial: EdgeSet,
    temporal: Option<EdgeSet>,
) -> Result<EdgeSet, ComplexError> {
    if let Some(temporal) = temporal {
        spatial.extend(temporal);
    }
    spatial.normalized()
}

/// Project one checkpoint's representations and hand them to the sink.
pub(crate) fn render_checkpoint(
    provider: &dyn DataProvider,
    checkpoint: Checkpoint,
    projector: &Projector,
    sink: &mut dyn VisualizationSink,
) -> Result<(), StrategyError> {
    let data = provider.train_representation(checkpoint)?;
    let coordinates = projector.project(&data)?;
    let labels = provider.train_labels(checkpoint)?;
    sink.render(checkpoint, &coordinates, &labels)
        .map_err(StrategyError::Sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::{EdgeProvenance, EdgeSet};

    #[test]
    fn transitions_are_forward_only() {
        let mut state = StrategyState::Created;
        advance(&mut state, &[StrategyState::Created], StrategyState::Initialized).unwrap();
        assert_eq!(state, StrategyState::Initialized);
        let error = advance(&mut state, &[StrategyState::Created], StrategyState::Initialized);
        assert!(matches!(error, Err(StrategyError::InvalidTransition(_, _))));
    }

    #[test]
    fn combining_keeps_both_edge_families() {
        let mut spatial = EdgeSet::default();
        spatial.push(0, 1, 0.9, EdgeProvenance::Spatial);
        let mut temporal = EdgeSet::default();
        temporal.push(1, 2, 0.4, EdgeProvenance::Temporal);
        let combined = combine_and_normalize(spatial, Some(temporal)).unwrap();
        assert_eq!(combined.len(), 2);
        assert!(combined.provenance.contains(&EdgeProvenance::Spatial));
        assert!(combined.provenance.contains(&EdgeProvenance::Temporal));
    }
}
