//! Pipeline configuration surface
//!
//! The core treats every tunable as an opaque numeric parameter supplied by
//! its caller; this module only gives those parameters a typed shape and a
//! fail-fast validation pass so that no round starts with a defaulted
//! critical value.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Checkpoint range is empty: start={0}, end={1}")]
    EmptyCheckpointRange(usize, usize),

    #[error("Checkpoint period must be at least 1")]
    ZeroPeriod,

    #[error("Neighbor count must be at least 1")]
    ZeroNeighbors,

    #[error("Edge budget multiplier must be positive: {0}={1}")]
    NonPositiveBudget(&'static str, f64),

    #[error("Drift threshold must be positive, got {0}")]
    NonPositiveDriftThreshold(f64),

    #[error("Segmentation of a single checkpoint would yield an empty segment")]
    DegenerateSegmentRange,

    #[error("Encoder/decoder layer stack needs at least input and output widths")]
    DegenerateLayerStack,

    #[error("Encoder output width {0} does not match decoder input width {1}")]
    MismatchedLatentWidth(usize, usize),

    #[error("Early stopping requires max_epoch >= 1 and patience >= 1")]
    DegenerateStoppingBounds,

    #[error("Optimizer learning rate must be positive, got {0}")]
    NonPositiveLearningRate(f64),

    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("Anchor pool size must be at least 1 for the segmented strategy")]
    ZeroAnchorPool,
}

/// Step-decay learning-rate schedule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Epochs between decay steps
    pub step_size: usize,
    /// Multiplicative decay factor applied every `step_size` epochs
    pub gamma: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { step_size: 4, gamma: 0.1 }
    }
}

/// Full parameter surface of one visualization run.
///
/// Defaults mirror the values the strategies were tuned with; callers are
/// still expected to set the checkpoint range and layer widths explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// First checkpoint of the active range
    pub epoch_start: usize,
    /// Last checkpoint of the active range (inclusive)
    pub epoch_end: usize,
    /// Stride between stored checkpoints
    pub epoch_period: usize,

    /// Neighbor count for proximity graphs
    pub n_neighbors: usize,
    /// Spatial edge budget multiplier (draws per unit probability mass)
    pub s_n_epochs: f64,
    /// Temporal edge budget multiplier
    pub t_n_epochs: f64,
    /// Boundary edge budget multiplier; zero disables boundary probes
    pub b_n_epochs: f64,
    /// Confidence lower bound handed to boundary estimation
    pub l_bound: f64,

    /// Reconstruction loss weight
    pub lambda1: f64,
    /// Continuity (temporal / smoothness) loss weight
    pub lambda2: f64,
    /// Hinge margin for the anchor smoothness penalty
    pub smooth_margin: f64,
    /// Negative samples drawn per positive edge in the structural loss
    pub negative_sample_rate: usize,
    /// Minimum low-dimensional distance for the structural membership curve
    pub min_dist: f64,
    /// Spread of the low-dimensional membership curve
    pub spread: f64,

    /// Accumulated-drift threshold closing a segment
    pub max_drift: f64,
    /// Anchor pool size carried between segments
    pub init_num: usize,

    /// Adam learning rate
    pub learning_rate: f64,
    /// Adam weight decay
    pub weight_decay: f64,
    /// Step-decay schedule
    pub schedule: ScheduleConfig,
    /// Epochs without improvement before a round stops
    pub patience: usize,
    /// Hard epoch ceiling per round
    pub max_epoch: usize,
    /// Mini-batch size
    pub batch_size: usize,

    /// Edge-count cutoff switching the sampler to its partitioned strategy
    pub large_edge_cutoff: usize,
    /// Sample-count cutoff switching neighbor search to its randomized path
    pub approx_knn_cutoff: usize,

    /// Seed for every stochastic stage of the pipeline
    pub seed: u64,

    /// Encoder layer widths, input first, latent last
    pub encoder_dims: Vec<usize>,
    /// Decoder layer widths, latent first, input last
    pub decoder_dims: Vec<usize>,
    /// Name under which model artifacts are persisted
    pub vis_model_name: String,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            epoch_start: 1,
            epoch_end: 1,
            epoch_period: 1,
            n_neighbors: 15,
            s_n_epochs: 5.0,
            t_n_epochs: 100.0,
            b_n_epochs: 0.0,
            l_bound: 0.4,
            lambda1: 1.0,
            lambda2: 1.0,
            smooth_margin: 0.5,
            negative_sample_rate: 5,
            min_dist: 0.1,
            spread: 1.0,
            max_drift: 78.5,
            init_num: 100,
            learning_rate: 0.01,
            weight_decay: 1e-5,
            schedule: ScheduleConfig::default(),
            patience: 3,
            max_epoch: 20,
            batch_size: 1000,
            large_edge_cutoff: 1 << 24,
            approx_knn_cutoff: 50_000,
            seed: 0,
            encoder_dims: Vec::new(),
            decoder_dims: Vec::new(),
            vis_model_name: "trajectory".to_string(),
        }
    }
}

impl VisualizationConfig {
    /// Checkpoints of the active range, in ascending order.
    pub fn checkpoints(&self) -> Vec<usize> {
        (self.epoch_start..=self.epoch_end)
            .step_by(self.epoch_period.max(1))
            .collect()
    }

    /// Fail-fast validation; called by every strategy before its first round.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_period == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.epoch_end < self.epoch_start {
            return Err(ConfigError::EmptyCheckpointRange(self.epoch_start, self.epoch_end));
        }
        if self.n_neighbors == 0 {
            return Err(ConfigError::ZeroNeighbors);
        }
        if self.s_n_epochs <= 0.0 {
            return Err(ConfigError::NonPositiveBudget("s_n_epochs", self.s_n_epochs));
        }
        if self.t_n_epochs <= 0.0 {
            return Err(ConfigError::NonPositiveBudget("t_n_epochs", self.t_n_epochs));
        }
        if self.b_n_epochs < 0.0 {
            return Err(ConfigError::NonPositiveBudget("b_n_epochs", self.b_n_epochs));
        }
        if self.encoder_dims.len() < 2 || self.decoder_dims.len() < 2 {
            return Err(ConfigError::DegenerateLayerStack);
        }
        if self.encoder_dims.iter().chain(&self.decoder_dims).any(|&w| w == 0) {
            return Err(ConfigError::DegenerateLayerStack);
        }
        let latent = *self.encoder_dims.last().unwrap_or(&0);
        if latent != self.decoder_dims[0] {
            return Err(ConfigError::MismatchedLatentWidth(latent, self.decoder_dims[0]));
        }
        if self.max_epoch == 0 || self.patience == 0 {
            return Err(ConfigError::DegenerateStoppingBounds);
        }
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::NonPositiveLearningRate(self.learning_rate));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(())
    }

    /// Additional checks for the segmented strategy.
    pub fn validate_segmented(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.max_drift <= 0.0 {
            return Err(ConfigError::NonPositiveDriftThreshold(self.max_drift));
        }
        if self.epoch_end == self.epoch_start {
            return Err(ConfigError::DegenerateSegmentRange);
        }
        if self.init_num == 0 {
            return Err(ConfigError::ZeroAnchorPool);
        }
        Ok(())
    }
}
