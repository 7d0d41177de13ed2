//! Projection surface for evaluation and visualization collaborators
//!
//! Wraps a trained embedding model together with the artifact layout the
//! strategies persist into, so downstream consumers can project any
//! checkpoint after training: per-checkpoint artifacts for the full-history
//! shape, per-segment artifacts resolved through the covering segment for
//! the segmented shape, and per-iteration artifacts for the incremental
//! shape.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::{Path, PathBuf};

use log::debug;
use nalgebra::DMatrix;
use thiserror::Error;

use crate::model::{EmbeddingModel, ModelError};
use crate::provider::Checkpoint;
use crate::segment::Segment;

/// Projection errors
#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error("Model failure: {0}")]
    Model(#[from] ModelError),

    #[error("No segment covers checkpoint {0}")]
    UncoveredCheckpoint(Checkpoint),
}

/// Address of one persisted model artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKey {
    /// `Epoch_{i}/{name}.json` (full-history rounds)
    Epoch(Checkpoint),
    /// `Iteration_{i}/{name}.json` (incremental rounds)
    Iteration(usize),
    /// `{name}_{i}.json` at the model root (segmented rounds)
    Segment(usize),
    /// `{name}.json` at the model root (single-round strategies)
    Whole,
}

impl ArtifactKey {
    /// Directory and file stem under the model root.
    pub fn locate(&self, model_dir: &Path, name: &str) -> (PathBuf, String) {
        match self {
            ArtifactKey::Epoch(i) => (model_dir.join(format!("Epoch_{i}")), name.to_string()),
            ArtifactKey::Iteration(i) => {
                (model_dir.join(format!("Iteration_{i}")), name.to_string())
            }
            ArtifactKey::Segment(i) => (model_dir.to_path_buf(), format!("{name}_{i}")),
            ArtifactKey::Whole => (model_dir.to_path_buf(), name.to_string()),
        }
    }
}

/// Trained embedding surface addressed by round artifacts.
pub struct Projector {
    model: EmbeddingModel,
    model_dir: PathBuf,
    model_name: String,
    /// Segment list for checkpoint resolution, set by the segmented strategy
    segments: Vec<Segment>,
}

impl Projector {
    pub fn new(model: EmbeddingModel, model_dir: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_dir: model_dir.into(),
            model_name: model_name.into(),
            segments: Vec::new(),
        }
    }

    pub fn set_segments(&mut self, segments: Vec<Segment>) {
        self.segments = segments;
    }

    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    /// Project representation rows to low-dimensional coordinates.
    pub fn project(&self, data: &DMatrix<f64>) -> Result<DMatrix<f64>, ProjectorError> {
        Ok(self.model.encode(data)?)
    }

    /// Invert coordinates back into representation space.
    pub fn reconstruct(&self, coordinates: &DMatrix<f64>) -> Result<DMatrix<f64>, ProjectorError> {
        Ok(self.model.decode(coordinates)?)
    }

    /// Swap in the parameters persisted under the given artifact key.
    pub fn load(&mut self, key: ArtifactKey) -> Result<(), ProjectorError> {
        let (dir, stem) = key.locate(&self.model_dir, &self.model_name);
        let path = dir.join(format!("{stem}.json"));
        debug!("loading projector artifact {:?}", path);
        self.model = EmbeddingModel::load(&path)?;
        Ok(())
    }

    /// Load the artifact of the segment covering `checkpoint`.
    pub fn load_for_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<(), ProjectorError> {
        let index = self
            .segments
            .iter()
            .position(|s| s.contains(checkpoint))
            .ok_or(ProjectorError::UncoveredCheckpoint(checkpoint))?;
        self.load(ArtifactKey::Segment(index))
    }
}
