//! TRAJECTORY Core Engine
//!
//! This crate implements the spatiotemporal graph-construction and
//! incremental-embedding-training pipeline behind the TRAJECTORY
//! representation observatory: weighted proximity complexes over
//! high-dimensional representations, temporal correspondence edges across
//! training checkpoints, drift-driven checkpoint segmentation, importance
//! sampling of edge budgets, and a warm-started trainer that carries a
//! learned parametric embedding across a non-stationary sequence of
//! representation snapshots.
//!
//! Rendering, metric persistence, configuration parsing and the subject
//! network itself live outside this crate; the core consumes a
//! [`provider::DataProvider`] and produces trained [`projector::Projector`]
//! artifacts plus structured [`timing::TimingLedger`] records.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod complex;
pub mod config;
pub mod model;
pub mod projector;
pub mod provider;
pub mod sampler;
pub mod segment;
pub mod strategy;
pub mod timing;
pub mod train;

pub use complex::{EdgeProvenance, EdgeSet};
pub use config::VisualizationConfig;
pub use model::EmbeddingModel;
pub use projector::{ArtifactKey, Projector};
pub use provider::{ArrayProvider, Checkpoint, DataProvider};
pub use sampler::WeightedEdgeSampler;
pub use segment::{Segment, Segmenter};
pub use strategy::{
    FullHistoryStrategy, IncrementalStrategy, SegmentedStrategy, SlidingWindowStrategy,
    StrategyError, VisualizationStrategy,
};
pub use timing::{Phase, TimingLedger};
