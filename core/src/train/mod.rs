//! Embedding optimization
//!
//! Mini-batch gradient training of the embedding model against a composite
//! structural / reconstruction / continuity loss, with a step-decay learning
//! rate, patience-based early stopping and round-scoped artifact
//! persistence.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod losses;
pub mod optimizer;
pub mod trainer;

pub use losses::{
    find_ab_params, Continuity, CompositeLoss, ReconstructionLoss, SmoothnessLoss, UmapLoss,
};
pub use optimizer::{Adam, StepDecaySchedule};
pub use trainer::{RoundData, TrainReport, Trainer, TrainerError};
