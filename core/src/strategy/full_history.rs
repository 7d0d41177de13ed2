//! Full-history strategy
//!
//! One round per checkpoint over the whole training timeline. Each round
//! builds a single-checkpoint spatial complex, samples it, and trains with
//! the structural and reconstruction terms plus a penalty against the frozen
//! previous round's model, weighted by the neighbor-preserving rate between
//! the two checkpoints' representation spaces: large representation shifts
//! are trusted less and pull the new round toward the old embedding more
//! weakly.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::complex::neighborhood::neighbor_preserving_rate;
use crate::complex::spatial::SingleCheckpointConstructor;
use crate::config::VisualizationConfig;
use crate::model::EmbeddingModel;
use crate::projector::{ArtifactKey, Projector};
use crate::provider::DataProvider;
use crate::strategy::{
    advance, render_checkpoint, EvaluationSink, StrategyError, StrategyState,
    VisualizationStrategy, VisualizationSink,
};
use crate::timing::{Phase, TimingLedger};
use crate::train::{
    find_ab_params, Adam, CompositeLoss, Continuity, ReconstructionLoss, RoundData,
    StepDecaySchedule, Trainer, UmapLoss,
};

pub struct FullHistoryStrategy {
    provider: Arc<dyn DataProvider>,
    config: VisualizationConfig,
    model_dir: PathBuf,
    model: Option<EmbeddingModel>,
    curve: (f64, f64),
    ledger: TimingLedger,
    state: StrategyState,
}

impl FullHistoryStrategy {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        config: VisualizationConfig,
        content_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            config,
            model_dir: content_dir.into().join("Model"),
            model: None,
            curve: (1.0, 1.0),
            ledger: TimingLedger::new(),
            state: StrategyState::Created,
        }
    }

    fn composite(&self, continuity: Continuity) -> CompositeLoss {
        CompositeLoss {
            umap: UmapLoss::new(
                self.curve.0,
                self.curve.1,
                self.config.negative_sample_rate,
                1.0,
            ),
            recon: ReconstructionLoss { beta: 1.0 },
            lambda1: self.config.lambda1,
            continuity,
        }
    }

    fn projector(&self) -> Result<Projector, StrategyError> {
        let model = self.model.as_ref().ok_or(StrategyError::InvalidTransition(
            "projection",
            self.state.name(),
        ))?;
        Ok(Projector::new(
            model.snapshot(),
            &self.model_dir,
            self.config.vis_model_name.clone(),
        ))
    }
}

impl VisualizationStrategy for FullHistoryStrategy {
    fn init(&mut self) -> Result<(), StrategyError> {
        self.config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.model = Some(EmbeddingModel::new(
            &self.config.encoder_dims,
            &self.config.decoder_dims,
            &mut rng,
        )?);
        self.curve = find_ab_params(self.config.spread, self.config.min_dist);
        advance(&mut self.state, &[StrategyState::Created], StrategyState::Initialized)
    }

    fn preprocess(&mut self) -> Result<(), StrategyError> {
        for checkpoint in self.config.checkpoints() {
            let data = self.provider.train_representation(checkpoint)?;
            if self.config.b_n_epochs > 0.0 {
                let budget = (data.nrows() / 10).max(1);
                self.provider
                    .estimate_boundary(checkpoint, budget, self.config.l_bound)?;
            }
        }
        advance(&mut self.state, &[StrategyState::Initialized], StrategyState::Preprocessed)
    }

    fn train(&mut self) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Preprocessed], StrategyState::Trained)?;
        let checkpoints = self.config.checkpoints();
        let mut previous = self
            .model
            .as_ref()
            .map(|m| m.snapshot())
            .ok_or(StrategyError::InvalidTransition("train", "created"))?;

        for (round, &checkpoint) in checkpoints.iter().enumerate() {
            // continuity weight from the neighbor-preserving rate; the first
            // round has no previous space to preserve
            let continuity = if round == 0 {
                Continuity::None
            } else {
                let prev_data = self.provider.train_representation(checkpoints[round - 1])?;
                let curr_data = self.provider.train_representation(checkpoint)?;
                let npr = neighbor_preserving_rate(
                    &prev_data,
                    &curr_data,
                    self.config.n_neighbors,
                    self.config.approx_knn_cutoff,
                    self.config.seed,
                );
                info!("checkpoint {checkpoint}: neighbor-preserving rate {npr:.3}");
                Continuity::PreviousModel {
                    model: previous.clone(),
                    weight: self.config.lambda2 * npr,
                }
            };

            let construction_start = Instant::now();
            let complex = SingleCheckpointConstructor::new(
                self.provider.as_ref(),
                checkpoint,
                self.config.n_neighbors,
                self.config.b_n_epochs,
                self.config.l_bound,
                self.config.approx_knn_cutoff,
                self.config.seed.wrapping_add(round as u64),
            )
            .construct()?;
            let edges = complex.edges.normalized()?;
            self.ledger.record(
                checkpoint.to_string(),
                Phase::Construction,
                construction_start.elapsed(),
            );

            let loss = self.composite(continuity);
            let schedule = StepDecaySchedule {
                initial_lr: self.config.learning_rate,
                step_size: self.config.schedule.step_size,
                gamma: self.config.schedule.gamma,
            };
            let model = self
                .model
                .as_mut()
                .ok_or(StrategyError::InvalidTransition("train", "created"))?;
            let mut trainer = Trainer::new(
                &mut *model,
                loss,
                Adam::new(self.config.weight_decay),
                schedule,
                self.config.batch_size,
                self.config.seed.wrapping_add(round as u64),
            );
            let round_data = RoundData {
                features: &complex.features,
                attention: &complex.attention,
                edges: &edges,
            };
            let training_start = Instant::now();
            let report = trainer.train(
                self.config.patience,
                self.config.max_epoch,
                &round_data,
                self.config.s_n_epochs,
                self.config.large_edge_cutoff,
            )?;
            self.ledger.record(
                checkpoint.to_string(),
                Phase::Training,
                training_start.elapsed(),
            );
            info!(
                "checkpoint {checkpoint}: {} epochs, loss {:.5}",
                report.epochs_run, report.best_loss
            );

            let (dir, stem) =
                ArtifactKey::Epoch(checkpoint).locate(&self.model_dir, &self.config.vis_model_name);
            trainer.save(&dir, &stem)?;
            previous = model.snapshot();
        }
        Ok(())
    }

    fn evaluate(&mut self, sink: &mut dyn EvaluationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Trained], StrategyState::Evaluated)?;
        let mut projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            projector.load(ArtifactKey::Epoch(checkpoint))?;
            sink.epoch_evaluated(checkpoint, &projector, &self.ledger)
                .map_err(StrategyError::Sink)?;
        }
        Ok(())
    }

    fn visualize(&mut self, sink: &mut dyn VisualizationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Evaluated], StrategyState::Visualized)?;
        let mut projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            projector.load(ArtifactKey::Epoch(checkpoint))?;
            render_checkpoint(self.provider.as_ref(), checkpoint, &projector, sink)?;
        }
        Ok(())
    }

    fn ledger(&self) -> &TimingLedger {
        &self.ledger
    }
}
