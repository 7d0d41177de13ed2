//! Sliding-window strategy
//!
//! One combined spatial+temporal construction over the whole checkpoint
//! window, one training round, one shared model for every checkpoint.
//! Temporal continuity is carried entirely by the temporal edges folded into
//! the structural loss; no explicit previous-model penalty exists in this
//! shape.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::complex::spatial::MultiCheckpointConstructor;
use crate::complex::temporal::TemporalEdgeConstructor;
use crate::config::VisualizationConfig;
use crate::model::EmbeddingModel;
use crate::projector::{ArtifactKey, Projector};
use crate::provider::DataProvider;
use crate::strategy::{
    advance, combine_and_normalize, render_checkpoint, EvaluationSink, StrategyError,
    StrategyState, VisualizationStrategy, VisualizationSink,
};
use crate::timing::{Phase, TimingLedger};
use crate::train::{
    find_ab_params, Adam, CompositeLoss, Continuity, ReconstructionLoss, RoundData,
    StepDecaySchedule, Trainer, UmapLoss,
};

pub struct SlidingWindowStrategy {
    provider: Arc<dyn DataProvider>,
    config: VisualizationConfig,
    model_dir: PathBuf,
    model: Option<EmbeddingModel>,
    curve: (f64, f64),
    ledger: TimingLedger,
    state: StrategyState,
}

impl SlidingWindowStrategy {
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

impl VisualizationStrategy for SlidingWindowStrategy {
    fn init(&mut self) -> Result<(), StrategyError> {
        self.config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.model = Some(EmbeddingModel::new(
            &self.config.encoder_dims,
            &self.config.decoder_dims,
            &mut rng,
        )?);
        self.curve = find_ab_params(self.config.spread, self.config.min_dist);
        self.provider
            .update_window(self.config.epoch_start, self.config.epoch_end);
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

        let construction_start = Instant::now();
        let complex = MultiCheckpointConstructor::new(
            self.provider.as_ref(),
            self.config.n_neighbors,
            self.config.b_n_epochs,
            self.config.l_bound,
            self.config.approx_knn_cutoff,
            self.config.seed,
        )
        .construct()?;
        let temporal = TemporalEdgeConstructor::new(
            &complex.features,
            &complex.time_step_nums,
            &complex.stats,
            self.config.t_n_epochs,
            self.config.s_n_epochs,
        )
        .construct();
        let edges = combine_and_normalize(complex.edges, Some(temporal))?;
        self.ledger
            .record("window", Phase::Construction, construction_start.elapsed());

        let loss = CompositeLoss {
            umap: UmapLoss::new(
                self.curve.0,
                self.curve.1,
                self.config.negative_sample_rate,
                1.0,
            ),
            recon: ReconstructionLoss { beta: 1.0 },
            lambda1: self.config.lambda1,
            continuity: Continuity::None,
        };
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
            self.config.seed,
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
        self.ledger
            .record("window", Phase::Training, training_start.elapsed());
        info!(
            "window round: {} epochs, loss {:.5}",
            report.epochs_run, report.best_loss
        );

        let (dir, stem) =
            ArtifactKey::Whole.locate(&self.model_dir, &self.config.vis_model_name);
        trainer.save(&dir, &stem)?;
        Ok(())
    }

    fn evaluate(&mut self, sink: &mut dyn EvaluationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Visualized], StrategyState::Evaluated)?;
        let projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            sink.epoch_evaluated(checkpoint, &projector, &self.ledger)
                .map_err(StrategyError::Sink)?;
        }
        Ok(())
    }

    fn visualize(&mut self, sink: &mut dyn VisualizationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Trained], StrategyState::Visualized)?;
        let projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            render_checkpoint(self.provider.as_ref(), checkpoint, &projector, sink)?;
        }
        Ok(())
    }

    fn ledger(&self) -> &TimingLedger {
        &self.ledger
    }

    /// This shape visualizes before it evaluates.
    fn visualize_embedding(
        &mut self,
        evaluation: &mut dyn EvaluationSink,
        visualization: &mut dyn VisualizationSink,
    ) -> Result<(), StrategyError> {
        self.init()?;
        self.preprocess()?;
        self.train()?;
        self.visualize(visualization)?;
        self.evaluate(evaluation)
    }
}
