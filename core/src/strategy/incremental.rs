//! Incremental (active-learning) strategy
//!
//! Externally driven iterations: the caller invokes `run_iteration` in
//! increasing order, supplying the previous iteration's index as the resume
//! point. Each iteration builds a single-checkpoint complex over the pool as
//! it stands, trains one round, and persists a per-iteration artifact. An
//! out-of-range resume index means "no prior state" and starts cold rather
//! than failing.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

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

pub struct IncrementalStrategy {
    provider: Arc<dyn DataProvider>,
    config: VisualizationConfig,
    model_dir: PathBuf,
    model: Option<EmbeddingModel>,
    curve: (f64, f64),
    iteration: Option<usize>,
    resume_from: Option<usize>,
    ledger: TimingLedger,
    state: StrategyState,
}

impl IncrementalStrategy {
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
            iteration: None,
            resume_from: None,
            ledger: TimingLedger::new(),
            state: StrategyState::Created,
        }
    }

    /// Top-level entry point: one full pass for `iteration`, optionally
    /// resuming from a prior iteration's persisted model. The caller drives
    /// iterations in increasing order.
    pub fn run_iteration(
        &mut self,
        iteration: usize,
        resume_from: Option<usize>,
        evaluation: &mut dyn EvaluationSink,
        visualization: &mut dyn VisualizationSink,
    ) -> Result<(), StrategyError> {
        self.iteration = Some(iteration);
        self.resume_from = resume_from;
        self.state = StrategyState::Created;
        self.init()?;
        self.preprocess()?;
        self.train()?;
        self.evaluate(evaluation)?;
        self.visualize(visualization)
    }

    fn current_iteration(&self) -> Result<usize, StrategyError> {
        self.iteration.ok_or(StrategyError::IterationUnset)
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

impl VisualizationStrategy for IncrementalStrategy {
    fn init(&mut self) -> Result<(), StrategyError> {
        self.config.validate()?;
        let iteration = self.current_iteration()?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(iteration as u64));
        let mut model = EmbeddingModel::new(
            &self.config.encoder_dims,
            &self.config.decoder_dims,
            &mut rng,
        )?;

        // a resume index pointing at no persisted round is "no prior state"
        if let Some(resume) = self.resume_from.filter(|&r| r < iteration) {
            let (dir, stem) =
                ArtifactKey::Iteration(resume).locate(&self.model_dir, &self.config.vis_model_name);
            match EmbeddingModel::load(&dir.join(format!("{stem}.json"))) {
                Ok(resumed) => {
                    info!("iteration {iteration}: resumed from iteration {resume}");
                    model = resumed;
                }
                Err(e) => warn!("iteration {iteration}: cold start, resume unavailable ({e})"),
            }
        }
        self.model = Some(model);
        self.curve = find_ab_params(self.config.spread, self.config.min_dist);
        advance(&mut self.state, &[StrategyState::Created], StrategyState::Initialized)
    }

    fn preprocess(&mut self) -> Result<(), StrategyError> {
        let iteration = self.current_iteration()?;
        let data = self.provider.train_representation(iteration)?;
        if self.config.b_n_epochs > 0.0 {
            let budget = (data.nrows() / 10).max(1);
            self.provider
                .estimate_boundary(iteration, budget, self.config.l_bound)?;
        }
        advance(&mut self.state, &[StrategyState::Initialized], StrategyState::Preprocessed)
    }

    fn train(&mut self) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Preprocessed], StrategyState::Trained)?;
        let iteration = self.current_iteration()?;

        let construction_start = Instant::now();
        let complex = SingleCheckpointConstructor::new(
            self.provider.as_ref(),
            iteration,
            self.config.n_neighbors,
            self.config.b_n_epochs,
            self.config.l_bound,
            self.config.approx_knn_cutoff,
            self.config.seed.wrapping_add(iteration as u64),
        )
        .construct()?;
        let edges = complex.edges.normalized()?;
        self.ledger.record(
            iteration.to_string(),
            Phase::Construction,
            construction_start.elapsed(),
        );

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
            self.config.seed.wrapping_add(iteration as u64),
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
            iteration.to_string(),
            Phase::Training,
            training_start.elapsed(),
        );
        info!(
            "iteration {iteration}: {} epochs, loss {:.5}",
            report.epochs_run, report.best_loss
        );

        let (dir, stem) =
            ArtifactKey::Iteration(iteration).locate(&self.model_dir, &self.config.vis_model_name);
        trainer.save(&dir, &stem)?;
        Ok(())
    }

    fn evaluate(&mut self, sink: &mut dyn EvaluationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Trained], StrategyState::Evaluated)?;
        let iteration = self.current_iteration()?;
        let projector = self.projector()?;
        sink.epoch_evaluated(iteration, &projector, &self.ledger)
            .map_err(StrategyError::Sink)
    }

    fn visualize(&mut self, sink: &mut dyn VisualizationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Evaluated], StrategyState::Visualized)?;
        let iteration = self.current_iteration()?;
        let projector = self.projector()?;
        render_checkpoint(self.provider.as_ref(), iteration, &projector, sink)
    }

    fn ledger(&self) -> &TimingLedger {
        &self.ledger
    }
}
