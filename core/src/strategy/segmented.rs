//! Segmented hybrid strategy
//!
//! Splits the checkpoint range into drift-bounded segments and trains one
//! round per segment in reverse chronological order: the most recent, most
//! stable segment first, every earlier segment warm-started from the anchor
//! embeddings its successor produced at the shared boundary checkpoint. The
//! anchor pool is a fixed sample selection; its embeddings and the fitted
//! frame correction are replaced wholesale at each round boundary.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use nalgebra::DMatrix;
use rand::seq::index::sample as index_sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::complex::spatial::MultiCheckpointConstructor;
use crate::complex::temporal::TemporalEdgeConstructor;
use crate::config::VisualizationConfig;
use crate::model::EmbeddingModel;
use crate::projector::{ArtifactKey, Projector};
use crate::provider::DataProvider;
use crate::segment::{Segment, Segmenter};
use crate::strategy::{
    advance, combine_and_normalize, render_checkpoint, EvaluationSink, StrategyError,
    StrategyState, VisualizationStrategy, VisualizationSink,
};
use crate::timing::{Phase, TimingLedger};
use crate::train::{
    find_ab_params, Adam, CompositeLoss, Continuity, ReconstructionLoss, RoundData,
    SmoothnessLoss, StepDecaySchedule, Trainer, UmapLoss,
};

pub struct SegmentedStrategy {
    provider: Arc<dyn DataProvider>,
    config: VisualizationConfig,
    model_dir: PathBuf,
    model: Option<EmbeddingModel>,
    curve: (f64, f64),
    segments: Vec<Segment>,
    ledger: TimingLedger,
    state: StrategyState,
}

impl SegmentedStrategy {
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
            segments: Vec::new(),
            ledger: TimingLedger::new(),
            state: StrategyState::Created,
        }
    }

    /// Segments computed by the segmentation phase.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Partition the checkpoint range by accumulated drift. Runs between
    /// preprocessing and training.
    pub fn segment(&mut self) -> Result<(), StrategyError> {
        let segmentation_start = Instant::now();
        self.segments = Segmenter::new(
            self.provider.as_ref(),
            self.config.max_drift,
            self.config.epoch_start,
            self.config.epoch_end,
            self.config.epoch_period,
        )
        .segment()?;
        self.ledger.record(
            "range",
            Phase::Segmentation,
            segmentation_start.elapsed(),
        );
        info!("{} segment(s) to train", self.segments.len());
        advance(&mut self.state, &[StrategyState::Preprocessed], StrategyState::Segmented)
    }

    fn projector(&self) -> Result<Projector, StrategyError> {
        let model = self.model.as_ref().ok_or(StrategyError::InvalidTransition(
            "projection",
            self.state.name(),
        ))?;
        let mut projector = Projector::new(
            model.snapshot(),
            &self.model_dir,
            self.config.vis_model_name.clone(),
        );
        projector.set_segments(self.segments.clone());
        Ok(projector)
    }
}

impl VisualizationStrategy for SegmentedStrategy {
    fn init(&mut self) -> Result<(), StrategyError> {
        self.config.validate_segmented()?;
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
        advance(&mut self.state, &[StrategyState::Segmented], StrategyState::Trained)?;

        // fixed anchor pool over the shared sample universe
        let sample_count = self
            .provider
            .train_representation(self.config.epoch_start)?
            .nrows();
        let pool = self.config.init_num.min(sample_count);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut anchor_indices: Vec<usize> =
            index_sample(&mut rng, sample_count, pool).into_iter().collect();
        anchor_indices.sort_unstable();
        let mut anchor_embeddings: Option<DMatrix<f64>> = None;

        for (seg_index, segment) in self.segments.clone().iter().enumerate().rev() {
            self.provider.update_window(segment.start, segment.end);

            let construction_start = Instant::now();
            let mut constructor = MultiCheckpointConstructor::new(
                self.provider.as_ref(),
                self.config.n_neighbors,
                self.config.b_n_epochs,
                self.config.l_bound,
                self.config.approx_knn_cutoff,
                self.config.seed.wrapping_add(seg_index as u64),
            );
            if let Some(embeddings) = anchor_embeddings.as_ref() {
                constructor = constructor.with_anchors(&anchor_indices, embeddings);
            }
            let complex = constructor.construct()?;
            if complex.anchors.is_some() {
                let (c0, d0) = complex.coefficients;
                info!("segment {seg_index}: frame correction c0={c0:.4}, d0={d0:.4}");
            }
            let temporal = TemporalEdgeConstructor::new(
                &complex.features,
                &complex.time_step_nums,
                &complex.stats,
                self.config.t_n_epochs,
                self.config.s_n_epochs,
            )
            .construct();
            let edges = combine_and_normalize(complex.edges, Some(temporal))?;
            let round_name = format!("segment_{seg_index}");
            self.ledger.record(
                round_name.clone(),
                Phase::Construction,
                construction_start.elapsed(),
            );

            // earlier segments anchor against the embeddings their successor
            // produced at the shared boundary checkpoint
            let continuity = match complex.anchors.as_ref() {
                Some(anchors) => {
                    let index_of: HashMap<usize, usize> = anchors
                        .indices
                        .iter()
                        .enumerate()
                        .map(|(a, &row)| (row, a))
                        .collect();
                    Continuity::AnchorSmoothness {
                        loss: SmoothnessLoss { margin: self.config.smooth_margin },
                        weight: self.config.lambda2,
                        embeddings: anchors.corrected_embeddings(),
                        index_of,
                    }
                }
                None => Continuity::None,
            };

            let loss = CompositeLoss {
                umap: UmapLoss::new(
                    self.curve.0,
                    self.curve.1,
                    self.config.negative_sample_rate,
                    1.0,
                ),
                recon: ReconstructionLoss { beta: 1.0 },
                lambda1: self.config.lambda1,
                continuity,
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
                self.config.seed.wrapping_add(seg_index as u64),
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
                .record(round_name, Phase::Training, training_start.elapsed());
            info!(
                "segment {seg_index} [{}, {}]: {} epochs, loss {:.5}",
                segment.start, segment.end, report.epochs_run, report.best_loss
            );

            let (dir, stem) =
                ArtifactKey::Segment(seg_index).locate(&self.model_dir, &self.config.vis_model_name);
            trainer.save(&dir, &stem)?;

            // replace the anchor embeddings wholesale: this segment's first
            // block is the boundary checkpoint the next (earlier) round shares
            let first_block = complex.time_step_nums[0];
            let usable: Vec<usize> = anchor_indices
                .iter()
                .copied()
                .filter(|&i| i < first_block.train)
                .collect();
            let anchor_rows = DMatrix::from_fn(usable.len(), complex.features.ncols(), |r, c| {
                complex.features[(usable[r], c)]
            });
            anchor_indices = usable;
            anchor_embeddings = Some(model.encode(&anchor_rows)?);
        }

        self.provider
            .update_window(self.config.epoch_start, self.config.epoch_end);
        Ok(())
    }

    fn evaluate(&mut self, sink: &mut dyn EvaluationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Visualized], StrategyState::Evaluated)?;
        let mut projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            projector.load_for_checkpoint(checkpoint)?;
            sink.epoch_evaluated(checkpoint, &projector, &self.ledger)
                .map_err(StrategyError::Sink)?;
        }
        Ok(())
    }

    fn visualize(&mut self, sink: &mut dyn VisualizationSink) -> Result<(), StrategyError> {
        advance(&mut self.state, &[StrategyState::Trained], StrategyState::Visualized)?;
        let mut projector = self.projector()?;
        for checkpoint in self.config.checkpoints() {
            projector.load_for_checkpoint(checkpoint)?;
            render_checkpoint(self.provider.as_ref(), checkpoint, &projector, sink)?;
        }
        Ok(())
    }

    fn ledger(&self) -> &TimingLedger {
        &self.ledger
    }

    /// Segmentation slots between preprocessing and training; visualization
    /// precedes evaluation in this shape.
    fn visualize_embedding(
        &mut self,
        evaluation: &mut dyn EvaluationSink,
        visualization: &mut dyn VisualizationSink,
    ) -> Result<(), StrategyError> {
        self.init()?;
        self.preprocess()?;
        self.segment()?;
        self.train()?;
        self.visualize(visualization)?;
        self.evaluate(evaluation)
    }
}
