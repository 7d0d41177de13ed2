//! Round-scoped embedding trainer
//!
//! Consumes an edge-sampled batch stream and runs epoch-wise Adam updates of
//! the embedding model against a composite loss until the patience window
//! elapses without improvement or the hard epoch ceiling is reached.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::{Path, PathBuf};

use log::{debug, info};
use nalgebra::DMatrix;
use rand_chacha::ChaCha8Rng;
use rand::SeedableRng;
use thiserror::Error;

use crate::complex::EdgeSet;
use crate::model::{EmbeddingModel, ModelError, ModelGradients};
use crate::sampler::{SamplerError, WeightedEdgeSampler};
use crate::train::losses::{CompositeLoss, Continuity};
use crate::train::optimizer::{Adam, StepDecaySchedule};

/// Minimum improvement counting as progress for early stopping.
const IMPROVEMENT_TOLERANCE: f64 = 1e-4;

/// Trainer errors
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("Edge sampling failed: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Model failure: {0}")]
    Model(#[from] ModelError),

    #[error("Sampling budget of zero edges; the round cannot train")]
    EmptyBudget,
}

/// One round's immutable training inputs.
pub struct RoundData<'a> {
    /// Feature rows (samples x input_dim) the edge endpoints index into
    pub features: &'a DMatrix<f64>,
    /// Per-dimension attention, row-aligned with `features`
    pub attention: &'a DMatrix<f64>,
    /// Normalized edge set
    pub edges: &'a EdgeSet,
}

/// Outcome of one training round.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epochs_run: usize,
    pub best_loss: f64,
    pub stopped_early: bool,
}

/// Epoch-wise trainer for one round.
pub struct Trainer<'a> {
    model: &'a mut EmbeddingModel,
    loss: CompositeLoss,
    optimizer: Adam,
    schedule: StepDecaySchedule,
    batch_size: usize,
    rng: ChaCha8Rng,
}

impl<'a> Trainer<'a> {
    pub fn new(
        model: &'a mut EmbeddingModel,
        loss: CompositeLoss,
        optimizer: Adam,
        schedule: StepDecaySchedule,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        Self {
            model,
            loss,
            optimizer,
            schedule,
            batch_size: batch_size.max(1),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Run up to `max_epochs` epochs with `patience`-based early stopping.
    ///
    /// Every epoch re-draws `budget_multiplier * Σp` edges from the round's
    /// probability-weighted edge set and walks them in mini-batches.
    pub fn train(
        &mut self,
        patience: usize,
        max_epochs: usize,
        round: &RoundData,
        budget_multiplier: f64,
        large_edge_cutoff: usize,
    ) -> Result<TrainReport, TrainerError> {
        let sampler =
            WeightedEdgeSampler::new(round.edges.probabilities.clone(), large_edge_cutoff)?;
        let budget = sampler.budget(budget_multiplier);
        if budget == 0 {
            return Err(TrainerError::EmptyBudget);
        }

        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0usize;
        let mut epochs_run = 0usize;
        let mut stopped_early = false;

        for epoch in 0..max_epochs {
            let lr = self.schedule.learning_rate(epoch);
            let draws = sampler.sample(budget, &mut self.rng);
            let mut epoch_loss = 0.0;
            let mut batches = 0usize;

            for batch in draws.chunks(self.batch_size) {
                epoch_loss += self.train_batch(round, batch, lr)?;
                batches += 1;
            }
            epoch_loss /= batches.max(1) as f64;
            epochs_run = epoch + 1;
            debug!("epoch {epoch}: loss {epoch_loss:.6}, lr {lr:.6}");

            if best_loss - epoch_loss > IMPROVEMENT_TOLERANCE {
                best_loss = epoch_loss;
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
                if stale_epochs >= patience {
                    info!("early stop at epoch {epoch}: no improvement in {patience} epochs");
                    stopped_early = true;
                    break;
                }
            }
        }
        Ok(TrainReport { epochs_run, best_loss, stopped_early })
    }

    fn train_batch(
        &mut self,
        round: &RoundData,
        batch: &[usize],
        lr: f64,
    ) -> Result<f64, TrainerError> {
        let from_rows: Vec<usize> = batch.iter().map(|&e| round.edges.from[e] as usize).collect();
        let to_rows: Vec<usize> = batch.iter().map(|&e| round.edges.to[e] as usize).collect();

        let x_from = gather_columns(round.features, &from_rows);
        let x_to = gather_columns(round.features, &to_rows);
        let att_from = gather_columns(round.attention, &from_rows);

        let from_cache = self.model.encoder.forward(&x_from)?;
        let to_cache = self.model.encoder.forward(&x_to)?;

        // structural term on the embedded endpoints
        let (umap_loss, mut grad_z_from, grad_z_to) =
            self.loss
                .umap
                .evaluate(&from_cache.output, &to_cache.output, &mut self.rng);

        // reconstruction term through the decoder
        let decoder_cache = self.model.decoder.forward(&from_cache.output)?;
        let (recon_loss, grad_x_hat) =
            self.loss.recon.evaluate(&x_from, &decoder_cache.output, &att_from);
        let (mut decoder_grads, grad_z_recon) = self
            .model
            .decoder
            .backward(&decoder_cache, &(grad_x_hat * self.loss.lambda1));
        grad_z_from += grad_z_recon;

        // continuity term
        let continuity_loss = match &self.loss.continuity {
            Continuity::None => 0.0,
            Continuity::PreviousModel { model, weight } => {
                let z_prev = model.encoder.infer(&x_from)?;
                let scale = 1.0 / batch.len().max(1) as f64;
                let mut value = 0.0;
                for c in 0..from_cache.output.ncols() {
                    let diff = from_cache.output.column(c) - z_prev.column(c);
                    value += weight * scale * diff.norm_squared();
                    for r in 0..diff.nrows() {
                        grad_z_from[(r, c)] += weight * scale * 2.0 * diff[r];
                    }
                }
                value
            }
            Continuity::AnchorSmoothness { loss, weight, embeddings, index_of } => {
                let anchored: Vec<(usize, usize)> = from_rows
                    .iter()
                    .enumerate()
                    .filter_map(|(c, row)| index_of.get(row).map(|&a| (c, a)))
                    .collect();
                if anchored.is_empty() {
                    0.0
                } else {
                    let latent = from_cache.output.nrows();
                    let z = DMatrix::from_fn(latent, anchored.len(), |r, i| {
                        from_cache.output[(r, anchored[i].0)]
                    });
                    let z_anchor = DMatrix::from_fn(latent, anchored.len(), |r, i| {
                        embeddings[(anchored[i].1, r)]
                    });
                    let (value, grad) = loss.evaluate(&z, &z_anchor);
                    for (i, &(c, _)) in anchored.iter().enumerate() {
                        for r in 0..latent {
                            grad_z_from[(r, c)] += weight * grad[(r, i)];
                        }
                    }
                    weight * value
                }
            }
        };

        // chain embedding-space gradients through the encoder
        let (encoder_grads_from, _) = self.model.encoder.backward(&from_cache, &grad_z_from);
        let (encoder_grads_to, _) = self.model.encoder.backward(&to_cache, &grad_z_to);

        let mut gradients = ModelGradients::zeros(self.model);
        gradients.accumulate_encoder(&encoder_grads_from);
        gradients.accumulate_encoder(&encoder_grads_to);
        decoder_grads.drain(..).zip(gradients.decoder.iter_mut()).for_each(|(s, t)| {
            t.weight += s.weight;
            t.bias += s.bias;
        });

        self.optimizer.step(self.model, &gradients, lr);
        Ok(umap_loss + self.loss.lambda1 * recon_loss + continuity_loss)
    }

    /// Persist the trained parameters under `dir/{name}.json`.
    pub fn save(&self, dir: &Path, name: &str) -> Result<PathBuf, TrainerError> {
        Ok(self.model.save(dir, name)?)
    }
}

/// Gather feature rows into a column-major batch (`dim x batch`).
pub fn gather_columns(features: &DMatrix<f64>, rows: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(features.ncols(), rows.len(), |r, c| features[(rows[c], r)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::EdgeProvenance;
    use crate::train::losses::{find_ab_params, ReconstructionLoss, UmapLoss};
    use rand::Rng;

    fn toy_round() -> (DMatrix<f64>, DMatrix<f64>, EdgeSet) {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let features = DMatrix::from_fn(20, 4, |i, _| {
            if i < 10 { rng.gen_range(-0.1..0.1) } else { rng.gen_range(0.9..1.1) }
        });
        let attention = DMatrix::from_element(20, 4, 1.0);
        let mut edges = EdgeSet::default();
        for i in 0..10u32 {
            edges.push(i, (i + 1) % 10, 1.0, EdgeProvenance::Spatial);
            edges.push(i + 10, (i + 1) % 10 + 10, 1.0, EdgeProvenance::Spatial);
        }
        (features, attention, edges)
    }

    fn composite() -> CompositeLoss {
        let (a, b) = find_ab_params(1.0, 0.1);
        CompositeLoss {
            umap: UmapLoss::new(a, b, 5, 1.0),
            recon: ReconstructionLoss { beta: 1.0 },
            lambda1: 1.0,
            continuity: Continuity::None,
        }
    }

    #[test]
    fn training_terminates_within_the_epoch_ceiling() {
        let (features, attention, edges) = toy_round();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut model = EmbeddingModel::new(&[4, 16, 2], &[2, 16, 4], &mut rng).unwrap();
        let schedule = StepDecaySchedule { initial_lr: 0.01, step_size: 4, gamma: 0.1 };
        let mut trainer = Trainer::new(&mut model, composite(), Adam::new(1e-5), schedule, 8, 0);
        let round = RoundData { features: &features, attention: &attention, edges: &edges };
        let report = trainer.train(3, 10, &round, 5.0, 1 << 24).unwrap();
        assert!(report.epochs_run <= 10);
        assert!(report.best_loss.is_finite());
    }

    #[test]
    fn training_reduces_the_tracked_loss() {
        let (features, attention, edges) = toy_round();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut model = EmbeddingModel::new(&[4, 16, 2], &[2, 16, 4], &mut rng).unwrap();
        let schedule = StepDecaySchedule { initial_lr: 0.01, step_size: 8, gamma: 0.5 };
        let round = RoundData { features: &features, attention: &attention, edges: &edges };

        let mut first_epoch = Trainer::new(&mut model, composite(), Adam::new(1e-5), schedule, 8, 0);
        let short = first_epoch.train(20, 1, &round, 5.0, 1 << 24).unwrap();

        let mut rng2 = ChaCha8Rng::seed_from_u64(2);
        let mut fresh = EmbeddingModel::new(&[4, 16, 2], &[2, 16, 4], &mut rng2).unwrap();
        let mut long_run = Trainer::new(&mut fresh, composite(), Adam::new(1e-5), schedule, 8, 0);
        let long = long_run.train(20, 15, &round, 5.0, 1 << 24).unwrap();
        assert!(long.best_loss <= short.best_loss + 1e-9);
    }

    #[test]
    fn empty_budget_is_an_error() {
        let (features, attention, mut edges) = toy_round();
        for p in edges.probabilities.iter_mut() {
            *p = 1e-9;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut model = EmbeddingModel::new(&[4, 8, 2], &[2, 8, 4], &mut rng).unwrap();
        let schedule = StepDecaySchedule { initial_lr: 0.01, step_size: 4, gamma: 0.1 };
        let mut trainer = Trainer::new(&mut model, composite(), Adam::new(0.0), schedule, 8, 0);
        let round = RoundData { features: &features, attention: &attention, edges: &edges };
        assert!(matches!(
            trainer.train(3, 5, &round, 5.0, 1 << 24),
            Err(TrainerError::EmptyBudget)
        ));
    }

    #[test]
    fn deterministic_given_seed() {
        let (features, attention, edges) = toy_round();
        let round = RoundData { features: &features, attention: &attention, edges: &edges };
        let schedule = StepDecaySchedule { initial_lr: 0.01, step_size: 4, gamma: 0.1 };

        let mut model_a = {
            let mut rng = ChaCha8Rng::seed_from_u64(4);
            EmbeddingModel::new(&[4, 8, 2], &[2, 8, 4], &mut rng).unwrap()
        };
        let mut model_b = model_a.clone();
        Trainer::new(&mut model_a, composite(), Adam::new(1e-5), schedule, 8, 7)
            .train(3, 5, &round, 5.0, 1 << 24)
            .unwrap();
        Trainer::new(&mut model_b, composite(), Adam::new(1e-5), schedule, 8, 7)
            .train(3, 5, &round, 5.0, 1 << 24)
            .unwrap();
        let diff = (&model_a.encoder.layers[0].weight - &model_b.encoder.layers[0].weight).norm();
        assert_eq!(diff, 0.0);
    }
}
