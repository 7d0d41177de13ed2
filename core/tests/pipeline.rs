//! End-to-end pipeline scenarios
//!
//! Drives the four strategy shapes over small in-memory checkpoint
//! sequences and checks the observable contract: segment covers, artifact
//! layout, timing records, round ordering, warm-start determinism and
//! fail-fast configuration handling.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::sync::Arc;

use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use trajectory_core::complex::spatial::SingleCheckpointConstructor;
use trajectory_core::config::VisualizationConfig;
use trajectory_core::projector::Projector;
use trajectory_core::provider::{ArrayProvider, Checkpoint, DataProvider};
use trajectory_core::sampler::WeightedEdgeSampler;
use trajectory_core::segment::{Segment, Segmenter};
use trajectory_core::strategy::{
    EvaluationSink, FullHistoryStrategy, IncrementalStrategy, NoopSink, SegmentedStrategy,
    SlidingWindowStrategy, VisualizationSink, VisualizationStrategy,
};
use trajectory_core::timing::{Phase, TimingLedger};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three checkpoints of 100 samples in 16 dimensions, two Gaussian clusters,
/// optionally drifting the second cluster per checkpoint.
fn clustered_provider(drift_per_checkpoint: &[f64]) -> ArrayProvider {
    let n = 100;
    let dim = 16;
    let mut provider = ArrayProvider::new(0, drift_per_checkpoint.len() - 1, 1);
    let mut rng = ChaCha8Rng::seed_from_u64(1234);
    let base = DMatrix::from_fn(n, dim, |i, _| {
        let center = if i < n / 2 { -1.0 } else { 1.0 };
        center + rng.gen_range(-0.2..0.2)
    });
    for (checkpoint, &drift) in drift_per_checkpoint.iter().enumerate() {
        let mut data = base.clone();
        for r in (n / 2)..n {
            for c in 0..dim {
                data[(r, c)] += drift;
            }
        }
        let labels = (0..n).map(|i| usize::from(i >= n / 2)).collect();
        provider.insert(checkpoint, data, labels);
    }
    provider
}

fn test_config(end: usize) -> VisualizationConfig {
    VisualizationConfig {
        epoch_start: 0,
        epoch_end: end,
        epoch_period: 1,
        n_neighbors: 15,
        s_n_epochs: 3.0,
        t_n_epochs: 9.0,
        max_epoch: 6,
        patience: 2,
        batch_size: 500,
        init_num: 20,
        encoder_dims: vec![16, 32, 2],
        decoder_dims: vec![2, 32, 16],
        seed: 99,
        ..VisualizationConfig::default()
    }
}

#[derive(Default)]
struct CountingSink {
    evaluated: Vec<Checkpoint>,
    rendered: Vec<Checkpoint>,
}

impl EvaluationSink for CountingSink {
    fn epoch_evaluated(
        &mut self,
        checkpoint: Checkpoint,
        _projector: &Projector,
        _ledger: &TimingLedger,
    ) -> Result<(), String> {
        self.evaluated.push(checkpoint);
        Ok(())
    }
}

impl VisualizationSink for CountingSink {
    fn render(
        &mut self,
        checkpoint: Checkpoint,
        coordinates: &DMatrix<f64>,
        labels: &[usize],
    ) -> Result<(), String> {
        assert_eq!(coordinates.ncols(), 2);
        assert_eq!(coordinates.nrows(), labels.len());
        self.rendered.push(checkpoint);
        Ok(())
    }
}

#[test]
fn stable_range_collapses_to_one_segment() {
    let provider = clustered_provider(&[0.0, 0.05, 0.1]);
    let segments = Segmenter::new(&provider, 1e6, 0, 2, 1).segment().unwrap();
    assert_eq!(segments, vec![Segment { start: 0, end: 2 }]);
}

#[test]
fn sampler_honors_the_configured_budget() {
    let provider = clustered_provider(&[0.0]);
    let complex = SingleCheckpointConstructor::new(&provider, 0, 15, 0.0, 0.4, 50_000, 99)
        .construct()
        .unwrap();
    let edges = complex.edges.normalized().unwrap();
    let sampler = WeightedEdgeSampler::new(edges.probabilities.clone(), 1 << 24).unwrap();
    let budget = sampler.budget(3.0);
    assert!(budget > 0);
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    assert_eq!(sampler.sample(budget, &mut rng).len(), budget);
}

#[test]
fn segmented_single_segment_round_persists_one_artifact() {
    init_logs();
    let provider = Arc::new(clustered_provider(&[0.0, 0.05, 0.1]));
    let content = tempfile::tempdir().unwrap();
    let mut config = test_config(2);
    config.max_drift = 1e6;
    let mut strategy = SegmentedStrategy::new(provider, config, content.path());
    strategy
        .visualize_embedding(&mut NoopSink, &mut NoopSink)
        .unwrap();

    assert_eq!(strategy.segments(), &[Segment { start: 0, end: 2 }]);
    let model_dir = content.path().join("Model");
    assert!(model_dir.join("trajectory_0.json").exists());
    assert!(!model_dir.join("trajectory_1.json").exists());
    // the round stayed within the epoch ceiling and recorded both phases
    let training: Vec<_> = strategy.ledger().phase_records(Phase::Training).collect();
    assert_eq!(training.len(), 1);
    assert_eq!(training[0].round, "segment_0");
}

#[test]
fn drift_boundary_splits_and_trains_latest_segment_first() {
    // checkpoint 1 jumps far from checkpoint 0, then stays put
    let provider = Arc::new(clustered_provider(&[0.0, 50.0, 50.2]));
    let content = tempfile::tempdir().unwrap();
    let mut config = test_config(2);
    config.max_drift = 10.0;
    let mut strategy = SegmentedStrategy::new(provider, config, content.path());
    let mut sink = CountingSink::default();
    strategy
        .visualize_embedding(&mut sink, &mut NoopSink)
        .unwrap();

    assert_eq!(
        strategy.segments(),
        &[Segment { start: 0, end: 1 }, Segment { start: 1, end: 2 }]
    );
    let model_dir = content.path().join("Model");
    assert!(model_dir.join("trajectory_0.json").exists());
    assert!(model_dir.join("trajectory_1.json").exists());
    // the earlier segment kept training from the later segment's weights
    let later = std::fs::read_to_string(model_dir.join("trajectory_1.json")).unwrap();
    let earlier = std::fs::read_to_string(model_dir.join("trajectory_0.json")).unwrap();
    assert_ne!(later, earlier);

    // later segment trained first: its records precede the earlier segment's
    let rounds: Vec<&str> = strategy
        .ledger()
        .phase_records(Phase::Training)
        .map(|r| r.round.as_str())
        .collect();
    assert_eq!(rounds, vec!["segment_1", "segment_0"]);
    assert_eq!(sink.evaluated, vec![0, 1, 2]);
}

#[test]
fn segmented_runs_are_deterministic_under_a_fixed_seed() {
    let run = || {
        let provider = Arc::new(clustered_provider(&[0.0, 50.0, 50.2]));
        let content = tempfile::tempdir().unwrap();
        let mut config = test_config(2);
        config.max_drift = 10.0;
        let mut strategy = SegmentedStrategy::new(provider, config, content.path());
        strategy
            .visualize_embedding(&mut NoopSink, &mut NoopSink)
            .unwrap();
        let model_dir = content.path().join("Model");
        (
            std::fs::read_to_string(model_dir.join("trajectory_0.json")).unwrap(),
            std::fs::read_to_string(model_dir.join("trajectory_1.json")).unwrap(),
        )
    };
    let first = run();
    let second = run();
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
}

#[test]
fn full_history_persists_one_artifact_per_checkpoint() {
    init_logs();
    let provider = Arc::new(clustered_provider(&[0.0, 0.3, 0.6]));
    let content = tempfile::tempdir().unwrap();
    let mut strategy = FullHistoryStrategy::new(provider, test_config(2), content.path());
    let mut sink = CountingSink::default();
    let mut render_sink = CountingSink::default();
    strategy
        .visualize_embedding(&mut sink, &mut render_sink)
        .unwrap();

    let model_dir = content.path().join("Model");
    for checkpoint in 0..=2 {
        assert!(model_dir
            .join(format!("Epoch_{checkpoint}"))
            .join("trajectory.json")
            .exists());
    }
    assert_eq!(sink.evaluated, vec![0, 1, 2]);
    assert_eq!(render_sink.rendered, vec![0, 1, 2]);
    // each round recorded construction and training
    assert_eq!(
        strategy.ledger().phase_records(Phase::Construction).count(),
        3
    );
    assert_eq!(strategy.ledger().phase_records(Phase::Training).count(), 3);
}

#[test]
fn sliding_window_trains_once_and_renders_every_checkpoint() {
    let provider = Arc::new(clustered_provider(&[0.0, 0.3, 0.6]));
    let content = tempfile::tempdir().unwrap();
    let mut strategy = SlidingWindowStrategy::new(provider, test_config(2), content.path());
    let mut render_sink = CountingSink::default();
    strategy
        .visualize_embedding(&mut NoopSink, &mut render_sink)
        .unwrap();

    assert!(content.path().join("Model").join("trajectory.json").exists());
    assert_eq!(render_sink.rendered, vec![0, 1, 2]);
    assert_eq!(strategy.ledger().phase_records(Phase::Training).count(), 1);
}

#[test]
fn incremental_iterations_resume_and_cold_start() {
    let provider = Arc::new(clustered_provider(&[0.0, 0.3, 0.6]));
    let content = tempfile::tempdir().unwrap();
    let mut strategy = IncrementalStrategy::new(provider, test_config(2), content.path());

    // out-of-range resume index is "no prior state", not an error
    strategy
        .run_iteration(0, Some(7), &mut NoopSink, &mut NoopSink)
        .unwrap();
    strategy
        .run_iteration(1, Some(0), &mut NoopSink, &mut NoopSink)
        .unwrap();
    strategy
        .run_iteration(2, Some(1), &mut NoopSink, &mut NoopSink)
        .unwrap();

    let model_dir = content.path().join("Model");
    for iteration in 0..=2 {
        assert!(model_dir
            .join(format!("Iteration_{iteration}"))
            .join("trajectory.json")
            .exists());
    }
}

#[test]
fn invalid_configuration_fails_before_any_round() {
    let provider = Arc::new(clustered_provider(&[0.0, 0.3]));
    let content = tempfile::tempdir().unwrap();
    let mut config = test_config(1);
    config.encoder_dims = vec![16];
    let mut strategy = FullHistoryStrategy::new(provider, config, content.path());
    assert!(strategy
        .visualize_embedding(&mut NoopSink, &mut NoopSink)
        .is_err());
    assert!(!content.path().join("Model").exists());
}

#[test]
fn projection_surface_round_trips_through_artifacts() {
    let provider = Arc::new(clustered_provider(&[0.0, 0.3, 0.6]));
    let content = tempfile::tempdir().unwrap();
    let mut strategy = SlidingWindowStrategy::new(provider.clone(), test_config(2), content.path());
    strategy
        .visualize_embedding(&mut NoopSink, &mut NoopSink)
        .unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let placeholder = trajectory_core::model::EmbeddingModel::new(
        &[16, 32, 2],
        &[2, 32, 16],
        &mut rng,
    )
    .unwrap();
    let mut projector = Projector::new(placeholder, content.path().join("Model"), "trajectory");
    projector
        .load(trajectory_core::projector::ArtifactKey::Whole)
        .unwrap();
    let data = provider.train_representation(1).unwrap();
    let coords = projector.project(&data).unwrap();
    assert_eq!((coords.nrows(), coords.ncols()), (100, 2));
    let reconstructed = projector.reconstruct(&coords).unwrap();
    assert_eq!((reconstructed.nrows(), reconstructed.ncols()), (100, 16));
}
