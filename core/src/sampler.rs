//! Importance sampling of edge budgets
//!
//! Draws a fixed training budget of edges per round from the normalized
//! probability-weighted edge set, with replacement. Two interchangeable
//! strategies back the draw: a direct cumulative-sum search for ordinary
//! edge counts, and a partitioned two-stage draw that bounds the resident
//! cumulative mass when the edge count reaches the tens of millions. Both
//! produce the same marginal distribution; the cutoff is a performance
//! knob, never a behavioral one.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::debug;
use rand::Rng;
use thiserror::Error;

/// Edges per partition of the large-scale strategy.
const PARTITION_SIZE: usize = 1 << 20;

/// Sampling errors
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Cannot sample from an empty edge set")]
    EmptyEdgeSet,

    #[error("Edge weights sum to a non-positive total")]
    VanishingWeightMass,
}

/// Strategy actually used for a draw; exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    Direct,
    Partitioned,
}

/// With-replacement weighted sampler over edge indices.
pub struct WeightedEdgeSampler {
    weights: Vec<f64>,
    strategy: SamplingStrategy,
}

impl WeightedEdgeSampler {
    /// Build a sampler over the given weights, switching to the partitioned
    /// strategy above `large_edge_cutoff` entries.
    pub fn new(weights: Vec<f64>, large_edge_cutoff: usize) -> Result<Self, SamplerError> {
        if weights.is_empty() {
            return Err(SamplerError::EmptyEdgeSet);
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(SamplerError::VanishingWeightMass);
        }
        let strategy = if weights.len() > large_edge_cutoff {
            SamplingStrategy::Partitioned
        } else {
            SamplingStrategy::Direct
        };
        Ok(Self { weights, strategy })
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    /// Training budget implied by the edge probabilities: `floor(Σ m·p)` for
    /// budget multiplier `m`.
    pub fn budget(&self, multiplier: f64) -> usize {
        (self.weights.iter().sum::<f64>() * multiplier).floor() as usize
    }

    /// Draw `n` edge indices with replacement, weighted by probability.
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        match self.strategy {
            SamplingStrategy::Direct => self.sample_direct(n, rng),
            SamplingStrategy::Partitioned => self.sample_partitioned(n, rng),
        }
    }

    fn sample_direct<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        let cumulative = cumulative_sums(&self.weights);
        let total = *cumulative.last().unwrap_or(&0.0);
        (0..n)
            .map(|_| search(&cumulative, rng.gen_range(0.0..total)))
            .collect()
    }

    /// Two-stage draw: pick a partition by its total mass, then resolve the
    /// edge inside that partition. Per-partition cumulative sums are built
    /// transiently, one partition at a time.
    fn sample_partitioned<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        self.sample_partitioned_with(n, rng, PARTITION_SIZE)
    }

    fn sample_partitioned_with<R: Rng>(
        &self,
        n: usize,
        rng: &mut R,
        partition_size: usize,
    ) -> Vec<usize> {
        let partitions: Vec<&[f64]> = self.weights.chunks(partition_size).collect();
        let totals: Vec<f64> = partitions.iter().map(|p| p.iter().sum()).collect();
        let total_cumulative = cumulative_sums(&totals);
        let total = *total_cumulative.last().unwrap_or(&0.0);

        // allocate the budget across partitions first so each partition's
        // cumulative table is built at most once
        let mut counts = vec![0usize; partitions.len()];
        for _ in 0..n {
            counts[search(&total_cumulative, rng.gen_range(0.0..total))] += 1;
        }
        debug!(
            "partitioned draw: {} edges over {} partitions",
            n,
            partitions.len()
        );

        let mut draws = Vec::with_capacity(n);
        for (p, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let local_cumulative = cumulative_sums(partitions[p]);
            let local_total = *local_cumulative.last().unwrap_or(&0.0);
            let base = p * partition_size;
            for _ in 0..count {
                draws.push(base + search(&local_cumulative, rng.gen_range(0.0..local_total)));
            }
        }
        draws
    }
}

fn cumulative_sums(weights: &[f64]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for &w in weights {
        acc += w.max(0.0);
        cumulative.push(acc);
    }
    cumulative
}

/// Index of the first cumulative entry strictly above `needle`.
fn search(cumulative: &[f64], needle: f64) -> usize {
    cumulative
        .partition_point(|&c| c <= needle)
        .min(cumulative.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn frequency(draws: &[usize], index: usize) -> f64 {
        draws.iter().filter(|&&d| d == index).count() as f64 / draws.len() as f64
    }

    #[test]
    fn empty_edge_set_is_rejected() {
        assert!(matches!(
            WeightedEdgeSampler::new(Vec::new(), 100),
            Err(SamplerError::EmptyEdgeSet)
        ));
    }

    #[test]
    fn zero_mass_is_rejected() {
        assert!(matches!(
            WeightedEdgeSampler::new(vec![0.0, 0.0], 100),
            Err(SamplerError::VanishingWeightMass)
        ));
    }

    #[test]
    fn budget_floors_the_expected_mass() {
        let sampler = WeightedEdgeSampler::new(vec![0.9, 0.1, 0.5], 100).unwrap();
        assert_eq!(sampler.budget(5.0), 7);
    }

    #[test]
    fn direct_draw_matches_weights() {
        let sampler = WeightedEdgeSampler::new(vec![0.9, 0.1], 100).unwrap();
        assert_eq!(sampler.strategy(), SamplingStrategy::Direct);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let draws = sampler.sample(200_000, &mut rng);
        assert_eq!(draws.len(), 200_000);
        assert!((frequency(&draws, 0) - 0.9).abs() < 0.01);
        assert!((frequency(&draws, 1) - 0.1).abs() < 0.01);
    }

    #[test]
    fn partitioned_draw_matches_weights() {
        // cutoff of 1 forces the partitioned path; partition size 1 splits
        // the two edges across two partitions
        let sampler = WeightedEdgeSampler::new(vec![0.9, 0.1], 1).unwrap();
        assert_eq!(sampler.strategy(), SamplingStrategy::Partitioned);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let draws = sampler.sample_partitioned_with(200_000, &mut rng, 1);
        assert!((frequency(&draws, 0) - 0.9).abs() < 0.01);
        assert!((frequency(&draws, 1) - 0.1).abs() < 0.01);
    }

    #[test]
    fn strategies_agree_statistically() {
        let weights = vec![0.05, 0.3, 0.15, 0.4, 0.1];
        let direct = WeightedEdgeSampler::new(weights.clone(), 1_000).unwrap();
        let partitioned = WeightedEdgeSampler::new(weights.clone(), 2).unwrap();
        let total: f64 = weights.iter().sum();

        let mut rng_a = ChaCha8Rng::seed_from_u64(7);
        let mut rng_b = ChaCha8Rng::seed_from_u64(11);
        let draws_a = direct.sample(300_000, &mut rng_a);
        let draws_b = partitioned.sample_partitioned_with(300_000, &mut rng_b, 2);

        for (i, &w) in weights.iter().enumerate() {
            let expected = w / total;
            assert!((frequency(&draws_a, i) - expected).abs() < 0.01);
            assert!((frequency(&draws_b, i) - expected).abs() < 0.01);
        }
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let sampler = WeightedEdgeSampler::new(vec![0.2, 0.3, 0.5], 100).unwrap();
        let mut rng_a = ChaCha8Rng::seed_from_u64(123);
        let mut rng_b = ChaCha8Rng::seed_from_u64(123);
        assert_eq!(sampler.sample(1000, &mut rng_a), sampler.sample(1000, &mut rng_b));
    }
}
