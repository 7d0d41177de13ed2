//! Drift-driven checkpoint segmentation
//!
//! Partitions an ordered checkpoint range into contiguous segments whose
//! cumulative representation drift stays under a threshold. Drift between
//! adjacent checkpoints is the symmetric Hausdorff distance between their
//! representation sets. The walk runs backward from the latest checkpoint so
//! the most recent, most stable range closes first; the orchestrator then
//! trains segments newest-first and threads anchor embeddings backward
//! through the shared boundary checkpoints.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::info;
use thiserror::Error;

use crate::complex::neighborhood::hausdorff_distance;
use crate::provider::{Checkpoint, DataProvider, ProviderError};

/// Segmentation errors
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("Representation source failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("Checkpoint range [{0}, {1}] holds fewer than two checkpoints")]
    RangeTooSmall(Checkpoint, Checkpoint),

    #[error("Drift threshold must be positive, got {0}")]
    NonPositiveThreshold(f64),
}

/// Closed checkpoint range trained as one continuity-preserving unit.
///
/// Adjacent segments share their boundary checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: Checkpoint,
    pub end: Checkpoint,
}

impl Segment {
    pub fn contains(&self, checkpoint: Checkpoint) -> bool {
        (self.start..=self.end).contains(&checkpoint)
    }
}

/// Backward-walking segmenter over a checkpoint range.
pub struct Segmenter<'a> {
    provider: &'a dyn DataProvider,
    threshold: f64,
    range_start: Checkpoint,
    range_end: Checkpoint,
    period: usize,
}

impl<'a> Segmenter<'a> {
    pub fn new(
        provider: &'a dyn DataProvider,
        threshold: f64,
        range_start: Checkpoint,
        range_end: Checkpoint,
        period: usize,
    ) -> Self {
        Self { provider, threshold, range_start, range_end, period: period.max(1) }
    }

    /// Produce the ordered segment list (earliest segment first).
    ///
    /// Invariants: segments are contiguous, overlap only at shared boundary
    /// checkpoints, each covers at least one transition, and their union is
    /// exactly the input range.
    pub fn segment(&self) -> Result<Vec<Segment>, SegmentError> {
        if self.threshold <= 0.0 {
            return Err(SegmentError::NonPositiveThreshold(self.threshold));
        }
        let checkpoints: Vec<Checkpoint> = (self.range_start..=self.range_end)
            .step_by(self.period)
            .collect();
        if checkpoints.len() < 2 {
            return Err(SegmentError::RangeTooSmall(self.range_start, self.range_end));
        }

        let mut segments = Vec::new();
        let mut seg_end = checkpoints.len() - 1;
        let mut accumulated = 0.0;

        // walk backward over transitions [idx, idx + 1]
        for idx in (0..checkpoints.len() - 1).rev() {
            let earlier = self.provider.train_representation(checkpoints[idx])?;
            let later = self.provider.train_representation(checkpoints[idx + 1])?;
            accumulated += hausdorff_distance(&earlier, &later);

            if accumulated > self.threshold && idx + 1 < seg_end {
                // the transition would overflow this segment: close it at the
                // checkpoint after the transition and restart accumulation
                segments.push(Segment {
                    start: checkpoints[idx + 1],
                    end: checkpoints[seg_end],
                });
                seg_end = idx + 1;
                accumulated = hausdorff_distance(&earlier, &later);
            } else if accumulated > self.threshold {
                // single-transition segment: close it whole
                segments.push(Segment {
                    start: checkpoints[idx],
                    end: checkpoints[seg_end],
                });
                seg_end = idx;
                accumulated = 0.0;
            }
        }
        if seg_end > 0 {
            segments.push(Segment { start: checkpoints[0], end: checkpoints[seg_end] });
        }
        segments.reverse();

        info!(
            "segmented [{}, {}] into {} segment(s) at drift threshold {}",
            self.range_start,
            self.range_end,
            segments.len(),
            self.threshold
        );
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ArrayProvider;
    use nalgebra::DMatrix;

    /// Checkpoints as shifted point clouds; shifting by `offset` makes the
    /// Hausdorff distance between adjacent checkpoints exactly `offset`.
    fn drifting_provider(offsets: &[f64]) -> ArrayProvider {
        let mut provider = ArrayProvider::new(0, offsets.len() - 1, 1);
        for (cp, &offset) in offsets.iter().enumerate() {
            let data = DMatrix::from_fn(10, 2, |i, c| {
                if c == 0 { i as f64 + offset } else { 0.0 }
            });
            provider.insert(cp, data, vec![0; 10]);
        }
        provider
    }

    fn assert_covering(segments: &[Segment], start: usize, end: usize) {
        assert_eq!(segments.first().unwrap().start, start);
        assert_eq!(segments.last().unwrap().end, end);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
    }

    #[test]
    fn high_threshold_yields_one_segment() {
        let provider = drifting_provider(&[0.0, 1.0, 2.0]);
        let segments = Segmenter::new(&provider, 1e6, 0, 2, 1).segment().unwrap();
        assert_eq!(segments, vec![Segment { start: 0, end: 2 }]);
    }

    #[test]
    fn drift_spike_splits_the_range() {
        // transitions: 0->1 drifts by 1, 1->2 by an order of magnitude more
        let provider = drifting_provider(&[0.0, 1.0, 51.0]);
        let segments = Segmenter::new(&provider, 10.0, 0, 2, 1).segment().unwrap();
        assert_eq!(segments.len(), 2);
        assert_covering(&segments, 0, 2);
        assert_eq!(segments[1], Segment { start: 1, end: 2 });
    }

    #[test]
    fn tiny_threshold_still_covers_every_checkpoint() {
        let provider = drifting_provider(&[0.0, 5.0, 10.0, 15.0, 20.0]);
        let segments = Segmenter::new(&provider, 1.0, 0, 4, 1).segment().unwrap();
        assert_covering(&segments, 0, 4);
        // every transition overflows: one segment per transition
        assert_eq!(segments.len(), 4);
    }

    #[test]
    fn accumulation_spans_multiple_small_transitions() {
        let provider = drifting_provider(&[0.0, 3.0, 6.0, 9.0]);
        // each transition drifts 3; threshold 7 fits two transitions per segment
        let segments = Segmenter::new(&provider, 7.0, 0, 3, 1).segment().unwrap();
        assert_covering(&segments, 0, 3);
        assert!(segments.len() >= 2);
    }

    #[test]
    fn single_checkpoint_range_is_rejected() {
        let provider = drifting_provider(&[0.0]);
        assert!(matches!(
            Segmenter::new(&provider, 1.0, 0, 0, 1).segment(),
            Err(SegmentError::RangeTooSmall(0, 0))
        ));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let provider = drifting_provider(&[0.0, 1.0]);
        assert!(matches!(
            Segmenter::new(&provider, 0.0, 0, 1, 1).segment(),
            Err(SegmentError::NonPositiveThreshold(_))
        ));
    }
}
