//! Structured timing records
//!
//! Each round reports its construction and training wall-clock cost as a
//! structured record; the surrounding tooling decides where the ledger ends
//! up. No ambient output redirection happens inside the core.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pipeline phase a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Edge complex construction (spatial + temporal)
    Construction,
    /// Embedding model optimization
    Training,
    /// Checkpoint-range segmentation
    Segmentation,
}

/// One timing entry keyed by round identifier and phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRecord {
    pub round: String,
    pub phase: Phase,
    pub seconds: f64,
}

/// Append-only collection of timing records for one strategy run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TimingLedger {
    records: Vec<TimingRecord>,
}

impl TimingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, round: impl Into<String>, phase: Phase, elapsed: Duration) {
        self.records.push(TimingRecord {
            round: round.into(),
            phase,
            seconds: elapsed.as_secs_f64(),
        });
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    /// Records for one phase, in insertion order.
    pub fn phase_records(&self, phase: Phase) -> impl Iterator<Item = &TimingRecord> {
        self.records.iter().filter(move |r| r.phase == phase)
    }

    /// Persist the ledger as a JSON artifact next to the model checkpoints.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let payload = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, payload)
    }
}
