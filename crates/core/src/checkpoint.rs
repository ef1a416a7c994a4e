//! Checkpoint arithmetic
//!
//! History archives snapshot ledger state every `frequency` ledgers. Checkpoint
//! `k` (k >= 1) covers `[k*F - F + 1, k*F]`, so every multiple of the frequency
//! closes a checkpoint. Ledger 1 is the genesis ledger and is never streamed by
//! the node, so the first checkpoint is reported as starting at ledger 2.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Checkpoint frequency used by public networks
pub const DEFAULT_CHECKPOINT_FREQUENCY: u32 = 64;

/// First ledger the node can replay
pub const FIRST_REPLAYABLE_LEDGER: u32 = 2;

/// Inclusive interval of ledgers belonging to one checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRange {
    /// First ledger of the checkpoint
    pub low: u32,
    /// Checkpoint ledger itself
    pub high: u32,
}

/// Pure arithmetic over a fixed checkpoint frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointManager {
    frequency: u32,
}

impl CheckpointManager {
    /// Create a manager for the given frequency (at least 2)
    pub fn new(frequency: u32) -> Result<Self> {
        if frequency < 2 {
            return Err(CoreError::InvalidCheckpointFrequency(frequency));
        }
        Ok(Self { frequency })
    }

    /// Ledgers per checkpoint
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Whether `sequence` closes a checkpoint
    pub fn is_checkpoint(&self, sequence: u32) -> bool {
        sequence != 0 && sequence % self.frequency == 0
    }

    /// Smallest checkpoint-aligned sequence >= `sequence`.
    ///
    /// Saturates at `u32::MAX` when no aligned sequence fits.
    pub fn next_boundary(&self, sequence: u32) -> u32 {
        let freq = u64::from(self.frequency);
        let k = u64::from(sequence).div_ceil(freq).max(1);
        saturate(k * freq)
    }

    /// The checkpoint interval containing `sequence`
    pub fn checkpoint_containing(&self, sequence: u32) -> CheckpointRange {
        let high = self.next_boundary(sequence);
        let low = if high == u32::MAX && high % self.frequency != 0 {
            // Last partial checkpoint before the sequence space runs out
            high - high % self.frequency + 1
        } else {
            high - (self.frequency - 1)
        };
        CheckpointRange {
            low: low.max(FIRST_REPLAYABLE_LEDGER),
            high,
        }
    }

    /// First ledger the node streams when replaying a range starting at
    /// `sequence`: the start of its checkpoint.
    pub fn first_replay_ledger(&self, sequence: u32) -> u32 {
        self.checkpoint_containing(sequence).low
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_CHECKPOINT_FREQUENCY,
        }
    }
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
