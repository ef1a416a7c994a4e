//! Core error types

use thiserror::Error;

/// Core error type for ledgersync
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Ledger sequence 0 does not exist
    #[error("Invalid range: from sequence must be >= 1, got {from}")]
    ZeroFrom {
        /// Requested start sequence
        from: u32,
    },

    /// Bounded range whose end precedes its start
    #[error("Invalid range: to sequence {to} is lower than from sequence {from}")]
    InvertedRange {
        /// Requested start sequence
        from: u32,
        /// Requested end sequence
        to: u32,
    },

    /// Checkpoint frequency too small to be meaningful
    #[error("Invalid checkpoint frequency {0}: must be >= 2")]
    InvalidCheckpointFrequency(u32),

    /// Malformed ledger hash
    #[error("Invalid ledger hash: {0}")]
    InvalidHash(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
