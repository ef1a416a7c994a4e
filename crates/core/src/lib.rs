//! Core types for ledgersync.
//!
//! Ledger ranges, checkpoint arithmetic, ledger close records and the
//! ambient configuration and logging used by the backend crates.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
pub mod meta;
pub mod range;

pub use checkpoint::{
    CheckpointManager, CheckpointRange, DEFAULT_CHECKPOINT_FREQUENCY, FIRST_REPLAYABLE_LEDGER,
};
pub use config::{BackendConfig, Config, LogFormat, LoggingConfig};
pub use error::{CoreError, Result};
pub use meta::{LedgerCloseMeta, LedgerHash, LedgerHeader, HASH_LEN};
pub use range::LedgerRange;
