//! ledgersync ledger backend
//!
//! Ordered, hash-chain validated access to closed ledgers produced by a
//! captive consensus node.

pub mod archive;
pub mod backend;
pub mod captive;
pub mod error;
pub mod hash_store;
pub mod runner;

pub use archive::{ArchiveError, ArchivePool, HistoryArchive};
pub use backend::LedgerBackend;
pub use captive::{CaptiveCoreBackend, CaptiveCoreParams};
pub use error::{CaptiveCoreError, ErrorKind, Result};
pub use hash_store::{HashStoreError, MemoryLedgerHashStore, TrustedLedgerHashStore};
pub use runner::{MetaResult, Runner, RunnerError, RunnerExit, RunnerFactory, RunnerMode};
