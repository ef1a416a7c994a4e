//! Trusted ledger hash store
//!
//! A hash store hands out ledger hashes that were verified earlier, e.g. by a
//! previous ingestion run, so the backend can start live mode without an
//! archive round-trip.

use async_trait::async_trait;
use ledgersync_core::LedgerHash;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Errors returned by hash stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashStoreError {
    /// The store was closed
    #[error("ledger hash store is closed")]
    Closed,

    /// The underlying storage failed
    #[error("ledger hash store backend error: {0}")]
    Backend(String),
}

/// Source of previously verified ledger hashes
#[async_trait]
pub trait TrustedLedgerHashStore: Send + Sync {
    /// Hash of ledger `sequence`, `None` if the store has no entry
    async fn get_ledger_hash(&self, sequence: u32) -> Result<Option<LedgerHash>, HashStoreError>;

    /// Release the store
    async fn close(&self) -> Result<(), HashStoreError>;
}

/// In-memory hash store
#[derive(Debug, Default)]
pub struct MemoryLedgerHashStore {
    hashes: RwLock<HashMap<u32, LedgerHash>>,
    closed: AtomicBool,
}

impl MemoryLedgerHashStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hash of ledger `sequence`
    pub fn insert(&self, sequence: u32, hash: LedgerHash) -> Result<(), HashStoreError> {
        if self.is_closed() {
            return Err(HashStoreError::Closed);
        }
        self.hashes
            .write()
            .map_err(|e| HashStoreError::Backend(format!("lock poisoned: {}", e)))?
            .insert(sequence, hash);
        Ok(())
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FromIterator<(u32, LedgerHash)> for MemoryLedgerHashStore {
    fn from_iter<I: IntoIterator<Item = (u32, LedgerHash)>>(iter: I) -> Self {
        Self {
            hashes: RwLock::new(iter.into_iter().collect()),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TrustedLedgerHashStore for MemoryLedgerHashStore {
    async fn get_ledger_hash(&self, sequence: u32) -> Result<Option<LedgerHash>, HashStoreError> {
        if self.is_closed() {
            return Err(HashStoreError::Closed);
        }
        let hashes = self
            .hashes
            .read()
            .map_err(|e| HashStoreError::Backend(format!("lock poisoned: {}", e)))?;
        Ok(hashes.get(&sequence).copied())
    }

    async fn close(&self) -> Result<(), HashStoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
