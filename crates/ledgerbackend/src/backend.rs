//! Ledger backend surface

use crate::error::Result;
use async_trait::async_trait;
use ledgersync_core::{LedgerCloseMeta, LedgerRange};

/// Ordered, validated access to closed ledgers.
///
/// Except for [`LedgerBackend::close`], implementations expect a single task
/// to drive them. `close` may be called from any task at any time and
/// interrupts pending operations.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Position the backend at the start of `range`
    async fn prepare_range(&self, range: LedgerRange) -> Result<()>;

    /// Whether `range` can be served without preparing again
    async fn is_prepared(&self, range: LedgerRange) -> Result<bool>;

    /// Block until ledger `sequence` is available and return it.
    ///
    /// Sequences must be requested in non-decreasing order.
    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta>;

    /// Newest ledger the backend can serve without waiting
    async fn get_latest_ledger_sequence(&self) -> Result<u32>;

    /// Shut the backend down; idempotent
    async fn close(&self) -> Result<()>;
}
