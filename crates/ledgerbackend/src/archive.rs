//! History archive access
//!
//! The backend reads three things from history archives: the latest published
//! checkpoint (to bound valid ranges), ledger headers (to bootstrap the live
//! start hash) and bucket-list hashes.

use async_trait::async_trait;
use ledgersync_core::{LedgerHash, LedgerHeader};
use rand::seq::SliceRandom;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors returned by archive lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The archive could not be reached
    #[error("archive unreachable: {0}")]
    Unreachable(String),

    /// The requested ledger is not published
    #[error("ledger {0} not found in archive")]
    NotFound(u32),

    /// The archive returned unreadable data
    #[error("malformed archive data: {0}")]
    Malformed(String),
}

/// Read-only history archive
#[async_trait]
pub trait HistoryArchive: Send + Sync {
    /// Latest checkpoint ledger published by the archive
    async fn get_latest_checkpoint_sequence(&self) -> Result<u32, ArchiveError>;

    /// Header of ledger `sequence`
    async fn get_ledger_header(&self, sequence: u32) -> Result<LedgerHeader, ArchiveError>;

    /// Bucket-list hash after ledger `sequence` closed
    async fn get_bucket_list_hash(&self, sequence: u32) -> Result<LedgerHash, ArchiveError>;
}

/// Set of equivalent archives; each lookup goes to a random reachable member
pub struct ArchivePool {
    archives: Vec<Arc<dyn HistoryArchive>>,
}

impl ArchivePool {
    /// Probe every archive and keep the ones that answer.
    ///
    /// Fails only if no archive is reachable.
    pub async fn connect(archives: Vec<Arc<dyn HistoryArchive>>) -> Result<Self, ArchiveError> {
        let total = archives.len();
        let mut reachable = Vec::with_capacity(total);
        let mut last_error = None;

        for (index, archive) in archives.into_iter().enumerate() {
            match archive.get_latest_checkpoint_sequence().await {
                Ok(_) => reachable.push(archive),
                Err(e) => {
                    warn!(index, error = %e, "History archive unreachable");
                    last_error = Some(e);
                }
            }
        }

        if reachable.is_empty() {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no archives configured".to_string());
            return Err(ArchiveError::Unreachable(format!(
                "error connecting to all history archives: {}",
                reason
            )));
        }

        info!(reachable = reachable.len(), total, "History archive pool ready");
        Ok(Self {
            archives: reachable,
        })
    }

    /// Number of reachable archives
    pub fn len(&self) -> usize {
        self.archives.len()
    }

    /// Whether the pool is empty (never true after `connect`)
    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    fn pick(&self) -> Result<&Arc<dyn HistoryArchive>, ArchiveError> {
        self.archives
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| ArchiveError::Unreachable("archive pool is empty".to_string()))
    }
}

#[async_trait]
impl HistoryArchive for ArchivePool {
    async fn get_latest_checkpoint_sequence(&self) -> Result<u32, ArchiveError> {
        self.pick()?.get_latest_checkpoint_sequence().await
    }

    async fn get_ledger_header(&self, sequence: u32) -> Result<LedgerHeader, ArchiveError> {
        self.pick()?.get_ledger_header(sequence).await
    }

    async fn get_bucket_list_hash(&self, sequence: u32) -> Result<LedgerHash, ArchiveError> {
        self.pick()?.get_bucket_list_hash(sequence).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedArchive {
        latest: Option<u32>,
    }

    #[async_trait]
    impl HistoryArchive for FixedArchive {
        async fn get_latest_checkpoint_sequence(&self) -> Result<u32, ArchiveError> {
            self.latest
                .ok_or_else(|| ArchiveError::Unreachable("connection refused".to_string()))
        }

        async fn get_ledger_header(&self, sequence: u32) -> Result<LedgerHeader, ArchiveError> {
            Ok(LedgerHeader {
                sequence,
                previous_ledger_hash: LedgerHash([1u8; 32]),
                bucket_list_hash: LedgerHash([2u8; 32]),
            })
        }

        async fn get_bucket_list_hash(&self, _sequence: u32) -> Result<LedgerHash, ArchiveError> {
            Ok(LedgerHash([2u8; 32]))
        }
    }

    #[tokio::test]
    async fn test_pool_keeps_reachable_archives() {
        let pool = ArchivePool::connect(vec![
            Arc::new(FixedArchive { latest: None }),
            Arc::new(FixedArchive { latest: Some(127) }),
        ])
        .await
        .unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get_latest_checkpoint_sequence().await.unwrap(), 127);
        assert_eq!(
            pool.get_bucket_list_hash(64).await.unwrap(),
            LedgerHash([2u8; 32])
        );
        assert_eq!(pool.get_ledger_header(64).await.unwrap().sequence, 64);
    }

    #[tokio::test]
    async fn test_pool_fails_when_all_unreachable() {
        let result = ArchivePool::connect(vec![
            Arc::new(FixedArchive { latest: None }),
            Arc::new(FixedArchive { latest: None }),
        ])
        .await;

        match result {
            Err(ArchiveError::Unreachable(reason)) => {
                assert!(reason.contains("all history archives"));
                assert!(reason.contains("connection refused"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("pool connected without reachable archives"),
        }
    }

    #[tokio::test]
    async fn test_pool_fails_without_archives() {
        assert!(ArchivePool::connect(Vec::new()).await.is_err());
    }
}
