//! Ledger close records and hashes
//!
//! A [`LedgerCloseMeta`] is produced by the node process for every closed
//! ledger. The backend treats the payload as opaque and only relies on the
//! sequence number and the two hashes that chain consecutive records.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a ledger hash in bytes
pub const HASH_LEN: usize = 32;

/// 32-byte ledger hash, rendered as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LedgerHash(pub [u8; HASH_LEN]);

impl LedgerHash {
    /// All-zero hash
    pub const ZERO: LedgerHash = LedgerHash([0u8; HASH_LEN]);

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; HASH_LEN]> for LedgerHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for LedgerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for LedgerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerHash({})", self.to_hex())
    }
}

impl FromStr for LedgerHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHash(e.to_string()))?;
        let bytes: [u8; HASH_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            CoreError::InvalidHash(format!("expected {} bytes, got {}", HASH_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }
}

/// Metadata emitted by the node when a ledger closes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCloseMeta {
    /// Ledger sequence number
    pub sequence: u32,
    /// Hash of this ledger's header
    pub hash: LedgerHash,
    /// Hash of the preceding ledger's header
    pub previous_hash: LedgerHash,
    /// Encoded close metadata (transactions, state changes)
    pub payload: Vec<u8>,
}

impl LedgerCloseMeta {
    /// Ledger sequence number
    pub fn ledger_sequence(&self) -> u32 {
        self.sequence
    }

    /// Hash of this ledger
    pub fn ledger_hash(&self) -> LedgerHash {
        self.hash
    }

    /// Hash this ledger declares for its predecessor
    pub fn previous_ledger_hash(&self) -> LedgerHash {
        self.previous_hash
    }
}

/// Ledger header as published by history archives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    /// Ledger sequence number
    pub sequence: u32,
    /// Hash of the preceding ledger
    pub previous_ledger_hash: LedgerHash,
    /// Hash of the bucket list after this ledger closed
    pub bucket_list_hash: LedgerHash,
}
