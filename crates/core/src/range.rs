//! Ledger ranges
//!
//! A range is either bounded (`[from, to]`, replayed from history) or
//! unbounded (`[from, ∞)`, tracking the live network).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed interval of ledger sequence numbers, optionally open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerRange {
    from: u32,
    to: u32,
    bounded: bool,
}

impl LedgerRange {
    /// Range `[from, to]`, both ends included.
    pub fn bounded(from: u32, to: u32) -> Result<Self> {
        if from == 0 {
            return Err(CoreError::ZeroFrom { from });
        }
        if to < from {
            return Err(CoreError::InvertedRange { from, to });
        }
        Ok(Self {
            from,
            to,
            bounded: true,
        })
    }

    /// Range `[from, ∞)`.
    pub fn unbounded(from: u32) -> Result<Self> {
        if from == 0 {
            return Err(CoreError::ZeroFrom { from });
        }
        Ok(Self {
            from,
            to: 0,
            bounded: false,
        })
    }

    /// First ledger of the range
    pub fn from(&self) -> u32 {
        self.from
    }

    /// Last ledger of the range, `None` when unbounded
    pub fn to(&self) -> Option<u32> {
        self.bounded.then_some(self.to)
    }

    /// Whether the range has an upper bound
    pub fn is_bounded(&self) -> bool {
        self.bounded
    }
}

impl fmt::Display for LedgerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bounded {
            write!(f, "[{},{}]", self.from, self.to)
        } else {
            write!(f, "[{},latest)", self.from)
        }
    }
}
