//! Error types for the captive ledger backend.
//!
//! Every failure is classified into an [`ErrorKind`] so callers can tell a
//! usage error from a data-integrity fault or a deliberate shutdown.

use crate::archive::ArchiveError;
use crate::hash_store::HashStoreError;
use crate::runner::RunnerError;
use ledgersync_core::{CoreError, LedgerHash};
use thiserror::Error;

/// Broad failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration, or history archives unreachable or failing
    Connectivity,
    /// Requested range cannot be served
    RangeValidation,
    /// Operation called in the wrong state
    Precondition,
    /// The node emitted an inconsistent stream; the session was closed
    Integrity,
    /// Shutdown requested by the caller
    Cancelled,
    /// A runner or hash store operation failed
    Collaborator,
}

/// Errors that can occur in the captive backend
#[derive(Debug, Error)]
pub enum CaptiveCoreError {
    /// Backend settings rejected
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(#[source] CoreError),

    /// No archive answered at construction
    #[error("error connecting to history archives: {0}")]
    ArchiveUnavailable(#[source] ArchiveError),

    /// Archive lookup failed
    #[error("{context}: {source}")]
    Archive {
        /// What the backend was doing
        context: String,
        /// Underlying archive error
        #[source]
        source: ArchiveError,
    },

    #[error("from sequence: {from} is greater than max available in history archives: {latest}")]
    FromBeyondArchive { from: u32, latest: u32 },

    #[error("to sequence: {to} is greater than max available in history archives: {latest}")]
    ToBeyondArchive { to: u32, latest: u32 },

    #[error(
        "trying to start online mode too far (latest checkpoint={latest}), only two checkpoints in the future allowed"
    )]
    OnlineTooFar { from: u32, latest: u32 },

    #[error("unable to start from ledger 1, start from ledger 2")]
    StartFromGenesis,

    #[error("ledger backend is closed and no longer usable")]
    Closed,

    #[error("session is not prepared, call prepare_range first")]
    NotPrepared,

    #[error("requested ledger {requested} is behind the captive core stream (expected={expected})")]
    BehindStream { requested: u32, expected: u32 },

    #[error("reading past bounded range (requested sequence={requested}, last ledger in range={last})")]
    PastBoundedRange { requested: u32, last: u32 },

    #[error("the previous node process is still running")]
    PreviousSessionRunning,

    /// Another caller is driving the backend
    #[error("ledger backend is driven concurrently; only close may be called from another task")]
    ConcurrentAccess,

    #[error("unexpected ledger sequence (expected={expected} actual={actual})")]
    UnexpectedSequence { expected: u32, actual: u32 },

    #[error("unexpected ledger sequence (expected=<={max} actual={actual})")]
    UnexpectedFirstSequence { max: u32, actual: u32 },

    #[error("unexpected previous ledger hash for ledger {sequence} (expected={expected} actual={actual})")]
    PreviousHashMismatch {
        sequence: u32,
        expected: LedgerHash,
        actual: LedgerHash,
    },

    /// The node process terminated while ledgers were still expected
    #[error("node process exited unexpectedly{}", .0.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    ProcessExited(Option<RunnerError>),

    #[error("meta pipe closed unexpectedly")]
    MetaPipeClosed,

    /// Consuming the meta stream failed (e.g. undecodable record)
    #[error("error reading ledger meta stream: {0}")]
    MetaStream(#[source] RunnerError),

    #[error("operation canceled")]
    Cancelled,

    #[error("error starting node runner: {0}")]
    RunnerStart(#[source] RunnerError),

    #[error("error closing node runner: {0}")]
    RunnerClose(#[source] RunnerError),

    #[error("error trying to read ledger hash {sequence}: {source}")]
    HashStore {
        sequence: u32,
        #[source]
        source: HashStoreError,
    },

    /// Preparing a range could not position the stream at its first ledger
    #[error("error fast-forwarding to {sequence}: {source}")]
    FastForward {
        sequence: u32,
        #[source]
        source: Box<CaptiveCoreError>,
    },
}

impl CaptiveCoreError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        use CaptiveCoreError::*;
        match self {
            InvalidConfig(_) | ArchiveUnavailable(_) | Archive { .. } => ErrorKind::Connectivity,
            FromBeyondArchive { .. }
            | ToBeyondArchive { .. }
            | OnlineTooFar { .. }
            | StartFromGenesis => ErrorKind::RangeValidation,
            Closed
            | NotPrepared
            | BehindStream { .. }
            | PastBoundedRange { .. }
            | PreviousSessionRunning
            | ConcurrentAccess => ErrorKind::Precondition,
            UnexpectedSequence { .. }
            | UnexpectedFirstSequence { .. }
            | PreviousHashMismatch { .. }
            | ProcessExited(_)
            | MetaPipeClosed
            | MetaStream(_) => ErrorKind::Integrity,
            Cancelled => ErrorKind::Cancelled,
            RunnerStart(_) | RunnerClose(_) | HashStore { .. } => ErrorKind::Collaborator,
            FastForward { source, .. } => source.kind(),
        }
    }

    /// Whether this error stems from a deliberate shutdown
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Innermost error, looking through `FastForward`
    pub fn root(&self) -> &CaptiveCoreError {
        match self {
            CaptiveCoreError::FastForward { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, CaptiveCoreError>;
