//! Node runner contract
//!
//! A [`Runner`] is one session of the external consensus-node process. The
//! backend only ever talks to the process through this trait: it starts the
//! node in catch-up or live mode, drains ledger records from the meta pipe,
//! asks whether the process exited, and closes it.

use ledgersync_core::{LedgerCloseMeta, LedgerHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors reported by a runner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    /// The process could not be spawned or configured
    #[error("failed to start node process: {0}")]
    Start(String),

    /// A record on the meta pipe could not be decoded
    #[error("failed to decode ledger meta: {0}")]
    Decode(String),

    /// The process terminated with an error
    #[error("node process failed: {0}")]
    Process(String),

    /// Releasing the process or its storage failed
    #[error("failed to close node process: {0}")]
    Close(String),
}

/// One element of the meta pipe
pub type MetaResult = Result<LedgerCloseMeta, RunnerError>;

/// Exit state of the node process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// Still running
    Running,
    /// Exited without reporting an error
    Exited,
    /// Exited with an error
    Failed(RunnerError),
}

impl RunnerExit {
    /// Whether the process is gone
    pub fn has_exited(&self) -> bool {
        !matches!(self, RunnerExit::Running)
    }
}

/// Mode the node process is started in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerMode {
    /// Catch-up replay of a bounded range from history archives
    Offline,
    /// Live tracking of the network from a start ledger
    Online,
}

impl fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerMode::Offline => f.write_str("offline"),
            RunnerMode::Online => f.write_str("online"),
        }
    }
}

/// One session of the external node process.
///
/// Records arrive on [`Runner::meta_pipe`] in strictly increasing order. The
/// pipe is closed only once the process exits or the runner's context is
/// canceled. `close` must be idempotent.
pub trait Runner: Send {
    /// Replay ledgers `[from, to]` in catch-up mode
    fn catchup(&mut self, from: u32, to: u32) -> Result<(), RunnerError>;

    /// Track the network starting after ledger `from`, whose hash is `hash`
    fn run_from(&mut self, from: u32, hash: LedgerHash) -> Result<(), RunnerError>;

    /// Stream of ledger records emitted by the process
    fn meta_pipe(&mut self) -> &mut mpsc::Receiver<MetaResult>;

    /// Whether the process exited, and with what error
    fn process_exit(&self) -> RunnerExit;

    /// Cancellation context of this session
    fn context(&self) -> &CancellationToken;

    /// Terminate the process and release its resources
    fn close(&mut self) -> Result<(), RunnerError>;
}

/// Creates runners on demand. `cancel` is a child of the backend's root token.
pub trait RunnerFactory: Send + Sync {
    fn create(
        &self,
        mode: RunnerMode,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Runner>, RunnerError>;
}

impl<F> RunnerFactory for F
where
    F: Fn(RunnerMode, CancellationToken) -> Result<Box<dyn Runner>, RunnerError> + Send + Sync,
{
    fn create(
        &self,
        mode: RunnerMode,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Runner>, RunnerError> {
        self(mode, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_exit_states() {
        assert!(!RunnerExit::Running.has_exited());
        assert!(RunnerExit::Exited.has_exited());
        assert!(RunnerExit::Failed(RunnerError::Process("boom".into())).has_exited());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(RunnerMode::Offline.to_string(), "offline");
        assert_eq!(RunnerMode::Online.to_string(), "online");
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_mode: RunnerMode, _cancel: CancellationToken| -> Result<Box<dyn Runner>, RunnerError> {
            Err(RunnerError::Start("binary not found".into()))
        };
        let result = factory.create(RunnerMode::Online, CancellationToken::new());
        assert!(matches!(result, Err(RunnerError::Start(_))));
    }
}
