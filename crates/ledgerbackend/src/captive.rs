//! Captive Core Ledger Backend
//!
//! Drives an external consensus-node process through a [`Runner`] and turns
//! its output into a gap-free, hash-chained stream of closed ledgers.
//!
//! # Modes
//!
//! - **Bounded range**: the node is started in catch-up mode and replays the
//!   range from history archives, starting at the checkpoint containing the
//!   first requested ledger. The session closes itself after the last ledger
//!   of the range has been returned.
//! - **Unbounded range**: the node is started in live mode right before the
//!   first requested ledger and keeps following the network.
//!
//! # Guarantees
//!
//! - Strict ordering: every accepted record has the expected sequence number
//! - Chain continuity: every record's previous hash matches the hash of the
//!   record accepted before it
//! - Fail-closed: any anomaly closes the runner; the caller must prepare a new
//!   range to continue
//!
//! # Concurrency
//!
//! One task drives the backend (`prepare_range`, `get_ledger`, `is_prepared`,
//! `get_latest_ledger_sequence`). A second driver is rejected with
//! [`CaptiveCoreError::ConcurrentAccess`] instead of racing. `close` may be
//! called from any task and interrupts a blocked `get_ledger`.

use crate::archive::HistoryArchive;
use crate::backend::LedgerBackend;
use crate::error::{CaptiveCoreError, Result};
use crate::hash_store::TrustedLedgerHashStore;
use crate::runner::{MetaResult, Runner, RunnerExit, RunnerFactory, RunnerMode};
use async_trait::async_trait;
use ledgersync_core::{
    BackendConfig, CheckpointManager, LedgerCloseMeta, LedgerHash, LedgerRange,
    FIRST_REPLAYABLE_LEDGER,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Live starts at or below this ledger are redirected to ledger 3
const LAST_EARLY_START_LEDGER: u32 = 63;

/// Collaborators and settings for a [`CaptiveCoreBackend`]
pub struct CaptiveCoreParams {
    /// Backend settings
    pub config: BackendConfig,
    /// History archive used to validate ranges and bootstrap live mode
    pub archive: Arc<dyn HistoryArchive>,
    /// Creates node runners
    pub runner_factory: Arc<dyn RunnerFactory>,
    /// Optional trusted source of ledger hashes; closed with the backend
    pub ledger_hash_store: Option<Arc<dyn TrustedLedgerHashStore>>,
    /// Optional parent token; canceling it has the effect of `close`
    pub cancel: Option<CancellationToken>,
}

impl CaptiveCoreParams {
    /// Params with default settings and no hash store
    pub fn new(archive: Arc<dyn HistoryArchive>, runner_factory: Arc<dyn RunnerFactory>) -> Self {
        Self {
            config: BackendConfig::default(),
            archive,
            runner_factory,
            ledger_hash_store: None,
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_ledger_hash_store(mut self, store: Arc<dyn TrustedLedgerHashStore>) -> Self {
        self.ledger_hash_store = Some(store);
        self
    }

    pub fn with_cancel(mut self, parent: CancellationToken) -> Self {
        self.cancel = Some(parent);
        self
    }
}

/// Mode-specific part of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionMode {
    /// Catch-up replay ending at `last`
    Bounded { last: u32 },
    /// Live tracking
    Unbounded,
}

/// Streaming cursor of one runner session
#[derive(Debug)]
struct Session {
    range: LedgerRange,
    mode: SessionMode,
    /// Next sequence the runner must emit; 0 until the first record of a
    /// live session arrives
    next_ledger: u32,
    /// Hash of the last accepted record
    previous_hash: Option<LedgerHash>,
    /// Cleared once the runner is closed (range complete or stream failure)
    active: bool,
}

impl Session {
    fn new(range: LedgerRange, mode: SessionMode, next_ledger: u32) -> Self {
        Self {
            range,
            mode,
            next_ledger,
            previous_hash: None,
            active: true,
        }
    }

    /// `next_ledger`, or the start of the range while it is still unknown
    fn next_expected(&self) -> u32 {
        if self.next_ledger == 0 {
            self.range.from()
        } else {
            self.next_ledger
        }
    }

    fn last_ledger(&self) -> Option<u32> {
        match self.mode {
            SessionMode::Bounded { last } => Some(last),
            SessionMode::Unbounded => None,
        }
    }

    /// Check sequence continuity and the hash chain for the next record
    fn validate(&self, meta: &LedgerCloseMeta) -> Result<()> {
        let sequence = meta.ledger_sequence();
        if self.next_ledger != 0 && sequence != self.next_ledger {
            return Err(CaptiveCoreError::UnexpectedSequence {
                expected: self.next_ledger,
                actual: sequence,
            });
        }
        if self.next_ledger == 0 && sequence > self.range.from() {
            return Err(CaptiveCoreError::UnexpectedFirstSequence {
                max: self.range.from(),
                actual: sequence,
            });
        }
        if let Some(expected) = self.previous_hash {
            let actual = meta.previous_ledger_hash();
            if expected != actual {
                return Err(CaptiveCoreError::PreviousHashMismatch {
                    sequence,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Close the runner after a failure; the session can no longer serve reads
    fn terminate(&mut self, runner: &mut dyn Runner) {
        self.active = false;
        if let Err(e) = runner.close() {
            warn!(range = %self.range, error = %e, "Failed to close node runner");
        }
    }

    /// Handle one element received from the meta pipe.
    ///
    /// Returns the record if it is the requested `sequence`, `None` if the
    /// stream has to be drained further.
    fn accept(
        &mut self,
        runner: &mut dyn Runner,
        cached: &mut Option<LedgerCloseMeta>,
        sequence: u32,
        received: Option<MetaResult>,
    ) -> Result<Option<LedgerCloseMeta>> {
        let meta = match check_meta_result(runner, received) {
            Ok(meta) => meta,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(range = %self.range, error = %e, "Node meta stream failed");
                }
                self.terminate(runner);
                return Err(e);
            }
        };

        if let Err(e) = self.validate(&meta) {
            error!(
                range = %self.range,
                expected_sequence = self.next_expected(),
                actual_sequence = meta.ledger_sequence(),
                error = %e,
                "Ledger stream integrity violation"
            );
            self.terminate(runner);
            return Err(e);
        }

        let seq = meta.ledger_sequence();
        self.next_ledger = seq.saturating_add(1);
        self.previous_hash = Some(meta.ledger_hash());
        debug!(sequence = seq, hash = %meta.ledger_hash(), "Ledger accepted");
        *cached = Some(meta);

        if seq != sequence {
            return Ok(None);
        }

        if self.last_ledger() == Some(seq) {
            self.active = false;
            runner.close().map_err(CaptiveCoreError::RunnerClose)?;
            info!(range = %self.range, "Bounded range complete, node runner closed");
        }
        Ok(cached.clone())
    }
}

/// Classify what came out of the meta pipe
fn check_meta_result(runner: &dyn Runner, received: Option<MetaResult>) -> Result<LedgerCloseMeta> {
    // Shutdown requested through close() or the parent token
    if runner.context().is_cancelled() {
        return Err(CaptiveCoreError::Cancelled);
    }
    match received {
        Some(Ok(meta)) => Ok(meta),
        Some(Err(e)) => Err(CaptiveCoreError::MetaStream(e)),
        None => match runner.process_exit() {
            RunnerExit::Exited => Err(CaptiveCoreError::ProcessExited(None)),
            RunnerExit::Failed(e) => Err(CaptiveCoreError::ProcessExited(Some(e))),
            // The pipe only closes once the process exits or the context is canceled
            RunnerExit::Running => Err(CaptiveCoreError::MetaPipeClosed),
        },
    }
}

#[derive(Default)]
struct State {
    runner: Option<Box<dyn Runner>>,
    session: Option<Session>,
    /// Last record returned by `get_ledger`
    cached: Option<LedgerCloseMeta>,
}

impl State {
    fn is_prepared(&self, range: LedgerRange) -> bool {
        if self.runner.is_none() {
            return false;
        }
        let session = match &self.session {
            Some(session) if session.active => session,
            _ => return false,
        };
        let cached = self.cached.as_ref().map_or(0, |m| m.ledger_sequence());
        let reachable = session.next_expected() <= range.from() || cached == range.from();

        match (session.mode, range.to()) {
            (SessionMode::Unbounded, _) => reachable,
            (SessionMode::Bounded { last }, Some(to)) => reachable && last >= to,
            // Unbounded request against a bounded session
            (SessionMode::Bounded { .. }, None) => false,
        }
    }
}

/// Ledger backend running a captive consensus node
pub struct CaptiveCoreBackend {
    archive: Arc<dyn HistoryArchive>,
    checkpoints: CheckpointManager,
    ledger_hash_store: Option<Arc<dyn TrustedLedgerHashStore>>,
    runner_factory: Arc<dyn RunnerFactory>,
    /// Root token; every runner gets a child of it
    cancel: CancellationToken,
    closed: AtomicBool,
    state: Mutex<State>,
}

impl CaptiveCoreBackend {
    /// Create a backend, checking that the archive is reachable
    pub async fn new(params: CaptiveCoreParams) -> Result<Self> {
        let checkpoints = params
            .config
            .checkpoint_manager()
            .map_err(CaptiveCoreError::InvalidConfig)?;

        let cancel = params
            .cancel
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        let latest = params
            .archive
            .get_latest_checkpoint_sequence()
            .await
            .map_err(|e| {
                cancel.cancel();
                CaptiveCoreError::ArchiveUnavailable(e)
            })?;

        info!(
            latest_checkpoint = latest,
            checkpoint_frequency = checkpoints.frequency(),
            "Captive core backend created"
        );

        Ok(Self {
            archive: params.archive,
            checkpoints,
            ledger_hash_store: params.ledger_hash_store,
            runner_factory: params.runner_factory,
            cancel,
            closed: AtomicBool::new(false),
            state: Mutex::new(State::default()),
        })
    }

    /// Whether `close` was called or the parent token was canceled
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Lock the state for the single driving task
    fn acquire(&self) -> Result<MutexGuard<'_, State>> {
        if self.is_closed() {
            return Err(CaptiveCoreError::Closed);
        }
        self.state.try_lock().map_err(|_| {
            if self.is_closed() {
                CaptiveCoreError::Closed
            } else {
                CaptiveCoreError::ConcurrentAccess
            }
        })
    }

    /// Run a collaborator call, giving up when the backend is closed
    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CaptiveCoreError::Cancelled),
            output = fut => Ok(output),
        }
    }

    async fn latest_checkpoint_sequence(&self) -> Result<u32> {
        self.cancellable(self.archive.get_latest_checkpoint_sequence())
            .await?
            .map_err(|source| CaptiveCoreError::Archive {
                context: "error getting latest checkpoint sequence".to_string(),
                source,
            })
    }

    /// Create a runner and make it the current one
    fn create_runner<'a>(
        &self,
        state: &'a mut State,
        mode: RunnerMode,
    ) -> Result<&'a mut Box<dyn Runner>> {
        let runner = self
            .runner_factory
            .create(mode, self.cancel.child_token())
            .map_err(CaptiveCoreError::RunnerStart)?;
        Ok(state.runner.insert(runner))
    }

    async fn open_offline_replay(&self, state: &mut State, range: LedgerRange, to: u32) -> Result<()> {
        let from = range.from();
        if from < FIRST_REPLAYABLE_LEDGER {
            return Err(CaptiveCoreError::StartFromGenesis);
        }
        let latest = self.latest_checkpoint_sequence().await?;
        if from > latest {
            return Err(CaptiveCoreError::FromBeyondArchive { from, latest });
        }
        if to > latest {
            return Err(CaptiveCoreError::ToBeyondArchive { to, latest });
        }

        let runner = self.create_runner(state, RunnerMode::Offline)?;
        if let Err(e) = runner.catchup(from, to) {
            if let Err(close_err) = runner.close() {
                warn!(error = %close_err, "Failed to close node runner after start failure");
            }
            return Err(CaptiveCoreError::RunnerStart(e));
        }

        // The node replays from the start of the checkpoint containing `from`
        let next_ledger = self.checkpoints.first_replay_ledger(from);
        state.session = Some(Session::new(
            range,
            SessionMode::Bounded { last: to },
            next_ledger,
        ));
        info!(%range, first_streamed = next_ledger, "Started offline replay");
        Ok(())
    }

    async fn open_online_replay(&self, state: &mut State, range: LedgerRange) -> Result<()> {
        let from = range.from();
        let latest = self.latest_checkpoint_sequence().await?;

        // Root HAS updates can lag by up to a minute, so allow two checkpoints
        let max_ledger = latest.saturating_add(2 * self.checkpoints.frequency());
        if from > max_ledger {
            return Err(CaptiveCoreError::OnlineTooFar { from, latest });
        }

        let (run_from, hash) = self.run_from_params(from).await?;

        let runner = self.create_runner(state, RunnerMode::Online)?;
        if let Err(e) = runner.run_from(run_from, hash) {
            if let Err(close_err) = runner.close() {
                warn!(error = %close_err, "Failed to close node runner after start failure");
            }
            return Err(CaptiveCoreError::RunnerStart(e));
        }

        // next_ledger stays 0 until the first record: depending on its
        // version the node starts streaming at or before `from`
        state.session = Some(Session::new(range, SessionMode::Unbounded, 0));
        info!(%range, run_from, start_hash = %hash, "Started online replay");
        Ok(())
    }

    /// Ledger and hash to start live mode from so that `from` is the first
    /// ledger closed after the start point
    async fn run_from_params(&self, from: u32) -> Result<(u32, LedgerHash)> {
        if from == 1 {
            // The node refuses to start at the genesis ledger
            return Err(CaptiveCoreError::StartFromGenesis);
        }

        // Starting anywhere in ledgers 2..=63: start at 3, the node still
        // streams from ledger 2 and fast-forwards from there
        let from = if from <= LAST_EARLY_START_LEDGER { 3 } else { from };
        let run_from = from - 1;

        if let Some(store) = &self.ledger_hash_store {
            let stored = self
                .cancellable(store.get_ledger_hash(run_from))
                .await?
                .map_err(|source| CaptiveCoreError::HashStore {
                    sequence: run_from,
                    source,
                })?;
            if let Some(hash) = stored {
                debug!(run_from, "Using trusted ledger hash");
                return Ok((run_from, hash));
            }
        }

        let header = self
            .cancellable(self.archive.get_ledger_header(from))
            .await?
            .map_err(|source| CaptiveCoreError::Archive {
                context: format!("error trying to read ledger header {} from HAS", from),
                source,
            })?;
        Ok((run_from, header.previous_ledger_hash))
    }

    /// Returns true if `range` was already prepared
    async fn start_preparing_range(&self, range: LedgerRange) -> Result<bool> {
        let mut guard = self.acquire()?;
        let state = &mut *guard;

        if state.is_prepared(range) {
            return Ok(true);
        }

        if let Some(runner) = state.runner.as_mut() {
            runner.close().map_err(CaptiveCoreError::RunnerClose)?;
            // Never run two node processes at once
            if !runner.process_exit().has_exited() {
                return Err(CaptiveCoreError::PreviousSessionRunning);
            }
        }

        state.session = None;
        state.cached = None;

        match range.to() {
            Some(to) => self.open_offline_replay(state, range, to).await,
            None => self.open_online_replay(state, range).await,
        }?;
        Ok(false)
    }
}

#[async_trait]
impl LedgerBackend for CaptiveCoreBackend {
    /// Prepare `range` and fast-forward to its first ledger.
    ///
    /// A bounded range starts the node in catch-up mode; an unbounded range
    /// starts it in live mode. Preparing a range the current session can
    /// already serve is a no-op.
    async fn prepare_range(&self, range: LedgerRange) -> Result<()> {
        if self.start_preparing_range(range).await? {
            return Ok(());
        }

        self.get_ledger(range.from())
            .await
            .map_err(|e| CaptiveCoreError::FastForward {
                sequence: range.from(),
                source: Box::new(e),
            })?;
        Ok(())
    }

    async fn is_prepared(&self, range: LedgerRange) -> Result<bool> {
        let guard = self.acquire()?;
        Ok(guard.is_prepared(range))
    }

    /// Block until ledger `sequence` is available and return it.
    ///
    /// Requesting the last returned ledger again is served from cache. The
    /// final ledger of a bounded range closes the session.
    async fn get_ledger(&self, sequence: u32) -> Result<LedgerCloseMeta> {
        let mut guard = self.acquire()?;
        let state = &mut *guard;

        if let Some(cached) = state.cached.as_ref() {
            if cached.ledger_sequence() == sequence {
                return Ok(cached.clone());
            }
        }

        // An active session always has its runner
        let (session, runner) = match (state.session.as_mut(), state.runner.as_mut()) {
            (Some(session), Some(runner)) if session.active => (session, runner),
            _ => return Err(CaptiveCoreError::NotPrepared),
        };

        let expected = session.next_expected();
        if sequence < expected {
            return Err(CaptiveCoreError::BehindStream {
                requested: sequence,
                expected,
            });
        }
        if let Some(last) = session.last_ledger() {
            if sequence > last {
                return Err(CaptiveCoreError::PastBoundedRange {
                    requested: sequence,
                    last,
                });
            }
        }

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CaptiveCoreError::Cancelled),
                received = runner.meta_pipe().recv() => received,
            };
            if let Some(meta) =
                session.accept(&mut **runner, &mut state.cached, sequence, received)?
            {
                return Ok(meta);
            }
        }
    }

    /// Bounded sessions report their last ledger; live sessions report the
    /// newest ledger already buffered in the meta pipe.
    async fn get_latest_ledger_sequence(&self) -> Result<u32> {
        let mut guard = self.acquire()?;
        let state = &mut *guard;

        let (session, runner) = match (state.session.as_ref(), state.runner.as_mut()) {
            (Some(session), Some(runner)) => (session, runner),
            _ => return Err(CaptiveCoreError::NotPrepared),
        };

        match session.mode {
            SessionMode::Bounded { last } => Ok(last),
            SessionMode::Unbounded => {
                let buffered = u32::try_from(runner.meta_pipe().len()).unwrap_or(u32::MAX);
                Ok((session.next_expected() - 1).saturating_add(buffered))
            }
        }
    }

    /// Close the runner, release the hash store and make the backend unusable.
    async fn close(&self) -> Result<()> {
        let first_close = !self.closed.swap(true, Ordering::SeqCst);
        // Unblocks a pending get_ledger and cancels every runner context
        self.cancel.cancel();

        if first_close {
            info!("Closing captive core backend");
            if let Some(store) = &self.ledger_hash_store {
                if let Err(e) = store.close().await {
                    warn!(error = %e, "Failed to close ledger hash store");
                }
            }
        }

        let mut state = self.state.lock().await;
        if let Some(runner) = state.runner.as_mut() {
            runner.close().map_err(CaptiveCoreError::RunnerClose)?;
        }
        Ok(())
    }
}

impl Drop for CaptiveCoreBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
