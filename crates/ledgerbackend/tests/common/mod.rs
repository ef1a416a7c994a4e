//! Test doubles for the captive backend: a scripted node runner and a
//! history archive serving a synthetic hash chain.

#![allow(dead_code)]

use async_trait::async_trait;
use ledgersync_core::{LedgerCloseMeta, LedgerHash, LedgerHeader};
use ledgersync_ledgerbackend::{
    ArchiveError, CaptiveCoreBackend, CaptiveCoreParams, HashStoreError, HistoryArchive,
    MetaResult, Runner, RunnerError, RunnerExit, RunnerFactory, RunnerMode, TrustedLedgerHashStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deterministic hash of ledger `sequence` in the synthetic chain
pub fn hash_of(sequence: u32) -> LedgerHash {
    let mut bytes = [0xaa; 32];
    bytes[..4].copy_from_slice(&sequence.to_be_bytes());
    LedgerHash(bytes)
}

/// Ledger `sequence` correctly linked to its predecessor
pub fn ledger(sequence: u32) -> LedgerCloseMeta {
    LedgerCloseMeta {
        sequence,
        hash: hash_of(sequence),
        previous_hash: hash_of(sequence - 1),
        payload: format!("ledger-{}", sequence).into_bytes(),
    }
}

/// Correctly chained ledgers `[from, to]`
pub fn chain(from: u32, to: u32) -> Vec<MetaResult> {
    (from..=to).map(|seq| Ok(ledger(seq))).collect()
}

/// What one runner emits once started
#[derive(Clone)]
pub struct Script {
    pub records: Vec<MetaResult>,
    /// Close the meta pipe after the records, reporting `exit`
    pub close_pipe: bool,
    pub exit: RunnerExit,
    /// Fail `catchup`/`run_from` with this error
    pub start_error: Option<RunnerError>,
    /// Process keeps running even after `close`
    pub ignore_close: bool,
}

impl Script {
    pub fn records(records: Vec<MetaResult>) -> Self {
        Self {
            records,
            close_pipe: false,
            exit: RunnerExit::Running,
            start_error: None,
            ignore_close: false,
        }
    }

    pub fn then_exit(mut self, exit: RunnerExit) -> Self {
        self.close_pipe = true;
        self.exit = exit;
        self
    }

    pub fn failing_start(error: RunnerError) -> Self {
        let mut script = Self::records(Vec::new());
        script.start_error = Some(error);
        script
    }

    pub fn ignoring_close(mut self) -> Self {
        self.ignore_close = true;
        self
    }
}

/// Calls observed across all runners
#[derive(Debug, Default, Clone)]
pub struct RunnerLog {
    pub created: Vec<RunnerMode>,
    pub catchups: Vec<(u32, u32)>,
    pub run_froms: Vec<(u32, LedgerHash)>,
    pub closes: usize,
}

/// Hands out scripted runners in order
#[derive(Default)]
pub struct FakeRunnerFactory {
    scripts: Mutex<VecDeque<Script>>,
    log: Arc<Mutex<RunnerLog>>,
    senders: Arc<Mutex<Vec<mpsc::Sender<MetaResult>>>>,
}

impl FakeRunnerFactory {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    pub fn log(&self) -> RunnerLog {
        self.log.lock().unwrap().clone()
    }

    /// Emit another record on the most recent runner's pipe
    pub async fn push(&self, result: MetaResult) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no running runner");
        sender.send(result).await.expect("meta pipe closed");
    }
}

impl RunnerFactory for FakeRunnerFactory {
    fn create(
        &self,
        mode: RunnerMode,
        cancel: CancellationToken,
    ) -> Result<Box<dyn Runner>, RunnerError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("runner created without a script");
        self.log.lock().unwrap().created.push(mode);

        let (tx, rx) = mpsc::channel(script.records.len() + 16);
        Ok(Box::new(FakeRunner {
            script,
            tx: Some(tx),
            rx,
            cancel,
            exit: RunnerExit::Running,
            log: Arc::clone(&self.log),
            senders: Arc::clone(&self.senders),
        }))
    }
}

pub struct FakeRunner {
    script: Script,
    tx: Option<mpsc::Sender<MetaResult>>,
    rx: mpsc::Receiver<MetaResult>,
    cancel: CancellationToken,
    exit: RunnerExit,
    log: Arc<Mutex<RunnerLog>>,
    senders: Arc<Mutex<Vec<mpsc::Sender<MetaResult>>>>,
}

impl FakeRunner {
    fn start(&mut self) -> Result<(), RunnerError> {
        if let Some(e) = self.script.start_error.clone() {
            return Err(e);
        }
        let tx = self.tx.take().expect("runner started twice");
        for record in self.script.records.drain(..) {
            tx.try_send(record).expect("script larger than pipe");
        }
        if self.script.close_pipe {
            self.exit = self.script.exit.clone();
        } else {
            self.senders.lock().unwrap().push(tx);
        }
        Ok(())
    }
}

impl Runner for FakeRunner {
    fn catchup(&mut self, from: u32, to: u32) -> Result<(), RunnerError> {
        self.log.lock().unwrap().catchups.push((from, to));
        self.start()
    }

    fn run_from(&mut self, from: u32, hash: LedgerHash) -> Result<(), RunnerError> {
        self.log.lock().unwrap().run_froms.push((from, hash));
        self.start()
    }

    fn meta_pipe(&mut self) -> &mut mpsc::Receiver<MetaResult> {
        &mut self.rx
    }

    fn process_exit(&self) -> RunnerExit {
        self.exit.clone()
    }

    fn context(&self) -> &CancellationToken {
        &self.cancel
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.log.lock().unwrap().closes += 1;
        if self.script.ignore_close {
            return Ok(());
        }
        self.cancel.cancel();
        self.tx = None;
        if !self.exit.has_exited() {
            self.exit = RunnerExit::Exited;
        }
        Ok(())
    }
}

/// Archive publishing checkpoints up to `latest`
pub struct FakeArchive {
    pub latest: Option<u32>,
    pub header_calls: AtomicUsize,
    /// Header lookups never complete
    pub stall_headers: bool,
}

impl FakeArchive {
    pub fn new(latest: u32) -> Arc<Self> {
        Arc::new(Self {
            latest: Some(latest),
            header_calls: AtomicUsize::new(0),
            stall_headers: false,
        })
    }

    pub fn stalling_headers(latest: u32) -> Arc<Self> {
        Arc::new(Self {
            latest: Some(latest),
            header_calls: AtomicUsize::new(0),
            stall_headers: true,
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            latest: None,
            header_calls: AtomicUsize::new(0),
            stall_headers: false,
        })
    }

    pub fn header_calls(&self) -> usize {
        self.header_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryArchive for FakeArchive {
    async fn get_latest_checkpoint_sequence(&self) -> Result<u32, ArchiveError> {
        self.latest
            .ok_or_else(|| ArchiveError::Unreachable("connection refused".to_string()))
    }

    async fn get_ledger_header(&self, sequence: u32) -> Result<LedgerHeader, ArchiveError> {
        self.header_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_headers {
            std::future::pending::<()>().await;
        }
        Ok(LedgerHeader {
            sequence,
            previous_ledger_hash: hash_of(sequence - 1),
            bucket_list_hash: LedgerHash::ZERO,
        })
    }

    async fn get_bucket_list_hash(&self, _sequence: u32) -> Result<LedgerHash, ArchiveError> {
        Ok(LedgerHash::ZERO)
    }
}

/// Hash store whose lookups never complete
#[derive(Default)]
pub struct StallingHashStore {
    pub closed: AtomicBool,
}

#[async_trait]
impl TrustedLedgerHashStore for StallingHashStore {
    async fn get_ledger_hash(&self, _sequence: u32) -> Result<Option<LedgerHash>, HashStoreError> {
        std::future::pending::<()>().await;
        Ok(None)
    }

    async fn close(&self) -> Result<(), HashStoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Route backend logs to the test harness; set RUST_LOG to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backend over a fake archive with the given runner scripts
pub async fn backend_with(
    archive: Arc<FakeArchive>,
    factory: Arc<FakeRunnerFactory>,
    store: Option<Arc<dyn TrustedLedgerHashStore>>,
) -> CaptiveCoreBackend {
    init_tracing();
    let mut params = CaptiveCoreParams::new(archive, factory);
    if let Some(store) = store {
        params = params.with_ledger_hash_store(store);
    }
    CaptiveCoreBackend::new(params)
        .await
        .expect("backend construction")
}
