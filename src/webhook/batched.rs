//! Batching Webhook Notifier
//!
//! Mutations are coalesced per path into a pending batch and mirrored as one
//! `POST {base_url}` carrying a JSON array of records.
//!
//! ## Architecture
//!
//! ```text
//! Writer 1 ──┐                  ┌─► Enqueued ──► FlushWorker (idle deadline) ──┐
//! Writer 2 ──┤──► PendingBatch ─┤                                               ├─► drain ──► send task ──► POST batch
//! Writer 3 ──┘    (mutex, O(1)) └─► size limit reached (drained by the writer) ─┘
//! ```
//!
//! Writers only touch the store and the pending batch. The writer whose
//! mutation pushes the estimate to the size limit drains the batch on the
//! spot and hands it to a background send, so the limit holds even while
//! earlier batches are still in flight against a slow endpoint. Idle and
//! explicit flushes drain the same way; every batch request runs as its own
//! tracked task. Batches from different drains are not ordered relative to
//! each other.
//!
//! A failed flush is logged and its records are dropped. The store already
//! holds the committed state, so only the mirror notification is lost;
//! re-merging failed records could overwrite newer pending state for the
//! same path.

use crate::store::{Contents, FileStore, StoreError};
use crate::webhook::config::WebhookConfig;
use crate::webhook::error::WebhookError;
use crate::webhook::record::MutationRecord;
use crate::webhook::transport::WebhookTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

// ============================================================================
// PendingBatch
// ============================================================================

/// Coalesced records awaiting the next flush
///
/// Holds at most one record per path. Replacing a path keeps the position of
/// its first pending record.
#[derive(Debug, Default)]
pub struct PendingBatch {
    records: Vec<MutationRecord>,
    index: HashMap<String, usize>,
    size_bytes: usize,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `record.path`. Returns the new size estimate.
    pub fn upsert(&mut self, record: MutationRecord) -> usize {
        let size = record.estimated_size();
        match self.index.get(&record.path) {
            Some(&pos) => {
                let replaced = std::mem::replace(&mut self.records[pos], record);
                self.size_bytes = self.size_bytes - replaced.estimated_size() + size;
            }
            None => {
                self.index.insert(record.path.clone(), self.records.len());
                self.records.push(record);
                self.size_bytes += size;
            }
        }
        self.size_bytes
    }

    /// Drain every record in insertion order, leaving the batch empty
    pub fn take(&mut self) -> Vec<MutationRecord> {
        self.index.clear();
        self.size_bytes = 0;
        std::mem::take(&mut self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Explicit `flush()` call
    Manual,
    /// Pending size reached the configured limit
    SizeLimit,
    /// No mutation for one batch timeout
    Idle,
    /// Worker stopping
    Shutdown,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlushTrigger::Manual => "manual",
            FlushTrigger::SizeLimit => "size limit",
            FlushTrigger::Idle => "idle timeout",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Batch counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Batch requests acknowledged by the endpoint
    pub flushes: u64,
    /// Records carried by acknowledged batches
    pub records_sent: u64,
    /// Batch requests that failed
    pub failed_flushes: u64,
    /// Records carried by failed batches
    pub records_dropped: u64,
    /// Flushes started by the size limit
    pub size_triggered: u64,
    /// Flushes started by the idle timer
    pub idle_triggered: u64,
}

#[derive(Debug, Default)]
struct BatchCounters {
    flushes: AtomicU64,
    records_sent: AtomicU64,
    failed_flushes: AtomicU64,
    records_dropped: AtomicU64,
    size_triggered: AtomicU64,
    idle_triggered: AtomicU64,
}

struct BatchShared<T: WebhookTransport> {
    pending: Mutex<PendingBatch>,
    transport: T,
    url: String,
    runtime: Handle,
    /// Batch requests in flight
    sends: TaskTracker,
    /// Serializes `wait_idle` callers around close/reopen
    idle_lock: tokio::sync::Mutex<()>,
    counters: BatchCounters,
}

impl<T: WebhookTransport> BatchShared<T> {
    /// Take every pending record, or `None` when there is nothing to send
    fn drain(&self, trigger: FlushTrigger) -> Option<Vec<MutationRecord>> {
        let records = self.pending.lock().take();
        if records.is_empty() {
            return None;
        }
        self.count_trigger(trigger);
        Some(records)
    }

    fn count_trigger(&self, trigger: FlushTrigger) {
        match trigger {
            FlushTrigger::SizeLimit => {
                self.counters.size_triggered.fetch_add(1, Ordering::Relaxed);
            }
            FlushTrigger::Idle => {
                self.counters.idle_triggered.fetch_add(1, Ordering::Relaxed);
            }
            FlushTrigger::Manual | FlushTrigger::Shutdown => {}
        }
    }

    /// Send a drained batch from its own task
    fn spawn_send(self: &Arc<Self>, records: Vec<MutationRecord>, trigger: FlushTrigger) {
        let shared = Arc::clone(self);
        self.sends
            .spawn_on(async move { shared.send(records, trigger).await }, &self.runtime);
    }

    async fn send(&self, records: Vec<MutationRecord>, trigger: FlushTrigger) {
        let count = records.len() as u64;
        match self.transport.post_batch(&self.url, &records).await {
            Ok(()) => {
                debug!("Webhook batch of {} record(s) sent ({})", count, trigger);
                self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                self.counters.records_sent.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    "Webhook batch of {} record(s) to {} failed ({}): {}",
                    count, self.url, trigger, e
                );
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.counters.records_dropped.fetch_add(count, Ordering::Relaxed);
            }
        }
    }

    /// Drain and send pending records, then wait for every batch request
    /// started so far
    async fn flush(self: &Arc<Self>, trigger: FlushTrigger) {
        if let Some(records) = self.drain(trigger) {
            self.spawn_send(records, trigger);
        }
        self.wait_idle().await;
    }

    async fn wait_idle(&self) {
        let _waiting = self.idle_lock.lock().await;
        self.sends.close();
        self.sends.wait().await;
        self.sends.reopen();
    }
}

// ============================================================================
// FlushWorker
// ============================================================================

/// Messages for the flush worker
enum BatchSignal {
    /// A record was added; rearm the idle deadline
    Enqueued,
    /// Final flush, then stop
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Background task owning the single idle deadline
struct FlushWorker<T: WebhookTransport> {
    shared: Arc<BatchShared<T>>,
    rx: mpsc::UnboundedReceiver<BatchSignal>,
    timeout: Duration,
}

impl<T: WebhookTransport> FlushWorker<T> {
    async fn run(mut self) {
        let mut deadline: Option<Instant> = None;
        loop {
            let signal = match deadline {
                Some(at) => {
                    tokio::select! {
                        signal = self.rx.recv() => signal,
                        _ = tokio::time::sleep_until(at) => {
                            deadline = None;
                            if let Some(records) = self.shared.drain(FlushTrigger::Idle) {
                                self.shared.spawn_send(records, FlushTrigger::Idle);
                            }
                            continue;
                        }
                    }
                }
                None => self.rx.recv().await,
            };

            match signal {
                Some(BatchSignal::Enqueued) => {
                    deadline = Some(Instant::now() + self.timeout);
                }
                Some(BatchSignal::Shutdown { response_tx }) => {
                    self.shared.flush(FlushTrigger::Shutdown).await;
                    info!("Webhook flush worker shutting down");
                    let _ = response_tx.send(());
                    break;
                }
                None => {
                    // Notifier dropped: best-effort final flush
                    self.shared.flush(FlushTrigger::Shutdown).await;
                    info!("Webhook flush worker stopped (notifier dropped)");
                    break;
                }
            }
        }
    }
}

// ============================================================================
// BatchedWebHookFileStore
// ============================================================================

/// File store that mirrors coalesced mutations in batches
pub struct BatchedWebHookFileStore<S: FileStore, T: WebhookTransport> {
    store: S,
    shared: Arc<BatchShared<T>>,
    tx: mpsc::UnboundedSender<BatchSignal>,
    config: WebhookConfig,
}

impl<S: FileStore, T: WebhookTransport> BatchedWebHookFileStore<S, T> {
    /// Create a notifier whose flush worker runs on the current tokio runtime
    pub fn new(store: S, transport: T, config: WebhookConfig) -> Result<Self, WebhookError> {
        let runtime = Handle::try_current().map_err(|_| WebhookError::NoRuntime)?;
        Self::with_handle(store, transport, config, runtime)
    }

    /// Create a notifier whose flush worker runs on `runtime`
    pub fn with_handle(
        store: S,
        transport: T,
        config: WebhookConfig,
        runtime: Handle,
    ) -> Result<Self, WebhookError> {
        config.validate()?;

        let shared = Arc::new(BatchShared {
            pending: Mutex::new(PendingBatch::new()),
            transport,
            url: config.base_url.clone(),
            runtime: runtime.clone(),
            sends: TaskTracker::new(),
            idle_lock: tokio::sync::Mutex::new(()),
            counters: BatchCounters::default(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = FlushWorker {
            shared: Arc::clone(&shared),
            rx,
            timeout: config.batch.timeout,
        };
        runtime.spawn(worker.run());

        Ok(BatchedWebHookFileStore {
            store,
            shared,
            tx,
            config,
        })
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Send every pending record now.
    ///
    /// Pending records are drained atomically; mutations made meanwhile go to
    /// the next batch. An empty batch sends nothing. Returns once this batch
    /// and every batch request started before it have completed.
    pub async fn flush(&self) {
        self.shared.flush(FlushTrigger::Manual).await;
    }

    /// Wait for in-flight batch requests without draining
    pub async fn wait_idle(&self) {
        self.shared.wait_idle().await;
    }

    /// Flush pending records and stop the background worker.
    ///
    /// Later mutations are no longer sent on idle; they go out when the size
    /// limit is reached or on an explicit `flush()`.
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(BatchSignal::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        } else {
            self.flush().await;
        }
    }

    /// Number of records awaiting the next flush
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Estimated serialized size of the pending batch
    pub fn pending_size(&self) -> usize {
        self.shared.pending.lock().size_bytes()
    }

    pub fn stats(&self) -> BatchStats {
        let c = &self.shared.counters;
        BatchStats {
            flushes: c.flushes.load(Ordering::Relaxed),
            records_sent: c.records_sent.load(Ordering::Relaxed),
            failed_flushes: c.failed_flushes.load(Ordering::Relaxed),
            records_dropped: c.records_dropped.load(Ordering::Relaxed),
            size_triggered: c.size_triggered.load(Ordering::Relaxed),
            idle_triggered: c.idle_triggered.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self, record: MutationRecord) {
        let limit = self.config.batch.size_limit_bytes;
        let full = {
            let mut pending = self.shared.pending.lock();
            let size = pending.upsert(record);
            (size >= limit).then(|| (size, pending.take()))
        };

        match full {
            Some((size, records)) => {
                debug!("Webhook batch size {} reached limit {}", size, limit);
                self.shared.count_trigger(FlushTrigger::SizeLimit);
                self.shared.spawn_send(records, FlushTrigger::SizeLimit);
            }
            None => {
                // Fails only after shutdown; records then wait for the size
                // limit or an explicit flush()
                let _ = self.tx.send(BatchSignal::Enqueued);
            }
        }
    }
}

#[cfg(feature = "http")]
impl<S: FileStore> BatchedWebHookFileStore<S, crate::webhook::transport::ReqwestTransport> {
    /// Create a notifier sending over HTTP with the configured request timeout
    pub fn connect(store: S, config: WebhookConfig) -> Result<Self, WebhookError> {
        let transport = crate::webhook::transport::ReqwestTransport::new(config.request_timeout)?;
        Self::new(store, transport, config)
    }
}

impl<S: FileStore, T: WebhookTransport> FileStore for BatchedWebHookFileStore<S, T> {
    fn write(&self, path: &str, contents: Contents) -> Result<(), StoreError> {
        // Encode before touching the store so the record is built outside any lock
        let record = MutationRecord::put(path, &contents);
        self.store.write(path, contents)?;
        self.enqueue(record);
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Contents, StoreError> {
        self.store.read(path)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.store.list(prefix)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.store.delete(path)?;
        self.enqueue(MutationRecord::delete(path));
        Ok(())
    }
}
