//! Durable call-log sink and the background submission queue
//!
//! What this module provides
//! - The produced capability of the gateway: one async insert per
//!   [`CallRecord`], decoupled from the caller's latency and failure domain
//!
//! Exports
//! - Traits
//!   - `CallLogSink`: `insert_call_log(record)`
//! - Services
//!   - `spawn_log_worker(sink, capacity) -> LogHandle`: bounded queue plus a
//!     worker task draining into the sink
//! - Utils
//!   - `MemorySink` (tests, live diagnostics) and `NullSink`
//!
//! Implementation strategy
//! - Submission is `try_send` on a bounded `mpsc`: it never blocks and never
//!   fails the caller. A full queue drops the record and counts the drop; a
//!   sink error is warned and counted. Both counters are readable from the
//!   handle, so the fire-and-forget path stays observable
//! - `flush()` enqueues a marker and awaits its acknowledgement; the worker
//!   processes operations in order, so the ack means every earlier insert
//!   has been handed to the sink
//!
//! Testing strategy
//! - A memory sink asserts delivered records; a failing sink asserts error
//!   containment; a never-completing sink backs the queue up to assert drops

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tower::BoxError;
use tracing::warn;

use crate::record::CallRecord;

/// Default capacity of the submission queue.
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 256;

/// A durable, append-only store of call records.
///
/// Inserts from concurrent scopes are independent and order-insensitive; the
/// store needs no scope-level coordination.
#[async_trait]
pub trait CallLogSink: Send + Sync + 'static {
    async fn insert_call_log(&self, record: CallRecord) -> Result<(), BoxError>;
}

/// In-memory sink for tests and live diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CallLogSink for MemorySink {
    async fn insert_call_log(&self, record: CallRecord) -> Result<(), BoxError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl CallLogSink for NullSink {
    async fn insert_call_log(&self, _record: CallRecord) -> Result<(), BoxError> {
        Ok(())
    }
}

enum LogOp {
    Insert(CallRecord),
    Flush(oneshot::Sender<()>),
}

/// Cloneable, non-blocking submission side of the log queue.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: mpsc::Sender<LogOp>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl LogHandle {
    /// Hands a record to the background worker without waiting.
    ///
    /// Never blocks and never surfaces an error: a full or closed queue
    /// drops the record, counts it, and warns on the diagnostic channel.
    pub fn submit(&self, record: CallRecord) {
        if let Err(e) = self.tx.try_send(LogOp::Insert(record)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker gone",
            };
            warn!(reason, "call log record dropped");
        }
    }

    /// Waits until every previously submitted record has been handed to the
    /// sink. Shutdown and test aid; the hot path never calls this.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(LogOp::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Records dropped because the queue was full or the worker gone.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Inserts the sink itself rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Starts the background worker draining a bounded queue into `sink`.
pub fn spawn_log_worker(sink: Arc<dyn CallLogSink>, capacity: usize) -> LogHandle {
    let (tx, mut rx) = mpsc::channel::<LogOp>(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let worker_failed = failed.clone();
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                LogOp::Insert(record) => {
                    let call_id = record.id.clone();
                    if let Err(e) = sink.insert_call_log(record).await {
                        worker_failed.fetch_add(1, Ordering::Relaxed);
                        warn!(call_id = %call_id, error = %e, "call log insert failed");
                    }
                }
                LogOp::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    });

    LogHandle {
        tx,
        dropped,
        failed,
    }
}
