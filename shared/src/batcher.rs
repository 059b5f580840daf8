//! Size- and time-bounded batching.
//!
//! Admitted records wait in a bounded FIFO queue. A single flush task per
//! pipeline cuts batches from the front of the queue when
//!
//! - the queue holds at least `max_export_batch_size` records,
//! - the oldest queued record has waited `schedule_delay`,
//! - a force-flush is requested, or
//! - the batcher shuts down,
//!
//! and hands them to the export workers through a bounded channel. Records
//! only leave the queue under its lock, so each record ends up in exactly one
//! batch.

use crate::config::{BatchConfig, QueueFullPolicy};
use crate::error::{PipelineError, RejectReason};
use crate::limiter::MemoryLimiter;
use crate::models::{Batch, FlushReason, Record, SignalKind};
use crate::stats::PipelineStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A record waiting in the queue, with its memory reservation.
#[derive(Debug)]
struct QueuedRecord {
    record: Record,
    size: usize,
    admitted_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<QueuedRecord>,
    closed: bool,
}

struct Shared {
    kind: SignalKind,
    config: BatchConfig,
    queue: Mutex<QueueState>,
    notify: Notify,
    limiter: Arc<MemoryLimiter>,
    stats: Arc<PipelineStats>,
    next_batch_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a full batch is waiting, and when the oldest record is due.
    fn poll(&self) -> (bool, Option<Instant>) {
        let state = self.lock();
        let full = state.records.len() >= self.config.max_export_batch_size;
        let deadline = state
            .records
            .front()
            .map(|q| q.admitted_at + self.config.schedule_delay);
        (full, deadline)
    }

    fn take_batch(&self, reason: FlushReason) -> Option<Batch> {
        let mut state = self.lock();
        if state.records.is_empty() {
            return None;
        }
        let count = state.records.len().min(self.config.max_export_batch_size);
        let mut size_bytes = 0;
        let records = state
            .records
            .drain(..count)
            .map(|queued| {
                size_bytes += queued.size;
                queued.record
            })
            .collect();
        drop(state);

        Some(Batch {
            id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
            kind: self.kind,
            records,
            size_bytes,
            reason,
        })
    }

    /// Cuts one batch and hands it to the exporters. Returns false if the
    /// queue was empty.
    async fn flush_one(&self, reason: FlushReason, batches: &mpsc::Sender<Batch>) -> bool {
        let Some(batch) = self.take_batch(reason) else {
            return false;
        };
        self.stats.record_flushed();
        tracing::debug!(
            signal = %self.kind,
            batch_id = batch.id,
            records = batch.len(),
            size_bytes = batch.size_bytes,
            %reason,
            "Batch flushed"
        );
        if let Err(mpsc::error::SendError(batch)) = batches.send(batch).await {
            tracing::warn!(
                signal = %self.kind,
                batch_id = batch.id,
                records = batch.len(),
                "Export workers stopped, dropping batch"
            );
            self.limiter.release(batch.size_bytes);
            self.stats.record_queue_dropped(batch.len());
        }
        true
    }

    async fn flush_all(&self, reason: FlushReason, batches: &mpsc::Sender<Batch>) {
        while self.flush_one(reason, batches).await {}
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run(
    shared: Arc<Shared>,
    mut flush_requests: mpsc::Receiver<oneshot::Sender<()>>,
    batches: mpsc::Sender<Batch>,
    cancel: CancellationToken,
) {
    loop {
        let (full, deadline) = shared.poll();
        if full {
            shared.flush_one(FlushReason::BatchFull, &batches).await;
            continue;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(ack) = flush_requests.recv() => {
                shared.flush_all(FlushReason::ForceFlush, &batches).await;
                let _ = ack.send(());
            }
            () = shared.notify.notified() => {}
            () = sleep_until(deadline) => {
                shared.flush_one(FlushReason::Timer, &batches).await;
            }
        }
    }

    shared.flush_all(FlushReason::Shutdown, &batches).await;
    tracing::debug!(signal = %shared.kind, "Batcher stopped");
}

/// Bounded queue plus the flush task that turns it into batches.
pub struct Batcher {
    shared: Arc<Shared>,
    flush_requests: mpsc::Sender<oneshot::Sender<()>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    /// Starts the flush task. Completed batches are sent to `batches`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start(
        kind: SignalKind,
        config: BatchConfig,
        limiter: Arc<MemoryLimiter>,
        stats: Arc<PipelineStats>,
        batches: mpsc::Sender<Batch>,
    ) -> Self {
        let shared = Arc::new(Shared {
            kind,
            config,
            queue: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter,
            stats,
            next_batch_id: AtomicU64::new(1),
        });
        let (flush_tx, flush_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&shared), flush_rx, batches, cancel.clone()));

        Self {
            shared,
            flush_requests: flush_tx,
            cancel,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Appends records with their memory reservations to the queue.
    ///
    /// With [`QueueFullPolicy::RejectNewest`] an overflowing call is refused
    /// as a whole and the caller keeps ownership of the reservation. With
    /// [`QueueFullPolicy::DropOldest`] the oldest records are dropped (and
    /// their reservations released) to make room. Dropped records are counted
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AdmissionRejected`] when the queue is full
    /// under `RejectNewest`, and [`PipelineError::ShuttingDown`] after
    /// shutdown began.
    pub fn push(&self, mut records: Vec<(Record, usize)>) -> Result<(), PipelineError> {
        let incoming = records.len();
        if incoming == 0 {
            return Ok(());
        }
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.closed {
            return Err(PipelineError::ShuttingDown { kind: shared.kind });
        }

        let overflow = (state.records.len() + incoming).saturating_sub(shared.config.max_queue_size);
        if overflow > 0 {
            match shared.config.queue_full_policy {
                QueueFullPolicy::RejectNewest => {
                    drop(state);
                    shared.stats.record_queue_dropped(incoming);
                    tracing::warn!(
                        signal = %shared.kind,
                        records = incoming,
                        max_queue_size = shared.config.max_queue_size,
                        "Queue full, rejecting records"
                    );
                    return Err(PipelineError::AdmissionRejected {
                        kind: shared.kind,
                        reason: RejectReason::QueueFull,
                    });
                }
                QueueFullPolicy::DropOldest => {
                    let from_queue = overflow.min(state.records.len());
                    let mut released: usize = state.records.drain(..from_queue).map(|q| q.size).sum();
                    released += records
                        .drain(..overflow - from_queue)
                        .map(|(_, size)| size)
                        .sum::<usize>();
                    shared.limiter.release(released);
                    shared.stats.record_queue_dropped(overflow);
                    tracing::warn!(
                        signal = %shared.kind,
                        dropped = overflow,
                        "Queue full, dropped oldest records"
                    );
                }
            }
        }

        let now = Instant::now();
        let was_empty = state.records.is_empty();
        state
            .records
            .extend(records.into_iter().map(|(record, size)| QueuedRecord {
                record,
                size,
                admitted_at: now,
            }));
        let full = state.records.len() >= shared.config.max_export_batch_size;
        drop(state);

        if was_empty || full {
            shared.notify.notify_one();
        }
        Ok(())
    }

    /// Number of queued records.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.lock().records.len()
    }

    /// Flushes everything queued and waits until the batches are handed to
    /// the exporters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShuttingDown`] if the flush task has stopped.
    pub async fn force_flush(&self) -> Result<(), PipelineError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let stopped = || PipelineError::ShuttingDown {
            kind: self.shared.kind,
        };
        self.flush_requests.send(ack_tx).await.map_err(|_| stopped())?;
        ack_rx.await.map_err(|_| stopped())
    }

    /// Stops accepting records, flushes the queue and waits for the flush
    /// task to exit. The batch channel closes when this returns.
    pub async fn shutdown(&self) {
        self.shared.lock().closed = true;
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(signal = %self.shared.kind, error = %e, "Batcher task failed");
            }
        }
    }
}
