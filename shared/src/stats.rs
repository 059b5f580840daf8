//! Per-pipeline counters and snapshots.
//!
//! Every drop and failure in a pipeline is counted here so loss is visible to
//! operators even though producers never hear about it.

use crate::auth::AuthStatus;
use crate::limiter::LimiterState;
use crate::models::SignalKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Monotonic counters of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received_records: AtomicU64,
    admitted_records: AtomicU64,
    malformed_requests: AtomicU64,
    rejected_records: AtomicU64,
    queue_dropped_records: AtomicU64,
    batches_flushed: AtomicU64,
    batches_exported: AtomicU64,
    records_exported: AtomicU64,
    export_retries: AtomicU64,
    permanent_failures: AtomicU64,
    non_retryable_failures: AtomicU64,
    records_failed: AtomicU64,
    last_export_success: Mutex<Option<DateTime<Utc>>>,
    last_export_failure: Mutex<Option<DateTime<Utc>>>,
}

fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(n as u64, Ordering::Relaxed);
}

impl PipelineStats {
    /// Records decoded from a request and offered for admission.
    pub fn record_received(&self, records: usize) {
        add(&self.received_records, records);
    }

    /// Records accepted into the queue.
    pub fn record_admitted(&self, records: usize) {
        add(&self.admitted_records, records);
    }

    /// Items dropped at decode time (partial success).
    pub fn record_rejected(&self, records: usize) {
        add(&self.rejected_records, records);
    }

    /// A request that could not be decoded at all.
    pub fn record_malformed(&self) {
        add(&self.malformed_requests, 1);
    }

    /// Records dropped because the queue was full.
    pub fn record_queue_dropped(&self, records: usize) {
        add(&self.queue_dropped_records, records);
    }

    /// A batch handed to the export workers.
    pub fn record_flushed(&self) {
        add(&self.batches_flushed, 1);
    }

    /// A retry scheduled after a transient failure.
    pub fn record_retry(&self) {
        add(&self.export_retries, 1);
    }

    /// A batch delivered to one backend.
    pub fn record_export_success(&self, records: usize) {
        add(&self.batches_exported, 1);
        add(&self.records_exported, records);
        *self
            .last_export_success
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// A batch given up on after exhausting retries.
    pub fn record_permanent_failure(&self, records: usize) {
        add(&self.permanent_failures, 1);
        self.record_failed(records);
    }

    /// A batch dropped after a non-retryable response.
    pub fn record_non_retryable_failure(&self, records: usize) {
        add(&self.non_retryable_failures, 1);
        self.record_failed(records);
    }

    fn record_failed(&self, records: usize) {
        add(&self.records_failed, records);
        *self
            .last_export_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// Batches successfully delivered, counted per backend.
    #[must_use]
    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    /// Batches handed to the exporter.
    #[must_use]
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    /// Records dropped because the queue was full.
    #[must_use]
    pub fn queue_dropped_records(&self) -> u64 {
        self.queue_dropped_records.load(Ordering::Relaxed)
    }

    /// Malformed requests.
    #[must_use]
    pub fn malformed_requests(&self) -> u64 {
        self.malformed_requests.load(Ordering::Relaxed)
    }

    /// Batches that became permanent failures.
    #[must_use]
    pub fn permanent_failures(&self) -> u64 {
        self.permanent_failures.load(Ordering::Relaxed)
    }

    /// Batches dropped as non-retryable.
    #[must_use]
    pub fn non_retryable_failures(&self) -> u64 {
        self.non_retryable_failures.load(Ordering::Relaxed)
    }

    /// Retries scheduled.
    #[must_use]
    pub fn export_retries(&self) -> u64 {
        self.export_retries.load(Ordering::Relaxed)
    }

    /// Builds a snapshot combining these counters with live gauges.
    #[must_use]
    pub fn snapshot(&self, gauges: PipelineGauges) -> PipelineSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineSnapshot {
            signal: gauges.signal,
            queue_depth: gauges.queue_depth,
            memory_usage_bytes: gauges.memory_usage_bytes,
            limiter_state: gauges.limiter_state,
            rejected_admissions: gauges.rejected_admissions,
            refused_records: gauges.refused_records,
            received_records: load(&self.received_records),
            admitted_records: load(&self.admitted_records),
            rejected_records: load(&self.rejected_records),
            malformed_requests: load(&self.malformed_requests),
            queue_dropped_records: load(&self.queue_dropped_records),
            batches_flushed: load(&self.batches_flushed),
            batches_exported: load(&self.batches_exported),
            records_exported: load(&self.records_exported),
            export_retries: load(&self.export_retries),
            permanent_failures: load(&self.permanent_failures),
            non_retryable_failures: load(&self.non_retryable_failures),
            records_failed: load(&self.records_failed),
            last_export_success: *self
                .last_export_success
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            last_export_failure: *self
                .last_export_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Live values read from the limiter and batcher when a snapshot is taken.
#[derive(Debug, Clone, Copy)]
pub struct PipelineGauges {
    /// Pipeline signal.
    pub signal: SignalKind,
    /// Records waiting in the batcher queue.
    pub queue_depth: usize,
    /// Bytes reserved in the memory limiter.
    pub memory_usage_bytes: usize,
    /// Memory limiter state.
    pub limiter_state: LimiterState,
    /// Admission calls refused by the limiter.
    pub rejected_admissions: u64,
    /// Records in refused admission calls.
    pub refused_records: u64,
}

/// Point-in-time view of one pipeline.
#[derive(Debug, Clone, Serialize)]
#[allow(missing_docs)]
pub struct PipelineSnapshot {
    pub signal: SignalKind,
    pub queue_depth: usize,
    pub memory_usage_bytes: usize,
    pub limiter_state: LimiterState,
    pub rejected_admissions: u64,
    pub refused_records: u64,
    pub received_records: u64,
    pub admitted_records: u64,
    pub rejected_records: u64,
    pub malformed_requests: u64,
    pub queue_dropped_records: u64,
    pub batches_flushed: u64,
    pub batches_exported: u64,
    pub records_exported: u64,
    pub export_retries: u64,
    pub permanent_failures: u64,
    pub non_retryable_failures: u64,
    pub records_failed: u64,
    pub last_export_success: Option<DateTime<Utc>>,
    pub last_export_failure: Option<DateTime<Utc>>,
}

/// Point-in-time view of the whole collector.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorSnapshot {
    /// Traces pipeline.
    pub traces: PipelineSnapshot,
    /// Metrics pipeline.
    pub metrics: PipelineSnapshot,
    /// Logs pipeline.
    pub logs: PipelineSnapshot,
    /// Credential state, when authentication is configured.
    pub credential: Option<AuthStatus>,
}

impl CollectorSnapshot {
    /// True if any pipeline's limiter is refusing admissions.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        [&self.traces, &self.metrics, &self.logs]
            .iter()
            .any(|p| p.limiter_state == LimiterState::Refusing)
    }
}
