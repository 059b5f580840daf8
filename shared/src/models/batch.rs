//! Export batches.

use super::{Record, SignalKind};
use serde::Serialize;

/// Why the batcher cut a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// The queue reached `max_export_batch_size`.
    BatchFull,
    /// The oldest queued record waited `schedule_delay`.
    Timer,
    /// An explicit force-flush request.
    ForceFlush,
    /// The pipeline is shutting down.
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchFull => write!(f, "batch_full"),
            Self::Timer => write!(f, "timer"),
            Self::ForceFlush => write!(f, "force_flush"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A bounded group of records handed to the exporter as one unit.
///
/// Created by the batcher with `1..=max_export_batch_size` records and owned
/// by exactly one export worker afterwards.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Per-pipeline sequence number.
    pub id: u64,
    /// Signal kind of every record in the batch.
    pub kind: SignalKind,
    /// The records, in admission order.
    pub records: Vec<Record>,
    /// Sum of the memory reservations of the records.
    pub size_bytes: usize,
    /// Trigger that produced the batch.
    pub reason: FlushReason,
}

impl Batch {
    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
