//! Error types shared by the pipeline and its receivers.

use crate::models::SignalKind;
use thiserror::Error;

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The memory limiter is refusing.
    MemoryLimit,
    /// The batcher queue has no room for the records.
    QueueFull,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryLimit => write!(f, "memory limit exceeded"),
            Self::QueueFull => write!(f, "queue is full"),
        }
    }
}

/// Errors returned to producers at admission time.
///
/// Nothing that happens after admission (export failures, retries) is ever
/// reported through this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The payload could not be decoded.
    #[error("malformed {kind} payload: {message}")]
    MalformedInput {
        /// Signal the payload was sent for.
        kind: SignalKind,
        /// Decoder message.
        message: String,
    },

    /// The pipeline refused the records; the caller should back off and retry.
    #[error("{kind} admission rejected: {reason}")]
    AdmissionRejected {
        /// Refusing pipeline.
        kind: SignalKind,
        /// Refusal cause.
        reason: RejectReason,
    },

    /// The pipeline no longer accepts records.
    #[error("{kind} pipeline is shutting down")]
    ShuttingDown {
        /// Pipeline that is shutting down.
        kind: SignalKind,
    },
}

/// Errors loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The document does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// No export backend is configured.
    #[error("no exporter backend configured (set exporter.backends or OTELGATE_EXPORTER_ENDPOINT)")]
    NoBackends,
}

/// Errors resolving memory limits to bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitResolveError {
    /// A percentage limit needs total system memory, which is unavailable.
    #[error("total system memory is unknown; use absolute byte limits")]
    TotalMemoryUnknown,

    /// The resolved soft limit is not below the hard limit.
    #[error("soft limit ({soft} bytes) must be below hard limit ({hard} bytes)")]
    SoftNotBelowHard {
        /// Resolved soft limit.
        soft: u64,
        /// Resolved hard limit.
        hard: u64,
    },
}
