//! OpenTelemetry Protocol (OTLP) support.
//!
//! Decoding flattens OTLP export requests into [`Record`](crate::models::Record)s,
//! stamping missing resource attributes and timestamps on the way in. Encoding
//! regroups a batch of records into the request shape expected by an OTLP
//! backend.
//!
//! The generated protobuf types come from the `opentelemetry-proto` crate and
//! are re-exported as [`proto`], with the same module layout the OTLP
//! definitions use (`proto::collector::trace::v1`, `proto::common::v1`, ...).

pub mod decode;
pub mod encode;
pub mod values;

pub use decode::{decode_logs, decode_metrics, decode_traces, Decoded};
pub use encode::{encode_batch, encode_logs, encode_metrics, encode_traces};

/// Generated OTLP protobuf types and gRPC services.
pub mod proto {
    pub use opentelemetry_proto::tonic::*;
}

/// Current time in nanoseconds since the Unix epoch.
pub(crate) fn now_unix_nano() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .unwrap_or_default()
}
