//! OTLP gRPC receiver services.
//!
//! Implements OpenTelemetry Protocol gRPC services for ingesting logs, metrics, and traces.
//! These services follow the OTLP specification and work with standard OpenTelemetry SDK exporters.
//!
//! # Services
//!
//! - `LogsService` - Receives logs via gRPC
//! - `MetricsService` - Receives metrics via gRPC
//! - `TraceService` - Receives traces via gRPC
//!
//! [`MalformedRequestLayer`] wraps the gRPC server so that undecodable
//! requests are answered with `INVALID_ARGUMENT` and counted.

mod malformed;
mod services;

pub use malformed::{MalformedRequestLayer, MalformedRequests};

pub(crate) use services::{logs_response, metrics_response, trace_response};
pub use services::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
