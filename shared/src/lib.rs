//! Otelgate Shared Library
//!
//! The telemetry pipeline behind the otelgate server: decoding OTLP export
//! requests into records, admission control, attribute processing, batching,
//! authentication and export to OTLP/HTTP backends.
//!
//! # Modules
//!
//! - [`models`] - Records, attributes, batches and signal kinds
//! - [`otlp`] - Conversion between OTLP requests and records
//! - [`config`] - Collector configuration schema
//! - [`resource`] - Process resource defaults
//! - [`limiter`] - Memory-based admission control
//! - [`processor`] - Attribute actions
//! - [`batcher`] - Size- and time-bounded batching
//! - [`auth`] - OAuth2 client-credentials tokens
//! - [`exporter`] - Export with retry and backoff
//! - [`pipeline`] - Per-signal pipelines and the [`Collector`](pipeline::Collector)
//! - [`stats`] - Counters and snapshots
//!
//! # Example
//!
//! ```
//! use shared::models::{Attributes, Resource, SignalKind};
//! use shared::resource::ResourceContext;
//!
//! let context = ResourceContext::new(Resource::new(
//!     Attributes::new().with("service.name", "edge-gateway"),
//! ));
//!
//! assert_eq!(context.resource().service_name(), Some("edge-gateway"));
//! assert_eq!(SignalKind::Logs.path(), "/v1/logs");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod batcher;
pub mod config;
pub mod error;
pub mod exporter;
pub mod limiter;
pub mod models;
pub mod otlp;
pub mod pipeline;
pub mod processor;
pub mod resource;
pub mod stats;

pub use error::PipelineError;
pub use pipeline::{Collector, IngestSummary};

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;
