//! Data model of the collector.
//!
//! Records are decoded from OTLP requests, carry their attributes as an
//! ordered map and share their resource and scope through `Arc`s.

pub mod attributes;
pub mod batch;
pub mod record;
pub mod signal;

pub use attributes::{AttributeValue, Attributes};
pub use batch::{Batch, FlushReason};
pub use record::{DataPoint, MetricPoint, Payload, Record, Resource, Scope};
pub use signal::SignalKind;
