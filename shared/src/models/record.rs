//! Internal telemetry records.
//!
//! A [`Record`] is one span, one metric data point or one log record, together
//! with its attribute map and shared pointers to the resource and scope it was
//! reported under. Records are what flows through the limiter, processor and
//! batcher; the OTLP request shape is only rebuilt when a batch is exported.

use super::{Attributes, SignalKind};
use crate::otlp::proto::common::v1::KeyValue;
use crate::otlp::proto::logs::v1::LogRecord;
use crate::otlp::proto::metrics::v1::{
    ExponentialHistogramDataPoint, HistogramDataPoint, NumberDataPoint, SummaryDataPoint,
};
use crate::otlp::proto::trace::v1::Span;
use prost::Message;
use std::sync::Arc;

/// The entity producing telemetry. Shared read-only between all records
/// decoded from the same resource block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    /// Resource attributes such as `service.name`.
    pub attributes: Attributes,
    /// Number of attributes dropped by the producer.
    pub dropped_attributes_count: u32,
    /// Schema URL of the resource block.
    pub schema_url: String,
}

impl Resource {
    /// Creates a resource with the given attributes.
    #[must_use]
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    /// Returns the `service.name` attribute, if present and a string.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.attributes
            .get("service.name")
            .and_then(super::AttributeValue::as_str)
    }
}

/// Instrumentation scope a record was emitted under.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    /// Scope (library) name.
    pub name: String,
    /// Scope version.
    pub version: String,
    /// Scope attributes.
    pub attributes: Attributes,
    /// Number of scope attributes dropped by the producer.
    pub dropped_attributes_count: u32,
    /// Schema URL of the scope block.
    pub schema_url: String,
}

/// Descriptor plus a single data point of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Metric name.
    pub name: String,
    /// Metric description.
    pub description: String,
    /// Unit of measurement.
    pub unit: String,
    /// Metric-level metadata key/values.
    pub metadata: Vec<KeyValue>,
    /// The data point, tagged with its aggregation shape.
    pub data: DataPoint,
}

/// A metric data point with its aggregation shape.
///
/// The point's own attribute list is empty; its attributes live in
/// [`Record::attributes`].
#[derive(Debug, Clone, PartialEq)]
pub enum DataPoint {
    /// Gauge sample.
    Gauge(NumberDataPoint),
    /// Sum sample.
    Sum {
        /// The point.
        point: NumberDataPoint,
        /// OTLP aggregation temporality.
        aggregation_temporality: i32,
        /// Whether the sum is monotonic.
        is_monotonic: bool,
    },
    /// Explicit-bucket histogram.
    Histogram {
        /// The point.
        point: HistogramDataPoint,
        /// OTLP aggregation temporality.
        aggregation_temporality: i32,
    },
    /// Exponential histogram.
    ExponentialHistogram {
        /// The point.
        point: ExponentialHistogramDataPoint,
        /// OTLP aggregation temporality.
        aggregation_temporality: i32,
    },
    /// Summary.
    Summary(SummaryDataPoint),
}

impl DataPoint {
    /// Short name of the aggregation shape.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Gauge(_) => "gauge",
            Self::Sum { .. } => "sum",
            Self::Histogram { .. } => "histogram",
            Self::ExponentialHistogram { .. } => "exponential_histogram",
            Self::Summary(_) => "summary",
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Gauge(point) | Self::Sum { point, .. } => point.encoded_len(),
            Self::Histogram { point, .. } => point.encoded_len(),
            Self::ExponentialHistogram { point, .. } => point.encoded_len(),
            Self::Summary(point) => point.encoded_len(),
        }
    }
}

/// Signal-specific body of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A span, attributes moved out.
    Span(Box<Span>),
    /// A metric data point.
    Metric(Box<MetricPoint>),
    /// A log record, attributes moved out.
    Log(Box<LogRecord>),
}

/// One unit of telemetry flowing through a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Event time in nanoseconds since the Unix epoch.
    pub timestamp_unix_nano: u64,
    /// Record-level attributes. The only part processors touch.
    pub attributes: Attributes,
    /// Resource the record was reported under.
    pub resource: Arc<Resource>,
    /// Instrumentation scope the record was reported under.
    pub scope: Arc<Scope>,
    /// Signal-specific body.
    pub payload: Payload,
}

impl Record {
    /// Returns the signal kind of this record.
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self.payload {
            Payload::Span(_) => SignalKind::Traces,
            Payload::Metric(_) => SignalKind::Metrics,
            Payload::Log(_) => SignalKind::Logs,
        }
    }

    /// Estimated memory footprint in bytes.
    ///
    /// Computed from the attribute map and the encoded payload length. The
    /// resource and scope are shared and not counted per record.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let payload = match &self.payload {
            Payload::Span(span) => span.encoded_len(),
            Payload::Metric(metric) => {
                metric.name.len()
                    + metric.description.len()
                    + metric.unit.len()
                    + metric.data.encoded_len()
            }
            Payload::Log(log) => log.encoded_len(),
        };
        // fixed overhead for the record header and the two Arc pointers
        64 + self.attributes.estimated_size() + payload
    }
}

/// Builds a span record with a default resource and scope.
#[cfg(test)]
pub(crate) fn test_span(name: &str) -> Record {
    Record {
        timestamp_unix_nano: 1,
        attributes: Attributes::new(),
        resource: Arc::new(Resource::default()),
        scope: Arc::new(Scope::default()),
        payload: Payload::Span(Box::new(Span {
            name: name.to_string(),
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            ..Default::default()
        })),
    }
}
