//! OTLP request decoding into records.
//!
//! Decoding takes the request by value and moves spans, data points and log
//! records out of it, so a payload is never copied on its way into the
//! pipeline. Structurally invalid items are counted as rejected and skipped;
//! the rest of the request is still admitted (OTLP partial success).

use super::proto::collector::logs::v1::ExportLogsServiceRequest;
use super::proto::collector::metrics::v1::ExportMetricsServiceRequest;
use super::proto::collector::trace::v1::ExportTraceServiceRequest;
use super::proto::common::v1::{InstrumentationScope, KeyValue};
use super::proto::metrics::v1::{metric, Metric};
use super::proto::resource::v1::Resource as ProtoResource;
use super::values::to_attributes;
use super::now_unix_nano;
use crate::models::{DataPoint, MetricPoint, Payload, Record, Resource, Scope};
use crate::resource::ResourceContext;
use std::sync::Arc;

const TRACE_ID_LEN: usize = 16;
const SPAN_ID_LEN: usize = 8;

/// Result of decoding one export request.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Valid records, in request order.
    pub records: Vec<Record>,
    /// Number of items that were rejected.
    pub rejected: i64,
    /// Reason for the first rejection.
    pub error_message: Option<String>,
}

impl Decoded {
    fn reject(&mut self, count: i64, message: impl FnOnce() -> String) {
        self.rejected += count;
        if self.error_message.is_none() {
            self.error_message = Some(message());
        }
    }
}

fn convert_resource(resource: Option<ProtoResource>, context: &ResourceContext) -> Arc<Resource> {
    let incoming = resource.map(|r| Resource {
        attributes: to_attributes(r.attributes),
        dropped_attributes_count: r.dropped_attributes_count,
        schema_url: String::new(),
    });
    context.stamp(incoming)
}

fn convert_scope(scope: Option<InstrumentationScope>, schema_url: String) -> Arc<Scope> {
    let scope = scope.unwrap_or_default();
    Arc::new(Scope {
        name: scope.name,
        version: scope.version,
        attributes: to_attributes(scope.attributes),
        dropped_attributes_count: scope.dropped_attributes_count,
        schema_url,
    })
}

fn with_schema_url(mut resource: Arc<Resource>, schema_url: String) -> Arc<Resource> {
    if !schema_url.is_empty() {
        Arc::make_mut(&mut resource).schema_url = schema_url;
    }
    resource
}

/// Flattens a trace export request into span records.
///
/// Spans whose trace id is not 16 bytes, whose span id is not 8 bytes or whose
/// parent span id is neither empty nor 8 bytes are rejected. A missing start
/// time is stamped with the current time; a missing end time with the start.
#[must_use]
pub fn decode_traces(request: ExportTraceServiceRequest, context: &ResourceContext) -> Decoded {
    let mut decoded = Decoded::default();
    let now = now_unix_nano();

    for resource_spans in request.resource_spans {
        let resource = with_schema_url(
            convert_resource(resource_spans.resource, context),
            resource_spans.schema_url,
        );

        for scope_spans in resource_spans.scope_spans {
            let scope = convert_scope(scope_spans.scope, scope_spans.schema_url);

            for mut span in scope_spans.spans {
                if span.trace_id.len() != TRACE_ID_LEN {
                    decoded.reject(1, || {
                        format!("span trace_id must be 16 bytes, got {}", span.trace_id.len())
                    });
                    continue;
                }
                if span.span_id.len() != SPAN_ID_LEN {
                    decoded.reject(1, || {
                        format!("span span_id must be 8 bytes, got {}", span.span_id.len())
                    });
                    continue;
                }
                if !span.parent_span_id.is_empty() && span.parent_span_id.len() != SPAN_ID_LEN {
                    decoded.reject(1, || {
                        format!(
                            "span parent_span_id must be empty or 8 bytes, got {}",
                            span.parent_span_id.len()
                        )
                    });
                    continue;
                }

                if span.start_time_unix_nano == 0 {
                    span.start_time_unix_nano = now;
                }
                if span.end_time_unix_nano == 0 {
                    span.end_time_unix_nano = span.start_time_unix_nano;
                }

                let attributes = to_attributes(std::mem::take(&mut span.attributes));
                decoded.records.push(Record {
                    timestamp_unix_nano: span.start_time_unix_nano,
                    attributes,
                    resource: Arc::clone(&resource),
                    scope: Arc::clone(&scope),
                    payload: Payload::Span(Box::new(span)),
                });
            }
        }
    }

    decoded
}

/// Timestamp, attributes and the point itself.
type SplitPoint = (u64, Vec<KeyValue>, DataPoint);

/// Splits metric data into its individual data points.
fn split_metric(data: metric::Data) -> Vec<SplitPoint> {
    match data {
        metric::Data::Gauge(gauge) => gauge
            .data_points
            .into_iter()
            .map(|mut p| (p.time_unix_nano, std::mem::take(&mut p.attributes), DataPoint::Gauge(p)))
            .collect(),
        metric::Data::Sum(sum) => sum
            .data_points
            .into_iter()
            .map(|mut p| {
                (
                    p.time_unix_nano,
                    std::mem::take(&mut p.attributes),
                    DataPoint::Sum {
                        point: p,
                        aggregation_temporality: sum.aggregation_temporality,
                        is_monotonic: sum.is_monotonic,
                    },
                )
            })
            .collect(),
        metric::Data::Histogram(histogram) => histogram
            .data_points
            .into_iter()
            .map(|mut p| {
                (
                    p.time_unix_nano,
                    std::mem::take(&mut p.attributes),
                    DataPoint::Histogram {
                        point: p,
                        aggregation_temporality: histogram.aggregation_temporality,
                    },
                )
            })
            .collect(),
        metric::Data::ExponentialHistogram(histogram) => histogram
            .data_points
            .into_iter()
            .map(|mut p| {
                (
                    p.time_unix_nano,
                    std::mem::take(&mut p.attributes),
                    DataPoint::ExponentialHistogram {
                        point: p,
                        aggregation_temporality: histogram.aggregation_temporality,
                    },
                )
            })
            .collect(),
        metric::Data::Summary(summary) => summary
            .data_points
            .into_iter()
            .map(|mut p| {
                (
                    p.time_unix_nano,
                    std::mem::take(&mut p.attributes),
                    DataPoint::Summary(p),
                )
            })
            .collect(),
    }
}

fn stamp_point_time(point: &mut DataPoint, time: u64) {
    match point {
        DataPoint::Gauge(p) | DataPoint::Sum { point: p, .. } => p.time_unix_nano = time,
        DataPoint::Histogram { point, .. } => point.time_unix_nano = time,
        DataPoint::ExponentialHistogram { point, .. } => point.time_unix_nano = time,
        DataPoint::Summary(point) => point.time_unix_nano = time,
    }
}

fn decode_metric(
    metric: Metric,
    resource: &Arc<Resource>,
    scope: &Arc<Scope>,
    now: u64,
    decoded: &mut Decoded,
) {
    let Metric {
        name,
        description,
        unit,
        metadata,
        data,
        ..
    } = metric;

    let Some(data) = data else {
        decoded.reject(1, || format!("metric '{name}' has no data"));
        return;
    };
    let points = split_metric(data);

    if name.is_empty() {
        let count = i64::try_from(points.len().max(1)).unwrap_or(i64::MAX);
        decoded.reject(count, || "metric name must not be empty".to_string());
        return;
    }
    if points.is_empty() {
        decoded.reject(1, || format!("metric '{name}' has no data points"));
        return;
    }

    for (time, attributes, mut data) in points {
        let timestamp = if time == 0 {
            stamp_point_time(&mut data, now);
            now
        } else {
            time
        };
        decoded.records.push(Record {
            timestamp_unix_nano: timestamp,
            attributes: to_attributes(attributes),
            resource: Arc::clone(resource),
            scope: Arc::clone(scope),
            payload: Payload::Metric(Box::new(MetricPoint {
                name: name.clone(),
                description: description.clone(),
                unit: unit.clone(),
                metadata: metadata.clone(),
                data,
            })),
        });
    }
}

/// Flattens a metrics export request into one record per data point.
///
/// Metrics without a name, without data or without data points are rejected.
/// Data points without a timestamp are stamped with the current time.
#[must_use]
pub fn decode_metrics(request: ExportMetricsServiceRequest, context: &ResourceContext) -> Decoded {
    let mut decoded = Decoded::default();
    let now = now_unix_nano();

    for resource_metrics in request.resource_metrics {
        let resource = with_schema_url(
            convert_resource(resource_metrics.resource, context),
            resource_metrics.schema_url,
        );

        for scope_metrics in resource_metrics.scope_metrics {
            let scope = convert_scope(scope_metrics.scope, scope_metrics.schema_url);
            for metric in scope_metrics.metrics {
                decode_metric(metric, &resource, &scope, now, &mut decoded);
            }
        }
    }

    decoded
}

/// Flattens a logs export request into log records.
///
/// Log records carrying a trace id that is not 16 bytes or a span id that is
/// not 8 bytes are rejected. The observed time defaults to now and the event
/// time to the observed time.
#[must_use]
pub fn decode_logs(request: ExportLogsServiceRequest, context: &ResourceContext) -> Decoded {
    let mut decoded = Decoded::default();
    let now = now_unix_nano();

    for resource_logs in request.resource_logs {
        let resource = with_schema_url(
            convert_resource(resource_logs.resource, context),
            resource_logs.schema_url,
        );

        for scope_logs in resource_logs.scope_logs {
            let scope = convert_scope(scope_logs.scope, scope_logs.schema_url);

            for mut log in scope_logs.log_records {
                if !log.trace_id.is_empty() && log.trace_id.len() != TRACE_ID_LEN {
                    decoded.reject(1, || {
                        format!("log trace_id must be empty or 16 bytes, got {}", log.trace_id.len())
                    });
                    continue;
                }
                if !log.span_id.is_empty() && log.span_id.len() != SPAN_ID_LEN {
                    decoded.reject(1, || {
                        format!("log span_id must be empty or 8 bytes, got {}", log.span_id.len())
                    });
                    continue;
                }

                if log.observed_time_unix_nano == 0 {
                    log.observed_time_unix_nano = now;
                }
                if log.time_unix_nano == 0 {
                    log.time_unix_nano = log.observed_time_unix_nano;
                }

                let attributes = to_attributes(std::mem::take(&mut log.attributes));
                decoded.records.push(Record {
                    timestamp_unix_nano: log.time_unix_nano,
                    attributes,
                    resource: Arc::clone(&resource),
                    scope: Arc::clone(&scope),
                    payload: Payload::Log(Box::new(log)),
                });
            }
        }
    }

    decoded
}
