//! Batch encoding into OTLP export requests.
//!
//! Records are regrouped under their resource and scope. Records decoded
//! from the same resource block share an `Arc` and match by pointer; records
//! from separate requests of the same producer carry equal but distinct
//! resources and match by value, so a batch holds one `Resource*` entry per
//! distinct resource. Group order follows the first occurrence in the batch.

use super::proto::collector::logs::v1::ExportLogsServiceRequest;
use super::proto::collector::metrics::v1::ExportMetricsServiceRequest;
use super::proto::collector::trace::v1::ExportTraceServiceRequest;
use super::proto::common::v1::InstrumentationScope;
use super::proto::logs::v1::{ResourceLogs, ScopeLogs};
use super::proto::metrics::v1::{
    metric, ExponentialHistogram, Gauge, Histogram, Metric, ResourceMetrics, ScopeMetrics, Sum,
    Summary,
};
use super::proto::resource::v1::Resource as ProtoResource;
use super::proto::trace::v1::{ResourceSpans, ScopeSpans};
use super::values::to_key_values;
use crate::models::{Batch, DataPoint, MetricPoint, Payload, Record, Resource, Scope, SignalKind};
use prost::Message;
use std::sync::Arc;

struct ScopeGroup<'a> {
    scope: &'a Arc<Scope>,
    records: Vec<&'a Record>,
}

struct ResourceGroup<'a> {
    resource: &'a Arc<Resource>,
    scopes: Vec<ScopeGroup<'a>>,
}

fn same<T: PartialEq>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

fn group_by_origin(records: &[Record]) -> Vec<ResourceGroup<'_>> {
    let mut groups: Vec<ResourceGroup<'_>> = Vec::new();
    for record in records {
        let group = match groups
            .iter()
            .position(|g| same(g.resource, &record.resource))
        {
            Some(index) => &mut groups[index],
            None => {
                groups.push(ResourceGroup {
                    resource: &record.resource,
                    scopes: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        match group
            .scopes
            .iter_mut()
            .find(|s| same(s.scope, &record.scope))
        {
            Some(scope) => scope.records.push(record),
            None => group.scopes.push(ScopeGroup {
                scope: &record.scope,
                records: vec![record],
            }),
        }
    }
    groups
}

fn resource_to_proto(resource: &Resource) -> ProtoResource {
    ProtoResource {
        attributes: to_key_values(&resource.attributes),
        dropped_attributes_count: resource.dropped_attributes_count,
        ..Default::default()
    }
}

fn scope_to_proto(scope: &Scope) -> InstrumentationScope {
    InstrumentationScope {
        name: scope.name.clone(),
        version: scope.version.clone(),
        attributes: to_key_values(&scope.attributes),
        dropped_attributes_count: scope.dropped_attributes_count,
        ..Default::default()
    }
}

/// Builds a trace export request from span records. Other payloads are skipped.
#[must_use]
pub fn encode_traces(records: &[Record]) -> ExportTraceServiceRequest {
    let resource_spans = group_by_origin(records)
        .into_iter()
        .map(|group| ResourceSpans {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_spans: group
                .scopes
                .into_iter()
                .map(|scope| ScopeSpans {
                    scope: Some(scope_to_proto(scope.scope)),
                    schema_url: scope.scope.schema_url.clone(),
                    spans: scope
                        .records
                        .into_iter()
                        .filter_map(|record| match &record.payload {
                            Payload::Span(span) => {
                                let mut span = span.as_ref().clone();
                                span.attributes = to_key_values(&record.attributes);
                                Some(span)
                            }
                            _ => None,
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    ExportTraceServiceRequest { resource_spans }
}

/// Identity of a metric stream within a scope.
#[derive(PartialEq)]
struct MetricKey<'a> {
    name: &'a str,
    description: &'a str,
    unit: &'a str,
    shape: &'static str,
    temporality: i32,
    monotonic: bool,
}

impl<'a> MetricKey<'a> {
    fn of(point: &'a MetricPoint) -> Self {
        let (temporality, monotonic) = match &point.data {
            DataPoint::Sum {
                aggregation_temporality,
                is_monotonic,
                ..
            } => (*aggregation_temporality, *is_monotonic),
            DataPoint::Histogram {
                aggregation_temporality,
                ..
            }
            | DataPoint::ExponentialHistogram {
                aggregation_temporality,
                ..
            } => (*aggregation_temporality, false),
            DataPoint::Gauge(_) | DataPoint::Summary(_) => (0, false),
        };
        Self {
            name: &point.name,
            description: &point.description,
            unit: &point.unit,
            shape: point.data.type_name(),
            temporality,
            monotonic,
        }
    }
}

fn empty_data(point: &DataPoint) -> metric::Data {
    match point {
        DataPoint::Gauge(_) => metric::Data::Gauge(Gauge::default()),
        DataPoint::Sum {
            aggregation_temporality,
            is_monotonic,
            ..
        } => metric::Data::Sum(Sum {
            aggregation_temporality: *aggregation_temporality,
            is_monotonic: *is_monotonic,
            ..Default::default()
        }),
        DataPoint::Histogram {
            aggregation_temporality,
            ..
        } => metric::Data::Histogram(Histogram {
            aggregation_temporality: *aggregation_temporality,
            ..Default::default()
        }),
        DataPoint::ExponentialHistogram {
            aggregation_temporality,
            ..
        } => metric::Data::ExponentialHistogram(ExponentialHistogram {
            aggregation_temporality: *aggregation_temporality,
            ..Default::default()
        }),
        DataPoint::Summary(_) => metric::Data::Summary(Summary::default()),
    }
}

fn push_point(data: &mut metric::Data, point: &DataPoint, record: &Record) {
    let attributes = to_key_values(&record.attributes);
    match (data, point) {
        (metric::Data::Gauge(gauge), DataPoint::Gauge(p)) => {
            let mut p = p.clone();
            p.attributes = attributes;
            gauge.data_points.push(p);
        }
        (metric::Data::Sum(sum), DataPoint::Sum { point: p, .. }) => {
            let mut p = p.clone();
            p.attributes = attributes;
            sum.data_points.push(p);
        }
        (metric::Data::Histogram(histogram), DataPoint::Histogram { point: p, .. }) => {
            let mut p = p.clone();
            p.attributes = attributes;
            histogram.data_points.push(p);
        }
        (
            metric::Data::ExponentialHistogram(histogram),
            DataPoint::ExponentialHistogram { point: p, .. },
        ) => {
            let mut p = p.clone();
            p.attributes = attributes;
            histogram.data_points.push(p);
        }
        (metric::Data::Summary(summary), DataPoint::Summary(p)) => {
            let mut p = p.clone();
            p.attributes = attributes;
            summary.data_points.push(p);
        }
        // streams are keyed by shape, so the data always matches the point
        _ => {}
    }
}

fn encode_scope_metrics(records: &[&Record]) -> Vec<Metric> {
    let mut keys: Vec<MetricKey<'_>> = Vec::new();
    let mut metrics: Vec<Metric> = Vec::new();

    for record in records {
        let Payload::Metric(point) = &record.payload else {
            continue;
        };
        let key = MetricKey::of(point);
        let index = if let Some(index) = keys.iter().position(|k| *k == key) {
            index
        } else {
            keys.push(key);
            metrics.push(Metric {
                name: point.name.clone(),
                description: point.description.clone(),
                unit: point.unit.clone(),
                metadata: point.metadata.clone(),
                data: Some(empty_data(&point.data)),
                ..Default::default()
            });
            metrics.len() - 1
        };
        if let Some(data) = metrics[index].data.as_mut() {
            push_point(data, &point.data, record);
        }
    }

    metrics
}

/// Builds a metrics export request from metric records.
///
/// Data points of the same metric stream (name, description, unit and
/// aggregation shape) within a scope are merged into one `Metric`.
#[must_use]
pub fn encode_metrics(records: &[Record]) -> ExportMetricsServiceRequest {
    let resource_metrics = group_by_origin(records)
        .into_iter()
        .map(|group| ResourceMetrics {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_metrics: group
                .scopes
                .into_iter()
                .map(|scope| ScopeMetrics {
                    scope: Some(scope_to_proto(scope.scope)),
                    schema_url: scope.scope.schema_url.clone(),
                    metrics: encode_scope_metrics(&scope.records),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    ExportMetricsServiceRequest { resource_metrics }
}

/// Builds a logs export request from log records. Other payloads are skipped.
#[must_use]
pub fn encode_logs(records: &[Record]) -> ExportLogsServiceRequest {
    let resource_logs = group_by_origin(records)
        .into_iter()
        .map(|group| ResourceLogs {
            resource: Some(resource_to_proto(group.resource)),
            schema_url: group.resource.schema_url.clone(),
            scope_logs: group
                .scopes
                .into_iter()
                .map(|scope| ScopeLogs {
                    scope: Some(scope_to_proto(scope.scope)),
                    schema_url: scope.scope.schema_url.clone(),
                    log_records: scope
                        .records
                        .into_iter()
                        .filter_map(|record| match &record.payload {
                            Payload::Log(log) => {
                                let mut log = log.as_ref().clone();
                                log.attributes = to_key_values(&record.attributes);
                                Some(log)
                            }
                            _ => None,
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    ExportLogsServiceRequest { resource_logs }
}

/// Encodes a batch as the protobuf body of the matching OTLP export request.
#[must_use]
pub fn encode_batch(batch: &Batch) -> Vec<u8> {
    match batch.kind {
        SignalKind::Traces => encode_traces(&batch.records).encode_to_vec(),
        SignalKind::Metrics => encode_metrics(&batch.records).encode_to_vec(),
        SignalKind::Logs => encode_logs(&batch.records).encode_to_vec(),
    }
}
