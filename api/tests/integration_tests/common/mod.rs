//! Common test utilities and helpers for integration tests.
//!
//! This module provides shared functionality used across all integration tests,
//! including collector setup with a recording backend and HTTP request helpers.

use api::{create_router, AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use prost::Message;
use serde_json::Value;
use shared::config::{BackendConfig, CollectorConfig, Compression};
use shared::exporter::{ExportError, ExportRequest, ExportTransport};
use shared::models::SignalKind;
use shared::otlp::proto;
use shared::Collector;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name of the backend served by [`RecordingTransport`].
pub const BACKEND: &str = "recording";

/// Request body limit used by [`test_app`].
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// One request seen by the recording backend.
#[derive(Debug, Clone)]
pub struct Sent {
    /// Signal of the batch.
    pub kind: SignalKind,
    /// Uncompressed protobuf body.
    pub body: Vec<u8>,
}

impl Sent {
    /// Decodes the body as a trace export request.
    pub fn traces(&self) -> proto::collector::trace::v1::ExportTraceServiceRequest {
        proto::collector::trace::v1::ExportTraceServiceRequest::decode(self.body.as_slice()).unwrap()
    }

    /// Decodes the body as a logs export request.
    pub fn logs(&self) -> proto::collector::logs::v1::ExportLogsServiceRequest {
        proto::collector::logs::v1::ExportLogsServiceRequest::decode(self.body.as_slice()).unwrap()
    }
}

/// Export backend that records every request and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    /// Requests seen so far.
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Requests seen so far for `kind`.
    pub fn sent_for(&self, kind: SignalKind) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.kind == kind).collect()
    }
}

#[async_trait]
impl ExportTransport for RecordingTransport {
    async fn send(&self, request: &ExportRequest) -> Result<(), ExportError> {
        self.sent.lock().unwrap().push(Sent {
            kind: request.kind,
            body: request.body.to_vec(),
        });
        Ok(())
    }
}

/// Collector configuration with one uncompressed backend and a long
/// schedule delay, so batches leave only when full or flushed.
pub fn test_config() -> CollectorConfig {
    let mut config = CollectorConfig::default();
    config.resource.service_name = "otelgate-test".to_string();
    config.resource.environment = Some("test".to_string());
    config.shutdown_grace = Duration::from_secs(5);
    for kind in [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs] {
        config.pipelines.get_mut(kind).batch.schedule_delay = Duration::from_secs(60);
    }
    config.exporter.backends.push(
        BackendConfig::new("http://127.0.0.1:4318")
            .with_name(BACKEND)
            .with_compression(Compression::None),
    );
    config
}

/// Starts a collector for `config` whose backend is a [`RecordingTransport`].
///
/// # Returns
///
/// A tuple containing the configured router, the app state and the backend.
pub fn test_app_with_config(config: CollectorConfig) -> (Router, AppState, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let collector = Collector::builder(config)
        .transport(BACKEND, Arc::clone(&transport) as Arc<dyn ExportTransport>)
        .start()
        .unwrap();
    let state = AppState::new(Arc::new(collector));
    let router = create_router(state.clone(), MAX_REQUEST_BYTES);
    (router, state, transport)
}

/// Creates a test router over a fresh collector.
///
/// # Returns
///
/// A tuple containing the configured router, the app state and the backend.
pub fn test_app() -> (Router, AppState, Arc<RecordingTransport>) {
    test_app_with_config(test_config())
}

/// Helper to make a POST request with JSON body.
///
/// # Arguments
///
/// * `app` - The Axum router to send the request to
/// * `uri` - The URI path to POST to
/// * `body` - The JSON body to send
///
/// # Returns
///
/// A tuple of (status code, response JSON body)
pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a POST request with a raw body.
///
/// # Arguments
///
/// * `app` - The Axum router to send the request to
/// * `uri` - The URI path to POST to
/// * `headers` - Header name/value pairs, e.g. content type and encoding
/// * `body` - The body bytes
///
/// # Returns
///
/// A tuple of (status code, response headers, response body bytes)
pub async fn post_raw(
    app: Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut request = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = tower::ServiceExt::oneshot(app, request.body(Body::from(body)).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    (status, headers, body_bytes.to_vec())
}

/// Helper to make a GET request.
///
/// # Arguments
///
/// * `app` - The Axum router to send the request to
/// * `uri` - The URI path to GET
///
/// # Returns
///
/// A tuple of (status code, response JSON body)
pub async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

/// Builds a string-valued OTLP attribute.
pub fn kv(key: &str, value: &str) -> proto::common::v1::KeyValue {
    proto::common::v1::KeyValue {
        key: key.to_string(),
        value: Some(proto::common::v1::AnyValue {
            value: Some(proto::common::v1::any_value::Value::StringValue(value.to_string())),
        }),
    }
}

/// Builds a valid span named `name`.
pub fn span(name: &str) -> proto::trace::v1::Span {
    proto::trace::v1::Span {
        name: name.to_string(),
        trace_id: vec![1; 16],
        span_id: vec![2; 8],
        start_time_unix_nano: 1_700_000_000_000_000_000,
        end_time_unix_nano: 1_700_000_000_100_000_000,
        attributes: vec![kv("http.route", "/checkout")],
        ..Default::default()
    }
}

/// Wraps spans in a trace export request from service `checkout`.
pub fn traces_request(spans: Vec<proto::trace::v1::Span>) -> proto::collector::trace::v1::ExportTraceServiceRequest {
    proto::collector::trace::v1::ExportTraceServiceRequest {
        resource_spans: vec![proto::trace::v1::ResourceSpans {
            resource: Some(proto::resource::v1::Resource {
                attributes: vec![kv("service.name", "checkout")],
                ..Default::default()
            }),
            scope_spans: vec![proto::trace::v1::ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Builds a logs export request with one record per body.
pub fn logs_request(bodies: &[&str]) -> proto::collector::logs::v1::ExportLogsServiceRequest {
    let log_records = bodies
        .iter()
        .map(|body| proto::logs::v1::LogRecord {
            time_unix_nano: 1_700_000_000_000_000_000,
            severity_number: 9,
            body: Some(proto::common::v1::AnyValue {
                value: Some(proto::common::v1::any_value::Value::StringValue((*body).to_string())),
            }),
            ..Default::default()
        })
        .collect();
    proto::collector::logs::v1::ExportLogsServiceRequest {
        resource_logs: vec![proto::logs::v1::ResourceLogs {
            scope_logs: vec![proto::logs::v1::ScopeLogs {
                log_records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Builds a metrics export request with one gauge data point.
pub fn metrics_request(name: &str) -> proto::collector::metrics::v1::ExportMetricsServiceRequest {
    use proto::metrics::v1::{metric, number_data_point, Gauge, Metric, NumberDataPoint};

    proto::collector::metrics::v1::ExportMetricsServiceRequest {
        resource_metrics: vec![proto::metrics::v1::ResourceMetrics {
            scope_metrics: vec![proto::metrics::v1::ScopeMetrics {
                metrics: vec![Metric {
                    name: name.to_string(),
                    data: Some(metric::Data::Gauge(Gauge {
                        data_points: vec![NumberDataPoint {
                            time_unix_nano: 1_700_000_000_000_000_000,
                            value: Some(number_data_point::Value::AsDouble(0.5)),
                            ..Default::default()
                        }],
                    })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Resource attribute `key` of the first resource in a trace request.
pub fn resource_attr(request: &proto::collector::trace::v1::ExportTraceServiceRequest, key: &str) -> Option<String> {
    request.resource_spans[0]
        .resource
        .as_ref()?
        .attributes
        .iter()
        .find(|kv| kv.key == key)
        .and_then(|kv| match kv.value.as_ref()?.value.as_ref()? {
            proto::common::v1::any_value::Value::StringValue(s) => Some(s.clone()),
            _ => None,
        })
}

/// Polls the backend until it has seen `count` requests or two seconds pass.
pub async fn wait_for_sent(transport: &RecordingTransport, count: usize) -> Vec<Sent> {
    for _ in 0..200 {
        let sent = transport.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    transport.sent()
}
