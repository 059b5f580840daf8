//! Integration tests for the OTLP/HTTP receiver.
//!
//! Tests cover:
//! - JSON and protobuf payloads, gzip request bodies
//! - Partial success for invalid items
//! - Malformed and unsupported requests
//! - Admission rejections from the memory limiter and the batch queue
//! - Attribute processing before export

use axum::http::StatusCode;
use flate2::{write::GzEncoder, Compression};
use prost::Message;
use serde_json::json;
use shared::config::{AttributeAction, AttributeRule, MemoryLimit};
use shared::models::SignalKind;
use shared::otlp::proto;
use std::io::Write;

use super::common::{
    get, kv, logs_request, post_json, post_raw, resource_attr, span, test_app,
    test_app_with_config, test_config, traces_request, wait_for_sent,
};

const PROTOBUF: [(&str, &str); 1] = [("content-type", "application/x-protobuf")];

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

// ============================================================================
// ACCEPTED REQUESTS
// ============================================================================

#[tokio::test]
async fn test_ingest_logs_json_valid() {
    let (app, state, backend) = test_app();

    let body = json!({
        "resourceLogs": [{
            "resource": {
                "attributes": [{
                    "key": "service.name",
                    "value": {"stringValue": "test-service"}
                }]
            },
            "scopeLogs": [{
                "scope": {"name": "test-scope"},
                "logRecords": [{
                    "timeUnixNano": "1700000000000000000",
                    "severityNumber": 9,
                    "body": {"stringValue": "Test log message"},
                    "attributes": []
                }]
            }]
        }]
    });

    let (status, response) = post_json(app, "/v1/logs", body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.get("partial_success").is_none());

    state.collector().force_flush().await.unwrap();
    let sent = wait_for_sent(&backend, 1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SignalKind::Logs);

    let exported = sent[0].logs();
    let resource_logs = &exported.resource_logs[0];
    let record = &resource_logs.scope_logs[0].log_records[0];
    assert_eq!(
        record.body.as_ref().unwrap().value,
        Some(proto::common::v1::any_value::Value::StringValue(
            "Test log message".to_string()
        ))
    );
    let resource = resource_logs.resource.as_ref().unwrap();
    assert!(resource.attributes.contains(&kv("service.name", "test-service")));
    assert!(resource.attributes.contains(&kv("deployment.environment", "test")));
}

#[tokio::test]
async fn test_ingest_traces_protobuf_gzip() {
    let (app, state, backend) = test_app();

    let request = traces_request(vec![span("GET /cart"), span("SELECT cart")]);
    let (status, headers, body) = post_raw(
        app,
        "/v1/traces",
        &[
            ("content-type", "application/x-protobuf"),
            ("content-encoding", "gzip"),
        ],
        gzip(&request.encode_to_vec()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/x-protobuf");
    let response =
        proto::collector::trace::v1::ExportTraceServiceResponse::decode(body.as_slice()).unwrap();
    assert!(response.partial_success.is_none());

    state.collector().force_flush().await.unwrap();
    let sent = wait_for_sent(&backend, 1).await;
    let exported = sent[0].traces();
    let names: Vec<_> = exported.resource_spans[0].scope_spans[0]
        .spans
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(names, ["GET /cart", "SELECT cart"]);
    assert_eq!(resource_attr(&exported, "service.name").as_deref(), Some("checkout"));
}

#[tokio::test]
async fn test_empty_request_succeeds() {
    let (app, state, _backend) = test_app();

    let (status, response) = post_json(app, "/v1/traces", json!({"resourceSpans": []})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.get("partial_success").is_none());
    assert_eq!(state.collector().snapshot().traces.received_records, 0);
}

#[tokio::test]
async fn test_partial_success_for_invalid_items() {
    let (app, _state, _backend) = test_app();

    let mut bad = span("bad");
    bad.trace_id = vec![1; 3];
    let request = traces_request(vec![span("good"), bad]);

    let (status, _, body) =
        post_raw(app.clone(), "/v1/traces", &PROTOBUF, request.encode_to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    let response =
        proto::collector::trace::v1::ExportTraceServiceResponse::decode(body.as_slice()).unwrap();
    let partial = response.partial_success.unwrap();
    assert_eq!(partial.rejected_spans, 1);
    assert!(partial.error_message.contains("trace_id"));

    let (_, health) = get(app, "/health").await;
    assert_eq!(health["pipelines"]["traces"]["admitted_records"], 1);
    assert_eq!(health["pipelines"]["traces"]["rejected_records"], 1);
}

#[tokio::test]
async fn test_partial_success_json_response() {
    let (app, _state, _backend) = test_app();

    let mut request = logs_request(&["kept", "dropped"]);
    request.resource_logs[0].scope_logs[0].log_records[1].span_id = vec![7; 3];
    let body = serde_json::to_value(&request).unwrap();

    let (status, response) = post_json(app, "/v1/logs", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["partial_success"]["rejected_count"], 1);
}

// ============================================================================
// REFUSED REQUESTS
// ============================================================================

#[tokio::test]
async fn test_malformed_protobuf_returns_400() {
    let (app, _state, _backend) = test_app();

    let (status, _, body) =
        post_raw(app.clone(), "/v1/logs", &PROTOBUF, vec![0xff, 0xff, 0xff]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], 400);

    let (_, health) = get(app, "/health").await;
    assert_eq!(health["pipelines"]["logs"]["malformed_requests"], 1);
    assert_eq!(health["pipelines"]["traces"]["malformed_requests"], 0);
}

#[tokio::test]
async fn test_malformed_json_returns_400() {
    let (app, _state, _backend) = test_app();

    let (status, response) = post_json(app, "/v1/metrics", json!({"resourceMetrics": 5})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], 400);
}

#[tokio::test]
async fn test_unsupported_content_type_returns_415() {
    let (app, _state, _backend) = test_app();

    let (status, _, _) = post_raw(
        app,
        "/v1/traces",
        &[("content-type", "text/plain")],
        b"hello".to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_memory_limit_returns_429() {
    let mut config = test_config();
    config.pipelines.traces.memory_limiter.soft_limit = MemoryLimit::Bytes(100);
    config.pipelines.traces.memory_limiter.hard_limit = MemoryLimit::Bytes(200);
    let (app, _state, _backend) = test_app_with_config(config);

    let first = traces_request(vec![span("a"), span("b"), span("c")]).encode_to_vec();
    let (status, _, _) = post_raw(app.clone(), "/v1/traces", &PROTOBUF, first).await;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..3 {
        let next = traces_request(vec![span("d")]).encode_to_vec();
        let (status, headers, _) = post_raw(app.clone(), "/v1/traces", &PROTOBUF, next).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers["retry-after"], "1");
    }

    let (_, health) = get(app, "/health").await;
    assert_eq!(health["pipelines"]["traces"]["rejected_admissions"], 3);
    assert_eq!(health["pipelines"]["traces"]["refused_records"], 3);
}

#[tokio::test]
async fn test_queue_full_returns_429() {
    let mut config = test_config();
    config.pipelines.logs.batch.max_queue_size = 4;
    config.pipelines.logs.batch.max_export_batch_size = 4;
    let (app, _state, _backend) = test_app_with_config(config);

    let first = logs_request(&["1", "2", "3"]).encode_to_vec();
    let (status, _, _) = post_raw(app.clone(), "/v1/logs", &PROTOBUF, first).await;
    assert_eq!(status, StatusCode::OK);

    let overflow = logs_request(&["4", "5"]).encode_to_vec();
    let (status, _, body) = post_raw(app.clone(), "/v1/logs", &PROTOBUF, overflow).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(error["message"].as_str().unwrap().contains("queue is full"));

    let (_, health) = get(app, "/health").await;
    assert_eq!(health["pipelines"]["logs"]["queue_depth"], 3);
    assert_eq!(health["pipelines"]["logs"]["queue_dropped_records"], 2);
}

// ============================================================================
// PROCESSING
// ============================================================================

#[tokio::test]
async fn test_redacted_attribute_never_exported() {
    let mut config = test_config();
    config.pipelines.traces.processor.actions = vec![
        AttributeRule::new(AttributeAction::Redact {
            key: "user.email".to_string(),
            placeholder: "[REDACTED]".to_string(),
        }),
        AttributeRule::new(AttributeAction::Delete {
            key: "http.route".to_string(),
        }),
    ];
    let (app, state, backend) = test_app_with_config(config);

    let mut traced = span("login");
    traced.attributes.push(kv("user.email", "jane@example.com"));
    let request = traces_request(vec![traced]).encode_to_vec();
    let (status, _, _) = post_raw(app, "/v1/traces", &PROTOBUF, request).await;
    assert_eq!(status, StatusCode::OK);

    state.collector().force_flush().await.unwrap();
    let sent = wait_for_sent(&backend, 1).await;
    let body = String::from_utf8_lossy(&sent[0].body);
    assert!(!body.contains("jane@example.com"));

    let exported = sent[0].traces();
    let attributes = &exported.resource_spans[0].scope_spans[0].spans[0].attributes;
    assert!(attributes.contains(&kv("user.email", "[REDACTED]")));
    assert!(!attributes.iter().any(|a| a.key == "http.route"));
}
