//! Integration tests for the health endpoint.
//!
//! Tests cover:
//! - Health check document
//! - Degraded status while a memory limiter refuses admissions

use axum::http::StatusCode;
use prost::Message;
use shared::config::MemoryLimit;

use super::common::{get, post_raw, span, test_app, test_app_with_config, test_config, traces_request};

#[tokio::test]
async fn test_health_check() {
    let (app, _state, _backend) = test_app();

    let (status, response) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert_eq!(response["service"], "otelgate");
    assert!(response["version"].is_string());
    assert!(response["credential"].is_null());
}

#[tokio::test]
async fn test_health_reports_every_pipeline() {
    let (app, _state, _backend) = test_app();

    let (_, response) = get(app, "/health").await;
    for signal in ["traces", "metrics", "logs"] {
        let pipeline = &response["pipelines"][signal];
        assert_eq!(pipeline["signal"], signal);
        assert_eq!(pipeline["queue_depth"], 0);
        assert_eq!(pipeline["limiter_state"], "normal");
        assert_eq!(pipeline["batches_exported"], 0);
    }
}

#[tokio::test]
async fn test_health_degraded_when_limiter_refuses() {
    let mut config = test_config();
    config.pipelines.traces.memory_limiter.soft_limit = MemoryLimit::Bytes(100);
    config.pipelines.traces.memory_limiter.hard_limit = MemoryLimit::Bytes(200);
    let (app, _state, _backend) = test_app_with_config(config);

    let protobuf = [("content-type", "application/x-protobuf")];
    let body = traces_request(vec![span("a"), span("b"), span("c")]).encode_to_vec();
    let (status, _, _) = post_raw(app.clone(), "/v1/traces", &protobuf, body).await;
    assert_eq!(status, StatusCode::OK);

    let body = traces_request(vec![span("d")]).encode_to_vec();
    let (status, _, _) = post_raw(app.clone(), "/v1/traces", &protobuf, body).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (_, response) = get(app, "/health").await;
    assert_eq!(response["status"], "degraded");
    assert_eq!(response["pipelines"]["traces"]["limiter_state"], "refusing");
    assert_eq!(response["pipelines"]["logs"]["limiter_state"], "normal");
}
