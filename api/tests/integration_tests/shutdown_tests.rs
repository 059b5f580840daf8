//! Integration tests for graceful shutdown.
//!
//! Partially filled batches in every pipeline are exported exactly once when
//! the collector shuts down, and later requests are refused.

use axum::http::StatusCode;
use prost::Message;
use shared::models::SignalKind;

use super::common::{
    logs_request, metrics_request, post_raw, span, test_app, traces_request,
};

const PROTOBUF: [(&str, &str); 1] = [("content-type", "application/x-protobuf")];

#[tokio::test]
async fn test_shutdown_flushes_every_pipeline_once() {
    let (app, state, backend) = test_app();

    let requests = [
        ("/v1/traces", traces_request(vec![span("a"), span("b")]).encode_to_vec()),
        ("/v1/metrics", metrics_request("cpu.usage").encode_to_vec()),
        ("/v1/logs", logs_request(&["started"]).encode_to_vec()),
    ];
    for (uri, body) in requests {
        let (status, _, _) = post_raw(app.clone(), uri, &PROTOBUF, body).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert!(backend.sent().is_empty());

    state.collector().shutdown().await;

    for kind in [SignalKind::Traces, SignalKind::Metrics, SignalKind::Logs] {
        assert_eq!(backend.sent_for(kind).len(), 1, "{kind} batches");
    }
    assert_eq!(backend.sent().len(), 3);

    let snapshot = state.collector().snapshot();
    assert_eq!(snapshot.traces.records_exported, 2);
    assert_eq!(snapshot.traces.queue_depth, 0);
}

#[tokio::test]
async fn test_requests_after_shutdown_return_503() {
    let (app, state, backend) = test_app();
    state.collector().shutdown().await;

    let body = logs_request(&["late"]).encode_to_vec();
    let (status, _, _) = post_raw(app, "/v1/logs", &PROTOBUF, body).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(backend.sent().is_empty());
    assert!(state.collector().force_flush().await.is_err());
}
