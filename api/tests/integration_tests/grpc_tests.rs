//! Integration tests for OTLP gRPC endpoints.
//!
//! These tests verify the gRPC services accept OTLP data (logs, metrics,
//! traces), report partial success and map admission errors to gRPC codes.

use super::common::{
    logs_request, metrics_request, span, test_app, test_config, traces_request, wait_for_sent,
    RecordingTransport, BACKEND,
};
use api::grpc::{LogsServiceImpl, MalformedRequestLayer, MetricsServiceImpl, TracesServiceImpl};
use api::AppState;
use shared::exporter::ExportTransport;
use shared::models::SignalKind;
use shared::otlp::proto;
use shared::Collector;
use std::sync::Arc;
use std::time::Duration;
use tonic::codec::CompressionEncoding;
use tower::{Layer, ServiceExt};

use proto::collector::logs::v1::logs_service_server::LogsService;
use proto::collector::metrics::v1::metrics_service_server::MetricsService;
use proto::collector::trace::v1::trace_service_server::TraceService;

#[tokio::test]
async fn test_grpc_traces_service_integration() {
    let (_router, state, backend) = test_app();
    let service = TracesServiceImpl::new(state.clone());

    let request = tonic::Request::new(traces_request(vec![span("checkout")]));
    let response = service.export(request).await.unwrap().into_inner();
    assert!(response.partial_success.is_none());

    state.collector().force_flush().await.unwrap();
    let sent = wait_for_sent(&backend, 1).await;
    assert_eq!(sent[0].kind, SignalKind::Traces);
    assert_eq!(sent[0].traces().resource_spans[0].scope_spans[0].spans[0].name, "checkout");
}

#[tokio::test]
async fn test_grpc_metrics_service_integration() {
    let (_router, state, _backend) = test_app();
    let service = MetricsServiceImpl::new(state.clone());

    let request = tonic::Request::new(metrics_request("queue.depth"));
    let response = service.export(request).await.unwrap().into_inner();
    assert!(response.partial_success.is_none());
    assert_eq!(state.collector().snapshot().metrics.admitted_records, 1);
}

#[tokio::test]
async fn test_grpc_logs_partial_success() {
    let (_router, state, _backend) = test_app();
    let service = LogsServiceImpl::new(state);

    let mut request = logs_request(&["kept", "dropped"]);
    request.resource_logs[0].scope_logs[0].log_records[1].trace_id = vec![1; 5];

    let response = service.export(tonic::Request::new(request)).await.unwrap().into_inner();
    let partial = response.partial_success.unwrap();
    assert_eq!(partial.rejected_log_records, 1);
    assert!(partial.error_message.contains("trace_id"));
}

#[tokio::test]
async fn test_grpc_queue_full_is_unavailable() {
    let mut config = test_config();
    config.pipelines.logs.batch.max_queue_size = 2;
    config.pipelines.logs.batch.max_export_batch_size = 2;
    let transport = Arc::new(RecordingTransport::default());
    let collector = Collector::builder(config)
        .transport(BACKEND, transport as Arc<dyn ExportTransport>)
        .start()
        .unwrap();
    let service = LogsServiceImpl::new(AppState::new(Arc::new(collector)));

    service
        .export(tonic::Request::new(logs_request(&["one"])))
        .await
        .unwrap();
    let status = service
        .export(tonic::Request::new(logs_request(&["two", "three"])))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);
}

#[tokio::test]
async fn test_grpc_server_accepts_gzip() {
    use proto::collector::trace::v1::trace_service_client::TraceServiceClient;
    use proto::collector::trace::v1::trace_service_server::TraceServiceServer;

    let (_router, state, backend) = test_app();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = tonic::transport::Server::builder()
        .add_service(
            TraceServiceServer::new(TracesServiceImpl::new(state.clone()))
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .serve(addr);
    tokio::spawn(server);

    let mut client = None;
    for _ in 0..50 {
        if let Ok(connected) = TraceServiceClient::connect(format!("http://{addr}")).await {
            client = Some(connected);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let mut client = client.unwrap().send_compressed(CompressionEncoding::Gzip);

    let response = client
        .export(traces_request(vec![span("compressed")]))
        .await
        .unwrap()
        .into_inner();
    assert!(response.partial_success.is_none());

    state.collector().force_flush().await.unwrap();
    let sent = wait_for_sent(&backend, 1).await;
    assert_eq!(sent[0].traces().resource_spans[0].scope_spans[0].spans[0].name, "compressed");
}

#[tokio::test]
async fn test_grpc_malformed_request_is_invalid_argument() {
    use axum::body::Body;
    use axum::http::Request;
    use proto::collector::trace::v1::trace_service_server::TraceServiceServer;

    let (_router, state, backend) = test_app();
    let service = MalformedRequestLayer::new(state.collector_handle())
        .layer(TraceServiceServer::new(TracesServiceImpl::new(state.clone())));

    // uncompressed frame, 4 byte message, invalid varint
    let frame = vec![0, 0, 0, 0, 4, 0xff, 0xff, 0xff, 0xff];
    let request = Request::builder()
        .method("POST")
        .uri("/opentelemetry.proto.collector.trace.v1.TraceService/Export")
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(Body::from(frame))
        .unwrap();

    let response = service.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["grpc-status"], "3");
    let snapshot = state.collector().snapshot();
    assert_eq!(snapshot.traces.malformed_requests, 1);
    assert_eq!(snapshot.traces.received_records, 0);
    assert_eq!(snapshot.logs.malformed_requests, 0);
    assert!(backend.sent().is_empty());
}
