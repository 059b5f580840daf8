//! gRPC service implementations for OTLP collectors.

use crate::state::AppState;
use shared::models::SignalKind;
use shared::otlp::proto;
use shared::{IngestSummary, PipelineError};
use tonic::{Request, Response, Status};

use proto::collector::logs::v1::{
    logs_service_server::LogsService, ExportLogsPartialSuccess, ExportLogsServiceRequest,
    ExportLogsServiceResponse,
};
use proto::collector::metrics::v1::{
    metrics_service_server::MetricsService, ExportMetricsPartialSuccess,
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use proto::collector::trace::v1::{
    trace_service_server::TraceService, ExportTracePartialSuccess, ExportTraceServiceRequest,
    ExportTraceServiceResponse,
};

/// Maps an admission error to the gRPC status OTLP clients retry on.
fn to_status(err: &PipelineError) -> Status {
    match err {
        PipelineError::MalformedInput { .. } => Status::invalid_argument(err.to_string()),
        PipelineError::AdmissionRejected { .. } | PipelineError::ShuttingDown { .. } => {
            Status::unavailable(err.to_string())
        }
    }
}

fn log_outcome(kind: SignalKind, result: &Result<IngestSummary, PipelineError>) {
    match result {
        Ok(summary) => tracing::debug!(
            signal = %kind,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "Processed OTLP gRPC export"
        ),
        Err(e) => tracing::warn!(signal = %kind, error = %e, "Refused OTLP gRPC export"),
    }
}

/// Trace export response, with partial success when items were rejected.
pub(crate) fn trace_response(summary: IngestSummary) -> ExportTraceServiceResponse {
    ExportTraceServiceResponse {
        partial_success: (summary.rejected > 0).then(|| ExportTracePartialSuccess {
            rejected_spans: summary.rejected,
            error_message: summary.error_message.unwrap_or_default(),
        }),
    }
}

/// Metrics export response, with partial success when items were rejected.
pub(crate) fn metrics_response(summary: IngestSummary) -> ExportMetricsServiceResponse {
    ExportMetricsServiceResponse {
        partial_success: (summary.rejected > 0).then(|| ExportMetricsPartialSuccess {
            rejected_data_points: summary.rejected,
            error_message: summary.error_message.unwrap_or_default(),
        }),
    }
}

/// Logs export response, with partial success when items were rejected.
pub(crate) fn logs_response(summary: IngestSummary) -> ExportLogsServiceResponse {
    ExportLogsServiceResponse {
        partial_success: (summary.rejected > 0).then(|| ExportLogsPartialSuccess {
            rejected_log_records: summary.rejected,
            error_message: summary.error_message.unwrap_or_default(),
        }),
    }
}

/// Implementation of the OTLP `TraceService` gRPC service.
#[derive(Clone)]
pub struct TracesServiceImpl {
    state: AppState,
}

impl TracesServiceImpl {
    /// Creates a new `TracesServiceImpl` with the given application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl TraceService for TracesServiceImpl {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let result = self.state.collector().ingest_traces(request.into_inner());
        log_outcome(SignalKind::Traces, &result);
        result
            .map(|summary| Response::new(trace_response(summary)))
            .map_err(|e| to_status(&e))
    }
}

/// Implementation of the OTLP `MetricsService` gRPC service.
#[derive(Clone)]
pub struct MetricsServiceImpl {
    state: AppState,
}

impl MetricsServiceImpl {
    /// Creates a new `MetricsServiceImpl` with the given application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let result = self.state.collector().ingest_metrics(request.into_inner());
        log_outcome(SignalKind::Metrics, &result);
        result
            .map(|summary| Response::new(metrics_response(summary)))
            .map_err(|e| to_status(&e))
    }
}

/// Implementation of the OTLP `LogsService` gRPC service.
#[derive(Clone)]
pub struct LogsServiceImpl {
    state: AppState,
}

impl LogsServiceImpl {
    /// Creates a new `LogsServiceImpl` with the given application state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl LogsService for LogsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let result = self.state.collector().ingest_logs(request.into_inner());
        log_outcome(SignalKind::Logs, &result);
        result
            .map(|summary| Response::new(logs_response(summary)))
            .map_err(|e| to_status(&e))
    }
}
