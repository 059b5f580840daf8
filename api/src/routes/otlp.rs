//! OTLP HTTP receiver endpoints.
//!
//! Implements OpenTelemetry Protocol HTTP endpoints for ingesting logs, metrics, and traces.
//! Supports both protobuf (`application/x-protobuf`) and JSON (`application/json`) content types,
//! optionally gzip-compressed. Protobuf requests are answered with the protobuf export
//! response of the signal; JSON requests with an [`ExportResponse`].
//!
//! # Endpoints
//!
//! - `POST /v1/logs` - Ingest OTLP logs
//! - `POST /v1/metrics` - Ingest OTLP metrics
//! - `POST /v1/traces` - Ingest OTLP traces

use crate::grpc::{logs_response, metrics_response, trace_response};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use flate2::read::GzDecoder;
use prost::Message;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::models::SignalKind;
use shared::{Collector, IngestSummary, PipelineError};
use std::io::Read;

/// Content type for protobuf requests.
const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Content type for JSON requests.
const CONTENT_TYPE_JSON: &str = "application/json";

/// Upper bound for a decompressed request body.
const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

/// Seconds a refused client is asked to wait.
const RETRY_AFTER_SECS: u64 = 1;

/// Response for OTLP export requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportResponse {
    /// Present when some items were rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_success: Option<PartialSuccess>,
}

/// Partial success information.
#[derive(Debug, Serialize, Deserialize)]
pub struct PartialSuccess {
    /// Number of rejected items.
    pub rejected_count: i64,
    /// Error message if any items were rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<IngestSummary> for ExportResponse {
    fn from(summary: IngestSummary) -> Self {
        Self {
            partial_success: (summary.rejected > 0).then(|| PartialSuccess {
                rejected_count: summary.rejected,
                error_message: summary.error_message,
            }),
        }
    }
}

/// Error response for OTLP endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtlpError {
    /// Error code.
    pub code: u32,
    /// Error message.
    pub message: String,
}

/// A refused export request.
#[derive(Debug)]
pub struct OtlpRejection {
    status: StatusCode,
    retry_after: Option<u64>,
    message: String,
}

impl OtlpRejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for OtlpRejection {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            PipelineError::AdmissionRejected { .. } => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::ShuttingDown { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let retry_after =
            matches!(err, PipelineError::AdmissionRejected { .. }).then_some(RETRY_AFTER_SECS);
        Self {
            status,
            retry_after,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for OtlpRejection {
    fn into_response(self) -> Response {
        let body = Json(OtlpError {
            code: u32::from(self.status.as_u16()),
            message: self.message,
        });
        match self.retry_after {
            Some(secs) => (self.status, [(header::RETRY_AFTER, secs.to_string())], body).into_response(),
            None => (self.status, body).into_response(),
        }
    }
}

/// Creates the OTLP routes with application state.
pub fn otlp_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/logs", post(ingest_logs))
        .route("/v1/metrics", post(ingest_metrics))
        .route("/v1/traces", post(ingest_traces))
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Protobuf,
    Json,
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Determines if the request is protobuf based on Content-Type header.
fn is_protobuf(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.starts_with(CONTENT_TYPE_PROTOBUF))
}

fn is_json(headers: &HeaderMap) -> bool {
    content_type(headers).is_some_and(|ct| ct.starts_with(CONTENT_TYPE_JSON))
}

fn payload_format(headers: &HeaderMap) -> Result<Format, OtlpRejection> {
    if is_protobuf(headers) {
        Ok(Format::Protobuf)
    } else if is_json(headers) {
        Ok(Format::Json)
    } else {
        Err(OtlpRejection::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!(
                "unsupported content type {:?}; use {CONTENT_TYPE_PROTOBUF} or {CONTENT_TYPE_JSON}",
                content_type(headers).unwrap_or_default()
            ),
        ))
    }
}

/// Undoes `Content-Encoding: gzip`; identity bodies pass through.
fn decompress(headers: &HeaderMap, body: Bytes) -> Result<Bytes, OtlpRejection> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    match encoding {
        None | Some("" | "identity") => Ok(body),
        Some("gzip") => {
            let mut decoded = Vec::new();
            GzDecoder::new(body.as_ref())
                .take(MAX_DECOMPRESSED_BYTES + 1)
                .read_to_end(&mut decoded)
                .map_err(|e| {
                    OtlpRejection::new(StatusCode::BAD_REQUEST, format!("Failed to decompress gzip body: {e}"))
                })?;
            if decoded.len() as u64 > MAX_DECOMPRESSED_BYTES {
                return Err(OtlpRejection::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "decompressed body too large",
                ));
            }
            Ok(Bytes::from(decoded))
        }
        Some(other) => Err(OtlpRejection::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported content encoding {other:?}"),
        )),
    }
}

fn decode_payload<T>(format: Format, body: Bytes) -> Result<T, String>
where
    T: Message + Default + DeserializeOwned,
{
    match format {
        Format::Protobuf => T::decode(body).map_err(|e| format!("Failed to decode protobuf: {e}")),
        Format::Json => serde_json::from_slice(&body).map_err(|e| format!("Failed to decode JSON: {e}")),
    }
}

/// Decodes, admits and acknowledges one export request.
fn ingest<T>(
    state: &AppState,
    kind: SignalKind,
    headers: &HeaderMap,
    body: Bytes,
    admit: fn(&Collector, T) -> Result<IngestSummary, PipelineError>,
) -> Result<Response, OtlpRejection>
where
    T: Message + Default + DeserializeOwned,
{
    let format = payload_format(headers)?;
    let collector = state.collector();

    let request = decompress(headers, body)
        .and_then(|body| {
            decode_payload::<T>(format, body).map_err(|message| {
                OtlpRejection::from(PipelineError::MalformedInput { kind, message })
            })
        })
        .inspect_err(|rejection| {
            collector.pipeline(kind).record_malformed();
            tracing::warn!(signal = %kind, error = %rejection.message, "Malformed OTLP request");
        })?;

    let summary = admit(collector, request).map_err(|e| {
        tracing::warn!(signal = %kind, error = %e, "Refused OTLP export");
        OtlpRejection::from(e)
    })?;

    tracing::debug!(
        signal = %kind,
        accepted = summary.accepted,
        rejected = summary.rejected,
        "Processed OTLP export"
    );

    Ok(match format {
        Format::Json => (StatusCode::OK, Json(ExportResponse::from(summary))).into_response(),
        Format::Protobuf => {
            let body = match kind {
                SignalKind::Traces => trace_response(summary).encode_to_vec(),
                SignalKind::Metrics => metrics_response(summary).encode_to_vec(),
                SignalKind::Logs => logs_response(summary).encode_to_vec(),
            };
            (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)], body).into_response()
        }
    })
}

/// Handler for OTLP logs ingestion.
///
/// Accepts `ExportLogsServiceRequest` in protobuf or JSON format.
async fn ingest_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    ingest(&state, SignalKind::Logs, &headers, body, Collector::ingest_logs)
}

/// Handler for OTLP metrics ingestion.
///
/// Accepts `ExportMetricsServiceRequest` in protobuf or JSON format.
async fn ingest_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    ingest(&state, SignalKind::Metrics, &headers, body, Collector::ingest_metrics)
}

/// Handler for OTLP traces ingestion.
///
/// Accepts `ExportTraceServiceRequest` in protobuf or JSON format.
async fn ingest_traces(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, OtlpRejection> {
    ingest(&state, SignalKind::Traces, &headers, body, Collector::ingest_traces)
}
