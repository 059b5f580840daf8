//! Classification of undecodable gRPC export requests.
//!
//! tonic decodes the request message before the service method runs and
//! answers a decode failure with `INTERNAL`. OTLP clients treat that as a
//! server fault, so this layer rewrites it to `INVALID_ARGUMENT` and counts
//! the request as malformed on the pipeline it was addressed to.

use axum::http::{HeaderValue, Request, Response};
use shared::models::SignalKind;
use shared::otlp::proto;
use shared::Collector;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::server::NamedService;
use tonic::Code;
use tower::{Layer, Service};

use super::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
use proto::collector::logs::v1::logs_service_server::LogsServiceServer;
use proto::collector::metrics::v1::metrics_service_server::MetricsServiceServer;
use proto::collector::trace::v1::trace_service_server::TraceServiceServer;

const GRPC_STATUS: &str = "grpc-status";

/// Signal kind of an OTLP export path such as
/// `/opentelemetry.proto.collector.trace.v1.TraceService/Export`.
fn signal_for_path(path: &str) -> Option<SignalKind> {
    let service = path.trim_start_matches('/').split('/').next()?;
    if service == <TraceServiceServer<TracesServiceImpl> as NamedService>::NAME {
        Some(SignalKind::Traces)
    } else if service == <MetricsServiceServer<MetricsServiceImpl> as NamedService>::NAME {
        Some(SignalKind::Metrics)
    } else if service == <LogsServiceServer<LogsServiceImpl> as NamedService>::NAME {
        Some(SignalKind::Logs)
    } else {
        None
    }
}

/// Layer producing [`MalformedRequests`] services.
#[derive(Clone)]
pub struct MalformedRequestLayer {
    collector: Arc<Collector>,
}

impl MalformedRequestLayer {
    /// Creates a layer counting malformed requests on `collector`.
    #[must_use]
    pub fn new(collector: Arc<Collector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MalformedRequestLayer {
    type Service = MalformedRequests<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MalformedRequests {
            inner,
            collector: Arc::clone(&self.collector),
        }
    }
}

/// Maps request decode failures of the OTLP services to `INVALID_ARGUMENT`.
#[derive(Clone)]
pub struct MalformedRequests<S> {
    inner: S,
    collector: Arc<Collector>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MalformedRequests<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let kind = signal_for_path(request.uri().path());
        let collector = Arc::clone(&self.collector);
        let response = self.inner.call(request);

        Box::pin(async move {
            let mut response = response.await?;
            let Some(kind) = kind else {
                return Ok(response);
            };
            // the services never answer INTERNAL themselves
            let internal = HeaderValue::from(Code::Internal as i32);
            if response.headers().get(GRPC_STATUS) == Some(&internal) {
                collector.pipeline(kind).record_malformed();
                tracing::warn!(signal = %kind, "Malformed OTLP gRPC export");
                response
                    .headers_mut()
                    .insert(GRPC_STATUS, HeaderValue::from(Code::InvalidArgument as i32));
            }
            Ok(response)
        })
    }
}
