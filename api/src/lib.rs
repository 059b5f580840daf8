//! Otelgate Collector Server
//!
//! This crate provides the OTLP receivers in front of the otelgate export
//! pipeline. Producers send traces, metrics and logs over OTLP/gRPC or
//! OTLP/HTTP; records are acknowledged once admitted to a pipeline queue and
//! exported to the configured backends in the background.
//!
//! # Architecture
//!
//! The server is built on Axum, Tonic and Tokio, providing:
//! - OTLP/gRPC `TraceService`, `MetricsService` and `LogsService` (port 4317)
//! - OTLP/HTTP endpoints `/v1/traces`, `/v1/metrics`, `/v1/logs` (port 4318)
//! - A `/health` endpoint with pipeline statistics on the HTTP port
//!
//! # Example
//!
//! ```no_run
//! use api::run_server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_server().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
pub mod grpc;
pub mod routes;
pub mod state;

pub use config::{Config, LogFormat};
pub use state::AppState;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use grpc::{LogsServiceImpl, MalformedRequestLayer, MetricsServiceImpl, TracesServiceImpl};
use shared::otlp::proto::collector::{
    logs::v1::logs_service_server::LogsServiceServer,
    metrics::v1::metrics_service_server::MetricsServiceServer,
    trace::v1::trace_service_server::TraceServiceServer,
};
use shared::Collector;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::transport::Server as TonicServer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Runs the otelgate server.
///
/// This function initializes the server with configuration from environment variables
/// and starts listening for incoming connections. It handles graceful shutdown on
/// SIGTERM/SIGINT signals.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded from environment
/// - The collector cannot be started
/// - A server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server() -> Result<()> {
    let config = Config::from_env()?;
    run_server_with_config(config).await
}

/// Runs the otelgate server with the provided configuration.
///
/// Both receivers stop on SIGTERM/SIGINT, or when the other one fails. The
/// collector is drained afterwards, bounded by its shutdown grace period.
///
/// # Errors
///
/// Returns an error if:
/// - The collector cannot be started
/// - A server fails to bind to the configured address
/// - A fatal error occurs during operation
pub async fn run_server_with_config(config: Config) -> Result<()> {
    let grpc_addr = config.grpc_addr()?;
    let http_addr = config.http_addr()?;

    let collector = Arc::new(Collector::start(config.collector.clone())?);
    let state = AppState::new(Arc::clone(&collector));
    let shutdown = CancellationToken::new();

    let app = create_router(state.clone(), config.max_request_bytes);
    let listener = TcpListener::bind(http_addr).await?;
    let http_server =
        axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let grpc_server = TonicServer::builder()
        .layer(MalformedRequestLayer::new(state.collector_handle()))
        .add_service(
            TraceServiceServer::new(TracesServiceImpl::new(state.clone()))
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .add_service(
            MetricsServiceServer::new(MetricsServiceImpl::new(state.clone()))
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .add_service(
            LogsServiceServer::new(LogsServiceImpl::new(state))
                .accept_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_shutdown(grpc_addr, shutdown.clone().cancelled_owned());

    let signal = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    tracing::info!(grpc = %grpc_addr, http = %http_addr, "Otelgate receivers listening");

    let http = async {
        let result = http_server.await;
        shutdown.cancel();
        result
    };
    let grpc = async {
        let result = grpc_server.await;
        shutdown.cancel();
        result
    };
    let (http_result, grpc_result) = tokio::join!(http, grpc);
    signal.abort();

    if let Err(e) = &http_result {
        tracing::error!(error = %e, "HTTP OTLP server error");
    }
    if let Err(e) = &grpc_result {
        tracing::error!(error = %e, "gRPC server error");
    }

    collector.shutdown().await;
    tracing::info!("Server shutdown complete");

    http_result?;
    grpc_result?;
    Ok(())
}

/// Creates the HTTP application router with all routes and middleware.
///
/// This function is public to allow testing the router without starting a full server.
pub fn create_router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::otlp_routes(state))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .layer(TraceLayer::new_for_http())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
