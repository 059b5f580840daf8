//! Health check endpoint.
//!
//! Reports liveness plus per-pipeline statistics and credential state for
//! load balancers, monitoring systems and `otelgate health`.

use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use shared::auth::AuthStatus;
use shared::stats::PipelineSnapshot;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` while any memory limiter refuses admissions.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Statistics per signal pipeline.
    pub pipelines: Pipelines,
    /// Credential state, when authentication is configured.
    pub credential: Option<AuthStatus>,
}

/// Pipeline statistics keyed by signal.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct Pipelines {
    pub traces: PipelineSnapshot,
    pub metrics: PipelineSnapshot,
    pub logs: PipelineSnapshot,
}

/// Creates the health check routes.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.collector().snapshot();
    let status = if snapshot.is_degraded() {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        service: "otelgate",
        version: env!("CARGO_PKG_VERSION"),
        pipelines: Pipelines {
            traces: snapshot.traces,
            metrics: snapshot.metrics,
            logs: snapshot.logs,
        },
        credential: snapshot.credential,
    })
}
