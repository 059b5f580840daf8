//! API route definitions.
//!
//! This module organizes all HTTP routes for the otelgate server.

mod health;
mod otlp;

pub use health::{health_routes, HealthResponse, Pipelines};
pub use otlp::{otlp_routes, ExportResponse, OtlpError, OtlpRejection, PartialSuccess};
