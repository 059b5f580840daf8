//! Exporter configuration: backends, compression and retry policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Request body compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    #[default]
    Gzip,
}

/// One OTLP/HTTP backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    /// Name used in logs and statistics.
    #[serde(default = "default_backend_name")]
    #[validate(length(min = 1))]
    pub name: String,
    /// Base URL; the signal path (`/v1/traces`, ...) is appended.
    #[validate(url)]
    pub endpoint: String,
    /// Body compression.
    #[serde(default)]
    pub compression: Compression,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Attach the bearer credential from the authenticator.
    #[serde(default = "default_true")]
    pub authenticate: bool,
}

fn default_backend_name() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl BackendConfig {
    /// Creates a gzip-compressed, authenticated backend for `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            name: default_backend_name(),
            endpoint: endpoint.into(),
            compression: Compression::Gzip,
            headers: BTreeMap::new(),
            authenticate: true,
        }
    }

    /// Sets the backend name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

/// Retry policy for transient export failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_retry_config"))]
pub struct RetryConfig {
    /// Total attempts per batch and backend, including the first.
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "super::duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for a single delay.
    #[serde(with = "super::duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Give up once retrying would exceed this much time since the first attempt.
    #[serde(with = "super::duration_ms")]
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_elapsed_time: Duration::from_millis(300_000),
        }
    }
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ValidationError> {
    if config.initial_delay > config.max_delay {
        return Err(ValidationError::new("initial_above_max")
            .with_message("initial_delay must not exceed max_delay".into()));
    }
    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ValidationError::new("multiplier_below_one")
            .with_message("multiplier must be a finite number >= 1.0".into()));
    }
    Ok(())
}

/// Exporter settings shared by all pipelines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ExporterConfig {
    /// Backends every batch is delivered to.
    #[validate(nested)]
    pub backends: Vec<BackendConfig>,
    /// Retry policy.
    #[validate(nested)]
    pub retry: RetryConfig,
}
