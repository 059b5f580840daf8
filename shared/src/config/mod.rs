//! Collector configuration schema.
//!
//! Configuration is read from a JSON document. Every section has defaults, so
//! an empty object is a valid configuration apart from the exporter backend,
//! which must be given either in the file or through the server's environment.
//! Durations are written as integer milliseconds.
//!
//! # Example
//!
//! ```
//! use shared::config::CollectorConfig;
//!
//! let config = CollectorConfig::from_json_str(r#"{
//!     "resource": { "service_name": "edge-collector", "environment": "staging" },
//!     "pipelines": { "traces": { "batch": { "max_export_batch_size": 256 } } },
//!     "exporter": { "backends": [ { "endpoint": "https://otlp.example.com" } ] }
//! }"#).unwrap();
//!
//! assert_eq!(config.pipelines.traces.batch.max_export_batch_size, 256);
//! assert_eq!(config.pipelines.logs.batch.max_export_batch_size, 512);
//! ```

pub mod auth;
pub mod duration_ms;
pub mod exporter;
pub mod pipeline;
pub mod processor;
pub mod resource;

pub use auth::{AuthConfig, ClientAuthMethod};
pub use exporter::{BackendConfig, Compression, ExporterConfig, RetryConfig};
pub use pipeline::{
    BatchConfig, MemoryLimit, MemoryLimiterConfig, PipelineConfig, PipelinesConfig,
    QueueFullPolicy,
};
pub use processor::{AttributeAction, AttributeRule, ProcessorConfig, DEFAULT_PLACEHOLDER};
pub use resource::ResourceConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Complete collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CollectorConfig {
    /// Process resource defaults.
    #[validate(nested)]
    pub resource: ResourceConfig,
    /// Per-signal pipelines.
    #[validate(nested)]
    pub pipelines: PipelinesConfig,
    /// OAuth2 client credentials. Exports are unauthenticated when absent.
    #[validate(nested)]
    pub auth: Option<AuthConfig>,
    /// Export backends and retry policy.
    #[validate(nested)]
    pub exporter: ExporterConfig,
    /// Time allowed for draining the exporters on shutdown.
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            resource: ResourceConfig::default(),
            pipelines: PipelinesConfig::default(),
            auth: None,
            exporter: ExporterConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl CollectorConfig {
    /// Parses and checks a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this schema or
    /// fails [`CollectorConfig::check`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Reads, parses and checks a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if [`CollectorConfig::read_file`] or
    /// [`CollectorConfig::check`] fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.check()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file without checking it, so
    /// overrides can be applied first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Validates field ranges, cross-field constraints and the presence of
    /// at least one export backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::NoBackends`].
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.exporter.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        Ok(())
    }
}
