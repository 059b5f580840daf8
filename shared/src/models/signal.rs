//! Signal kinds handled by the collector.

use serde::{Deserialize, Serialize};

/// The three OTLP signal kinds. Each kind gets its own pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Distributed tracing spans.
    Traces,
    /// Metric data points.
    Metrics,
    /// Log records.
    Logs,
}

impl SignalKind {
    /// All signal kinds, in pipeline start order.
    pub const ALL: [SignalKind; 3] = [Self::Traces, Self::Metrics, Self::Logs];

    /// Returns the lowercase name used in configuration, logs and health output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }

    /// Returns the OTLP/HTTP path for this signal.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::models::SignalKind;
    ///
    /// assert_eq!(SignalKind::Metrics.path(), "/v1/metrics");
    /// ```
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Traces => "/v1/traces",
            Self::Metrics => "/v1/metrics",
            Self::Logs => "/v1/logs",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
