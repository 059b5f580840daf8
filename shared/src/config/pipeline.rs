//! Per-signal pipeline configuration: batching, memory limits and processing.

use super::processor::ProcessorConfig;
use crate::error::LimitResolveError;
use crate::models::SignalKind;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// What the batcher does with an admission that would overflow the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Refuse the incoming call as a whole.
    #[default]
    RejectNewest,
    /// Drop the oldest queued records to make room.
    DropOldest,
}

/// Batcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_batch_config"))]
pub struct BatchConfig {
    /// Maximum number of records waiting to be batched.
    #[validate(range(min = 1))]
    pub max_queue_size: usize,
    /// Longest time a record waits in the queue before its batch is cut.
    #[serde(with = "super::duration_ms")]
    pub schedule_delay: Duration,
    /// Maximum number of records per batch.
    #[validate(range(min = 1))]
    pub max_export_batch_size: usize,
    /// Upper bound for a single export send.
    #[serde(with = "super::duration_ms")]
    pub export_timeout: Duration,
    /// Completed batches that may wait for an export worker.
    #[validate(range(min = 1))]
    pub max_pending_batches: usize,
    /// Behaviour when the queue is full.
    pub queue_full_policy: QueueFullPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            schedule_delay: Duration::from_millis(5000),
            max_export_batch_size: 512,
            export_timeout: Duration::from_millis(30_000),
            max_pending_batches: 4,
            queue_full_policy: QueueFullPolicy::RejectNewest,
        }
    }
}

fn validate_batch_config(config: &BatchConfig) -> Result<(), ValidationError> {
    if config.max_export_batch_size > config.max_queue_size {
        return Err(ValidationError::new("batch_exceeds_queue")
            .with_message("max_export_batch_size must not exceed max_queue_size".into()));
    }
    if config.schedule_delay.is_zero() {
        return Err(ValidationError::new("zero_schedule_delay")
            .with_message("schedule_delay must be greater than zero".into()));
    }
    if config.export_timeout.is_zero() {
        return Err(ValidationError::new("zero_export_timeout")
            .with_message("export_timeout must be greater than zero".into()));
    }
    Ok(())
}

/// A memory threshold, either absolute or relative to total system memory.
///
/// Written in configuration as a byte count (`104857600`), a byte count with
/// a binary suffix (`"100MiB"`) or a percentage (`"80%"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Absolute number of bytes.
    Bytes(u64),
    /// Percentage (1-100) of total system memory.
    Percent(u8),
}

impl MemoryLimit {
    /// Resolves the limit to bytes.
    ///
    /// `total_memory` is only consulted for percentages.
    ///
    /// # Errors
    ///
    /// Returns an error if the limit is a percentage and total memory is unknown.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::MemoryLimit;
    ///
    /// assert_eq!(MemoryLimit::Percent(50).resolve(Some(1000)).unwrap(), 500);
    /// assert_eq!(MemoryLimit::Bytes(42).resolve(None).unwrap(), 42);
    /// assert!(MemoryLimit::Percent(50).resolve(None).is_err());
    /// ```
    pub fn resolve(self, total_memory: Option<u64>) -> Result<u64, LimitResolveError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Percent(percent) => total_memory
                .map(|total| total / 100 * u64::from(percent))
                .ok_or(LimitResolveError::TotalMemoryUnknown),
        }
    }
}

impl FromStr for MemoryLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            let value: u8 = percent
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentage '{s}'"))?;
            if value == 0 || value > 100 {
                return Err(format!("percentage must be within 1-100, got {value}"));
            }
            return Ok(Self::Percent(value));
        }

        let (number, multiplier) = [("GiB", 1u64 << 30), ("MiB", 1 << 20), ("KiB", 1 << 10)]
            .iter()
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
            .unwrap_or((s, 1));
        let value: u64 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid memory limit '{s}'"))?;
        value
            .checked_mul(multiplier)
            .map(Self::Bytes)
            .ok_or_else(|| format!("memory limit '{s}' overflows"))
    }
}

impl Serialize for MemoryLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bytes(bytes) => serializer.serialize_u64(*bytes),
            Self::Percent(percent) => serializer.serialize_str(&format!("{percent}%")),
        }
    }
}

impl<'de> Deserialize<'de> for MemoryLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(Self::Bytes(bytes)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// Memory limiter thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_memory_limits"))]
pub struct MemoryLimiterConfig {
    /// Usage below which a refusing limiter recovers.
    pub soft_limit: MemoryLimit,
    /// Usage at which the limiter starts refusing admissions.
    pub hard_limit: MemoryLimit,
    /// Interval of the background state check.
    #[serde(with = "super::duration_ms")]
    pub check_interval: Duration,
}

impl Default for MemoryLimiterConfig {
    fn default() -> Self {
        Self {
            soft_limit: MemoryLimit::Bytes(96 * 1024 * 1024),
            hard_limit: MemoryLimit::Bytes(128 * 1024 * 1024),
            check_interval: Duration::from_secs(1),
        }
    }
}

fn validate_memory_limits(config: &MemoryLimiterConfig) -> Result<(), ValidationError> {
    let ordered = match (config.soft_limit, config.hard_limit) {
        (MemoryLimit::Bytes(soft), MemoryLimit::Bytes(hard)) => soft < hard,
        (MemoryLimit::Percent(soft), MemoryLimit::Percent(hard)) => soft < hard,
        // mixed units are checked once resolved against system memory
        _ => true,
    };
    if !ordered {
        return Err(ValidationError::new("soft_not_below_hard")
            .with_message("soft_limit must be below hard_limit".into()));
    }
    if config.check_interval.is_zero() {
        return Err(ValidationError::new("zero_check_interval")
            .with_message("check_interval must be greater than zero".into()));
    }
    Ok(())
}

/// Configuration of one signal pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batching behaviour.
    #[validate(nested)]
    pub batch: BatchConfig,
    /// Admission control.
    #[validate(nested)]
    pub memory_limiter: MemoryLimiterConfig,
    /// Attribute actions applied before batching.
    #[validate(nested)]
    pub processor: ProcessorConfig,
    /// Number of concurrent export workers.
    #[validate(range(min = 1, max = 64))]
    pub export_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            memory_limiter: MemoryLimiterConfig::default(),
            processor: ProcessorConfig::default(),
            export_workers: 1,
        }
    }
}

/// Pipeline configuration for all three signal kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelinesConfig {
    /// Traces pipeline.
    #[validate(nested)]
    pub traces: PipelineConfig,
    /// Metrics pipeline.
    #[validate(nested)]
    pub metrics: PipelineConfig,
    /// Logs pipeline.
    #[validate(nested)]
    pub logs: PipelineConfig,
}

impl PipelinesConfig {
    /// Returns the configuration of the given signal's pipeline.
    #[must_use]
    pub fn get(&self, kind: SignalKind) -> &PipelineConfig {
        match kind {
            SignalKind::Traces => &self.traces,
            SignalKind::Metrics => &self.metrics,
            SignalKind::Logs => &self.logs,
        }
    }

    /// Returns a mutable reference to the given signal's pipeline configuration.
    pub fn get_mut(&mut self, kind: SignalKind) -> &mut PipelineConfig {
        match kind {
            SignalKind::Traces => &mut self.traces,
            SignalKind::Metrics => &mut self.metrics,
            SignalKind::Logs => &mut self.logs,
        }
    }
}
