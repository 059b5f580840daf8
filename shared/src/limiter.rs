//! Memory-based admission control.
//!
//! Each pipeline owns a [`MemoryLimiter`] that tracks the bytes reserved by
//! records that were admitted but not yet exported or dropped. Admissions are
//! refused once usage reaches the hard limit, and keep being refused until
//! usage falls below the soft limit again.

use crate::config::MemoryLimiterConfig;
use crate::error::{LimitResolveError, PipelineError, RejectReason};
use crate::models::SignalKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimiterState {
    /// Usage below the soft limit.
    Normal,
    /// Usage between the soft and hard limits; admissions still accepted.
    Degraded,
    /// Admissions refused until usage drops below the soft limit.
    Refusing,
}

impl LimiterState {
    /// Next state for the given usage. `Refusing` is sticky until usage drops
    /// below `soft`.
    fn next(self, usage: usize, soft: usize, hard: usize) -> Self {
        if usage >= hard {
            Self::Refusing
        } else if usage < soft {
            Self::Normal
        } else if self == Self::Refusing {
            Self::Refusing
        } else {
            Self::Degraded
        }
    }
}

impl std::fmt::Display for LimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Degraded => write!(f, "degraded"),
            Self::Refusing => write!(f, "refusing"),
        }
    }
}

/// Reads `MemTotal` from `/proc/meminfo`.
///
/// Returns `None` where the file is unavailable (non-Linux hosts).
#[must_use]
pub fn total_system_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&meminfo)
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line
        .trim_start_matches("MemTotal:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    kib.checked_mul(1024)
}

/// Tracks reserved bytes for one pipeline and decides admissions.
#[derive(Debug)]
pub struct MemoryLimiter {
    kind: SignalKind,
    soft_limit: usize,
    hard_limit: usize,
    usage: AtomicUsize,
    state: Mutex<LimiterState>,
    rejected_admissions: AtomicU64,
    refused_records: AtomicU64,
}

impl MemoryLimiter {
    /// Creates a limiter with absolute thresholds in bytes.
    #[must_use]
    pub fn new(kind: SignalKind, soft_limit: usize, hard_limit: usize) -> Self {
        Self {
            kind,
            soft_limit,
            hard_limit,
            usage: AtomicUsize::new(0),
            state: Mutex::new(LimiterState::Normal),
            rejected_admissions: AtomicU64::new(0),
            refused_records: AtomicU64::new(0),
        }
    }

    /// Creates a limiter from configuration, resolving percentage limits
    /// against total system memory.
    ///
    /// # Errors
    ///
    /// Returns an error if a percentage cannot be resolved or the resolved
    /// soft limit is not below the hard limit.
    pub fn from_config(
        kind: SignalKind,
        config: &MemoryLimiterConfig,
    ) -> Result<Self, LimitResolveError> {
        let total = total_system_memory();
        let soft = config.soft_limit.resolve(total)?;
        let hard = config.hard_limit.resolve(total)?;
        if soft >= hard {
            return Err(LimitResolveError::SoftNotBelowHard { soft, hard });
        }
        let to_usize = |v: u64| usize::try_from(v).unwrap_or(usize::MAX);
        Ok(Self::new(kind, to_usize(soft), to_usize(hard)))
    }

    fn transition(&self, state: &mut LimiterState) -> LimiterState {
        let usage = self.usage.load(Ordering::Acquire);
        let next = state.next(usage, self.soft_limit, self.hard_limit);
        if next != *state {
            match next {
                LimiterState::Refusing => tracing::warn!(
                    signal = %self.kind,
                    usage,
                    hard_limit = self.hard_limit,
                    "Memory limiter refusing admissions"
                ),
                LimiterState::Degraded => tracing::warn!(
                    signal = %self.kind,
                    usage,
                    soft_limit = self.soft_limit,
                    "Memory usage above soft limit"
                ),
                LimiterState::Normal => tracing::info!(
                    signal = %self.kind,
                    usage,
                    "Memory usage back to normal"
                ),
            }
            *state = next;
        }
        next
    }

    /// Reserves `bytes` for `records` records, or refuses them.
    ///
    /// The decision is made on the usage before the reservation, so the call
    /// that crosses the hard limit is still admitted and the following ones
    /// are refused. A refusal increments `rejected_admissions` by one and
    /// `refused_records` by `records`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AdmissionRejected`] while refusing.
    pub fn admit(&self, bytes: usize, records: usize) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.transition(&mut state) == LimiterState::Refusing {
            self.rejected_admissions.fetch_add(1, Ordering::Relaxed);
            self.refused_records
                .fetch_add(records as u64, Ordering::Relaxed);
            return Err(PipelineError::AdmissionRejected {
                kind: self.kind,
                reason: RejectReason::MemoryLimit,
            });
        }
        self.usage.fetch_add(bytes, Ordering::AcqRel);
        Ok(())
    }

    /// Returns previously reserved bytes.
    pub fn release(&self, bytes: usize) {
        let _ = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Re-evaluates the state against current usage.
    pub fn check(&self) -> LimiterState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition(&mut state)
    }

    /// Current state, as of the last evaluation.
    #[must_use]
    pub fn state(&self) -> LimiterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently reserved bytes.
    #[must_use]
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    /// Soft limit in bytes.
    #[must_use]
    pub fn soft_limit(&self) -> usize {
        self.soft_limit
    }

    /// Hard limit in bytes.
    #[must_use]
    pub fn hard_limit(&self) -> usize {
        self.hard_limit
    }

    /// Number of refused admission calls.
    #[must_use]
    pub fn rejected_admissions(&self) -> u64 {
        self.rejected_admissions.load(Ordering::Relaxed)
    }

    /// Number of records in refused admission calls.
    #[must_use]
    pub fn refused_records(&self) -> u64 {
        self.refused_records.load(Ordering::Relaxed)
    }

    /// Spawns the periodic state check, stopped by `cancel`.
    pub fn spawn_checker(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.check();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_reserves_bytes() {
        let limiter = MemoryLimiter::new(SignalKind::Traces, 100, 200);
        limiter.admit(50, 1).unwrap();
        assert_eq!(limiter.usage(), 50);
        assert_eq!(limiter.state(), LimiterState::Normal);
        limiter.release(20);
        assert_eq!(limiter.usage(), 30);
    }

    #[test]
    fn test_release_saturates() {
        let limiter = MemoryLimiter::new(SignalKind::Logs, 100, 200);
        limiter.admit(10, 1).unwrap();
        limiter.release(50);
        assert_eq!(limiter.usage(), 0);
    }

    #[test]
    fn test_refuses_after_crossing_hard_limit() {
        let limiter = MemoryLimiter::new(SignalKind::Traces, 100, 200);
        limiter.admit(150, 1).unwrap();
        assert_eq!(limiter.check(), LimiterState::Degraded);

        // crosses the hard limit; decided on usage before the reservation
        limiter.admit(100, 1).unwrap();

        let err = limiter.admit(1, 3).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AdmissionRejected {
                reason: RejectReason::MemoryLimit,
                ..
            }
        ));
        tokio_test::assert_err!(limiter.admit(1, 2));
        assert_eq!(limiter.rejected_admissions(), 2);
        assert_eq!(limiter.refused_records(), 5);
        assert_eq!(limiter.usage(), 250);
    }

    #[test]
    fn test_hysteresis_recovers_only_below_soft_limit() {
        let limiter = MemoryLimiter::new(SignalKind::Metrics, 100, 200);
        limiter.admit(200, 1).unwrap();
        assert_eq!(limiter.check(), LimiterState::Refusing);

        limiter.release(50);
        assert_eq!(limiter.check(), LimiterState::Refusing);
        assert!(limiter.admit(1, 1).is_err());

        limiter.release(60);
        assert_eq!(limiter.check(), LimiterState::Normal);
        tokio_test::assert_ok!(limiter.admit(1, 1));
    }

    #[test]
    fn test_parse_mem_total() {
        let meminfo = "MemTotal:       16303460 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_mem_total(meminfo), Some(16_303_460 * 1024));
        assert_eq!(parse_mem_total("MemFree: 1 kB"), None);
    }

    #[test]
    fn test_from_config_rejects_inverted_limits() {
        use crate::config::MemoryLimit;
        let config = MemoryLimiterConfig {
            soft_limit: MemoryLimit::Bytes(500),
            hard_limit: MemoryLimit::Bytes(400),
            ..MemoryLimiterConfig::default()
        };
        let err = MemoryLimiter::from_config(SignalKind::Logs, &config).unwrap_err();
        assert_eq!(err, LimitResolveError::SoftNotBelowHard { soft: 500, hard: 400 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_checker_observes_recovery() {
        let limiter = Arc::new(MemoryLimiter::new(SignalKind::Traces, 100, 200));
        limiter.admit(250, 1).unwrap();
        limiter.check();
        let cancel = CancellationToken::new();
        let handle = limiter.spawn_checker(Duration::from_secs(1), cancel.clone());

        limiter.release(250);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.state(), LimiterState::Normal);

        cancel.cancel();
        handle.await.unwrap();
    }
}
