//! Bounded exponential backoff for SQLite lock contention.
//!
//! Both the state store and the sensor reader funnel their database work
//! through [`retry_on_contention`]. Only `SQLITE_BUSY` / `SQLITE_LOCKED` are
//! retried; any other error is returned on the spot. The sleep step is a
//! trait object so tests can record delays instead of waiting.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::defaults;
use crate::error::{PipelineError, Result};

/// Retry budget: attempt count plus the delay curve between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay_ms`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Never fewer than one attempt, even if configured as zero.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Something that can pause the current thread.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration);
}

/// Real sleeping via `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Records requested delays without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        match self.delays.lock() {
            Ok(mut d) => d.push(delay),
            Err(poisoned) => poisoned.into_inner().push(delay),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-contention error, or the
/// budget runs out.
///
/// `op` receives the 1-based attempt number. On exhaustion the last
/// contention error is wrapped in [`PipelineError::StoreUnavailable`].
pub fn retry_on_contention<T, F>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    target: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(PipelineError::Database(err)) if crate::error::is_contention(&err) => {
                if attempt >= attempts {
                    error!(target_db = target, attempts, error = %err, "Retry budget exhausted");
                    return Err(PipelineError::StoreUnavailable {
                        target,
                        attempts,
                        source: err,
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    target_db = target,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Database busy, backing off"
                );
                sleeper.sleep(delay);
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> PipelineError {
        PipelineError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }

    #[test]
    fn test_delay_doubles_from_base() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = BackoffPolicy {
            max_delay_ms: 250,
            ..policy()
        };
        assert_eq!(p.delay_after(10), Duration::from_millis(250));
    }

    #[test]
    fn test_succeeds_after_transient_contention() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let value = retry_on_contention(&policy(), &sleeper, "test", |_| {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls, 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_exhaustion_wraps_last_cause() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let err = retry_on_contention::<(), _>(&policy(), &sleeper, "state store", |_| {
            calls += 1;
            Err(busy())
        })
        .unwrap_err();

        assert_eq!(calls, 5);
        assert_eq!(sleeper.delays().len(), 4, "no sleep after the final attempt");
        match err {
            PipelineError::StoreUnavailable { target, attempts, .. } => {
                assert_eq!(target, "state store");
                assert_eq!(attempts, 5);
            }
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_non_contention_error_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let err = retry_on_contention::<(), _>(&policy(), &sleeper, "test", |_| {
            calls += 1;
            Err(PipelineError::NotFound("gone".into()))
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(sleeper.delays().is_empty());
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let p = BackoffPolicy {
            max_attempts: 0,
            ..policy()
        };
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let _ = retry_on_contention::<(), _>(&p, &sleeper, "test", |_| {
            calls += 1;
            Err(busy())
        });
        assert_eq!(calls, 1);
    }
}
