//! Bounded exponential backoff around engine calls.

use std::{thread, time::Duration};

use log::warn;
use serde::Deserialize;

use crate::error::{ConfigurationError, EngineError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

/// Final failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: EngineError,
}

impl RetryPolicy {
    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }

    pub fn ensure_valid(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.multiplier >= 1.0) {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.multiplier".to_string(),
                reason: format!("must be >= 1.0, found {}", self.multiplier),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.max_backoff_ms".to_string(),
                reason: "cannot be smaller than initial_backoff_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. Only transient engine errors are retried.
    pub fn run<T, F>(&self, label: &str, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Result<T, EngineError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_after(attempt);
                    warn!(
                        "{label} failed (attempt {attempt}/{max_attempts}), retrying in {}ms: {}",
                        delay.as_millis(),
                        err.message()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }
}
