use std::cmp;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 5_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Bounded exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True when another attempt may follow the zero-based `attempt`.
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// `min(max, base * 2^attempt)` before jitter.
    pub fn nominal_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        cmp::min(
            self.base_delay_ms.saturating_mul(factor),
            self.max_delay_ms,
        )
    }

    /// Delay before the retry that follows the zero-based `attempt`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay_ms(attempt) as f64;
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = if ratio > 0.0 {
            nominal * rng.gen_range(-ratio..=ratio)
        } else {
            0.0
        };
        Duration::from_millis((nominal + jitter).max(0.0).round() as u64)
    }
}
