//! Exponential backoff policy.

use rand::Rng;
use std::time::Duration;

/// How many times to try, how long to wait between tries, and how to treat
/// rate-limit hints.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed, in `[0, 1)`.
    pub jitter: f64,
    /// Cooldown after a 429 that carries no `Retry-After`.
    pub default_cooldown: Duration,
    /// Upper bound on any provider-supplied cooldown.
    pub max_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            default_cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting at all, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            default_cooldown: Duration::ZERO,
            max_cooldown: Duration::ZERO,
        }
    }

    /// Deterministic delay before retry number `retry` (1-based), before jitter.
    ///
    /// `base_delay * multiplier^(retry - 1)`, capped at `max_delay`.
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retry number `retry`, with jitter applied.
    pub fn backoff(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let spread = self.jitter.min(0.99);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        nominal.mul_f64(factor).min(self.max_delay)
    }

    /// Cooldown to impose after a 429, honoring the provider hint within bounds.
    pub fn cooldown(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.default_cooldown).min(self.max_cooldown)
    }
}
