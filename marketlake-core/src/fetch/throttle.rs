//! Request pacing and rate-limit cooldowns shared by every worker.
//!
//! Two rules gate each outgoing request:
//! - consecutive requests are spaced at least `min_interval` apart
//!   (a 5-calls/minute plan needs 12 s), enforced by a `governor` limiter;
//! - after the provider answers 429, nobody sends anything until the
//!   cooldown expires.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Shared gate in front of the provider.
pub struct RequestThrottle {
    pacer: Option<DefaultDirectRateLimiter>,
    clock: DefaultClock,
    min_interval: Duration,
    cooldown_until: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        // Burst of one: every request waits a full period after the previous one.
        let pacer = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            pacer,
            clock: DefaultClock::default(),
            min_interval,
            cooldown_until: Mutex::new(None),
        }
    }

    /// No pacing; cooldowns still apply.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Block until a request may be sent, then claim the slot.
    pub fn acquire(&self) {
        loop {
            let cooldown = self.remaining_cooldown();
            if !cooldown.is_zero() {
                std::thread::sleep(cooldown);
                continue;
            }
            let Some(pacer) = &self.pacer else {
                return;
            };
            match pacer.check() {
                Ok(()) => return,
                Err(not_until) => std::thread::sleep(not_until.wait_time_from(self.clock.now())),
            }
        }
    }

    /// Hold all requests for `cooldown`. Never shortens an active cooldown.
    pub fn impose_cooldown(&self, cooldown: Duration) {
        let until = Instant::now() + cooldown;
        let mut state = self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        *state = Some(match *state {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Time left on the active cooldown (zero if none).
    pub fn remaining_cooldown(&self) -> Duration {
        let state = self.cooldown_until.lock().unwrap_or_else(|e| e.into_inner());
        state
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("min_interval", &self.min_interval)
            .field("remaining_cooldown", &self.remaining_cooldown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unpaced_gate_does_not_block() {
        let gate = RequestThrottle::unpaced();
        let start = Instant::now();
        for _ in 0..10 {
            gate.acquire();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn pacing_spaces_requests() {
        let gate = RequestThrottle::new(Duration::from_millis(20));
        let start = Instant::now();
        gate.acquire();
        gate.acquire();
        gate.acquire();
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[test]
    fn pacing_is_shared_across_threads() {
        let gate = Arc::new(RequestThrottle::new(Duration::from_millis(15)));
        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || gate.acquire())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn cooldown_blocks_until_expiry() {
        let gate = RequestThrottle::unpaced();
        gate.impose_cooldown(Duration::from_millis(30));
        assert!(gate.remaining_cooldown() > Duration::ZERO);
        let start = Instant::now();
        gate.acquire();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(gate.remaining_cooldown(), Duration::ZERO);
    }

    #[test]
    fn shorter_cooldown_does_not_shrink_longer_one() {
        let gate = RequestThrottle::unpaced();
        gate.impose_cooldown(Duration::from_secs(60));
        gate.impose_cooldown(Duration::from_millis(1));
        assert!(gate.remaining_cooldown() > Duration::from_secs(50));
    }
}
