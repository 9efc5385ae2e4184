//! Capped exponential backoff with jitter.
//!
//! One schedule is shared by pub reconnection (keyed by url) and by gossip
//! requests (keyed by hash x peer): `base * 2^(attempt-1)` capped at `cap`,
//! plus up to 20% random jitter on top.

use std::time::{Duration, Instant};

use rand::Rng;

/// Attempt counters saturate here so the exponent stays bounded.
pub const MAX_ATTEMPTS: u32 = 32;

/// Jitter is drawn from `[0, JITTER_FRACTION)` of the capped delay.
pub const JITTER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5 * 60),
        }
    }
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the next try, after `attempt` consecutive failures.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.capped(attempt);
        let jitter = delay.mul_f64(JITTER_FRACTION * rng.gen::<f64>());
        delay + jitter
    }

    /// The deterministic part of the delay (no jitter).
    pub fn capped(&self, attempt: u32) -> Duration {
        let attempt = attempt.clamp(1, MAX_ATTEMPTS);
        let factor = 1u64 << (attempt - 1);
        let base_ms = self.base.as_millis().max(1) as u64;
        let cap_ms = self.cap.as_millis().max(1) as u64;
        Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
    }
}

/// Retry state for a single key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffRecord {
    pub attempts: u32,
    /// `None` until the first failure: eligible immediately.
    pub next_eligible_at: Option<Instant>,
}

impl BackoffRecord {
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.next_eligible_at.map_or(true, |at| at <= now)
    }

    /// Counts one more attempt and pushes the eligibility horizon out.
    /// Returns the delay that was applied.
    pub fn record_attempt<R: Rng + ?Sized>(
        &mut self,
        schedule: &Backoff,
        now: Instant,
        rng: &mut R,
    ) -> Duration {
        self.attempts = (self.attempts + 1).min(MAX_ATTEMPTS);
        let delay = schedule.next_delay_with(self.attempts, rng);
        let at = now + delay;
        // never move the horizon backwards for the same key
        self.next_eligible_at = Some(match self.next_eligible_at {
            Some(prev) if prev > at => prev,
            _ => at,
        });
        delay
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
