//! Retry backoff state
//!
//! Each network-facing boundary owns a `Backoff` that tracks the attempt count
//! and the instant at which the next attempt becomes eligible.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Jitter applied to the exponential delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the exponential delay as-is
    None,
    /// Pick uniformly from `[0, delay]`
    Full,
}

/// Exponential backoff with a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: Jitter,
    attempt: u32,
    next_eligible: Option<Instant>,
}

impl Backoff {
    /// Exponential backoff without jitter
    pub fn exponential(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: Jitter::None,
            attempt: 0,
            next_eligible: None,
        }
    }

    /// Exponential backoff with full jitter
    pub fn full_jitter(base: Duration, cap: Duration) -> Self {
        Self {
            jitter: Jitter::Full,
            ..Self::exponential(base, cap)
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// When the next attempt may run, if a delay is pending
    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    /// Un-jittered delay for the current attempt
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Compute the next delay and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        let delay = match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let max_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
                Duration::from_millis(rand::rng().random_range(0..=max_ms))
            }
        };

        self.attempt = self.attempt.saturating_add(1);
        self.next_eligible = Some(Instant::now() + delay);
        delay
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_eligible = None;
    }
}
