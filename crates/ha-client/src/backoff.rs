//! Exponential backoff with ±20% jitter for hub reconnection.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Tracks the current delay across successive reconnect attempts. Resets to
/// `initial` once a connection has stayed up long enough to be considered
/// stable (the caller decides "stable"; this type just exposes `reset`).
#[derive(Debug, Clone)]
pub struct Backoff {
    cfg: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(cfg: BackoffConfig) -> Self {
        Backoff { cfg, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for the next attempt, with ±20% jitter around the computed
    /// exponential delay. Advances the internal attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.cfg.multiplier.powi(self.attempt as i32);
        let uncapped = self.cfg.initial.mul_f64(exp);
        let capped = uncapped.min(self.cfg.max);
        self.attempt = self.attempt.saturating_add(1);

        let base_millis = capped.as_millis().max(1) as u64;
        let jitter_span = (base_millis as f64 * 0.2) as u64;
        let jittered_millis = rand::thread_rng().gen_range(
            base_millis.saturating_sub(jitter_span)..=base_millis.saturating_add(jitter_span),
        );
        Duration::from_millis(jittered_millis).min(self.cfg.max)
    }
}
