use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Capped exponential backoff with jitter.
#[derive(Debug)]
pub(super) struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub(super) fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
        }
    }

    pub(super) fn next_delay(&mut self) -> Duration {
        let factor = self.config.factor.max(1.0);
        let base = (self.config.initial_ms as f64) * factor.powi(self.attempt as i32);
        let capped = base.min(self.config.max_ms as f64).max(0.0);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            capped * (1.0 - jitter * rand::thread_rng().gen::<f64>())
        } else {
            capped
        };
        Duration::from_millis(delay as u64)
    }

    pub(super) fn reset(&mut self) {
        self.attempt = 0;
    }
}
