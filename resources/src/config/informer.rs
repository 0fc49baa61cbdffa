use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::informer::ListOptions;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InformerConfig {
    /// Period between two resyncs of the whole cache.
    /// In milliseconds. 0 disables resync. Default: 0
    pub resync_period_ms: u64,
    /// Maximum number of distinct keys waiting in the delta queue
    /// before the watcher is throttled. Default: 1024
    pub queue_capacity: usize,
    /// Retry policy of the list/watch loop.
    pub backoff: BackoffConfig,
    /// Selectors applied to both list and watch requests.
    pub list_options: ListOptions,
}

impl Default for InformerConfig {
    fn default() -> Self {
        InformerConfig {
            resync_period_ms: 0,
            queue_capacity: 1024,
            backoff: BackoffConfig::default(),
            list_options: ListOptions::default(),
        }
    }
}

impl InformerConfig {
    pub fn resync_period(&self) -> Option<Duration> {
        match self.resync_period_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period_ms = period.as_millis() as u64;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    /// In milliseconds. Default: 1 sec
    pub initial_ms: u64,
    /// Upper bound of the retry delay.
    /// In milliseconds. Default: 60 sec
    pub max_ms: u64,
    /// Growth factor applied after every failed attempt. Default: 2
    pub factor: f64,
    /// Fraction of the delay that is randomized away, between 0 and 1.
    /// Default: 0.2
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_ms: 1000,
            max_ms: 60_000,
            factor: 2.0,
            jitter: 0.2,
        }
    }
}
