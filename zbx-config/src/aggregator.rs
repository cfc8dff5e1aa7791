//! Metrics aggregator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters used for aggregation and flushing.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// The interval between two flushes in milliseconds.
    ///
    /// Counters are reported as a rate per second over this interval. Defaults to `10000`.
    pub flush_interval: u64,

    /// The percentile reported as `upper_<percentile>` for every timer, between `0` and `100`.
    ///
    /// Also determines which samples contribute to the reported mean. Defaults to `90`.
    pub percentile_threshold: u8,

    /// Flush all aggregated values one last time during graceful shutdown.
    ///
    /// Defaults to `false`, which drops everything aggregated since the last flush.
    pub flush_on_shutdown: bool,
}

impl AggregatorConfig {
    /// Returns the flush interval as [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval)
    }

    /// Returns the name of the first invalid field, if any.
    pub(crate) fn invalid_field(&self) -> Option<&'static str> {
        if self.flush_interval == 0 {
            Some("aggregator.flush_interval")
        } else if self.percentile_threshold > 100 {
            Some("aggregator.percentile_threshold")
        } else {
            None
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10_000,
            percentile_threshold: 90,
            flush_on_shutdown: false,
        }
    }
}
