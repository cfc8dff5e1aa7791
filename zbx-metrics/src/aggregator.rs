//! In-memory aggregation of counters and timers between two flushes.

use std::collections::{HashMap, HashSet};
use std::mem;

use crate::protocol::{MetricKey, Sample, SampleValue};

/// The contents of an [`Aggregator`] taken out by [`Aggregator::drain_all`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Drained {
    /// Accumulated counter totals since the previous drain.
    pub counters: HashMap<MetricKey, f64>,
    /// Raw timer samples in milliseconds, in insertion order.
    pub timers: HashMap<MetricKey, Vec<i64>>,
}

impl Drained {
    /// Returns `true` if neither counters nor timers were drained.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty()
    }
}

/// Running counters and timers keyed by [`MetricKey`].
///
/// A key exists only once it received a sample. Timers cease to exist when the aggregator is
/// drained. A counter that received samples before a drain is reported with a total of `0` by the
/// next drain if it stays quiet, and is forgotten after that. This way a counter that stops
/// reporting drops to zero in the backend instead of repeating its last rate.
///
/// The aggregator itself is not synchronized; the [`AggregatorService`] owns it and serializes
/// all access.
///
/// [`AggregatorService`]: crate::AggregatorService
#[derive(Debug, Default)]
pub struct Aggregator {
    counters: HashMap<MetricKey, f64>,
    timers: HashMap<MetricKey, Vec<i64>>,
    /// Counters that received samples before the last drain.
    reported: HashSet<MetricKey>,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the counter at `key`, creating it on first use.
    pub fn increment_counter(&mut self, key: MetricKey, delta: f64) {
        *self.counters.entry(key).or_insert(0.0) += delta;
    }

    /// Appends a timing in milliseconds to the timer at `key`, creating it on first use.
    pub fn append_timer(&mut self, key: MetricKey, sample_ms: i64) {
        self.timers.entry(key).or_default().push(sample_ms);
    }

    /// Inserts a decoded sample.
    pub fn insert(&mut self, sample: Sample) {
        match sample.value {
            SampleValue::Counter(delta) => self.increment_counter(sample.key, delta),
            SampleValue::Timer(sample_ms) => self.append_timer(sample.key, sample_ms),
        }
    }

    /// Takes all counters and timers, leaving the aggregator empty.
    ///
    /// Counters that were drained with samples last time but received none since are included
    /// with a total of `0`.
    pub fn drain_all(&mut self) -> Drained {
        let mut counters = mem::take(&mut self.counters);
        let previous = mem::replace(&mut self.reported, counters.keys().cloned().collect());

        for key in previous {
            counters.entry(key).or_insert(0.0);
        }

        Drained {
            counters,
            timers: mem::take(&mut self.timers),
        }
    }

    /// Returns the number of counter keys.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Returns the number of timer keys.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Returns `true` if the aggregator holds no keys.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty()
    }
}
