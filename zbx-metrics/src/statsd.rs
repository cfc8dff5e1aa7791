use zbx_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Counter metrics for the aggregation store.
pub enum MetricCounters {
    /// Incremented for every sample merged into the aggregator.
    ///
    /// This metric is tagged with:
    ///  - `kind`: Either `counter` or `timer`.
    SamplesMerged,

    /// Incremented by the number of keys that were still held when the aggregator stopped.
    ///
    /// This only happens when the server shuts down without a final flush.
    KeysDropped,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::SamplesMerged => "metrics.samples.merged",
            Self::KeysDropped => "metrics.keys.dropped",
        }
    }
}

/// Timer metrics for the aggregation store.
pub enum MetricTimers {
    /// Time in milliseconds spent handling a single message in the aggregator service.
    ///
    /// This metric is tagged with:
    ///  - `message`: The name of the handled message.
    AggregatorServiceDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::AggregatorServiceDuration => "metrics.aggregator.message.duration",
        }
    }
}

/// Histogram metrics for the aggregation store.
pub enum MetricHistograms {
    /// The number of keys taken out of the aggregator in one drain.
    ///
    /// This metric is tagged with:
    ///  - `kind`: Either `counter` or `timer`.
    KeysDrained,

    /// The number of raw samples held by a timer key at drain time.
    TimerSamples,
}

impl HistogramMetric for MetricHistograms {
    fn name(&self) -> &'static str {
        match *self {
            Self::KeysDrained => "metrics.keys.drained",
            Self::TimerSamples => "metrics.timer.samples",
        }
    }
}

/// Gauge metrics for the aggregation store.
pub enum MetricGauges {
    /// The number of distinct keys currently held by the aggregator.
    ///
    /// This metric is tagged with:
    ///  - `kind`: Either `counter` or `timer`.
    Keys,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Keys => "metrics.keys",
        }
    }
}
