use zbx_statsd::{CounterMetric, HistogramMetric, TimerMetric};

/// Counter metrics used by the relay server.
pub enum ServerCounters {
    /// Number of times the server was started.
    ServerStarting,

    /// Number of datagrams received on the UDP socket.
    DatagramReceived,

    /// Number of lines that could not be decoded and were dropped.
    ///
    /// This metric is tagged with:
    ///  - `reason`: The reason the line was rejected, see `ParseSampleErrorKind`.
    SampleInvalid,

    /// Number of batches sent to the trapper.
    ///
    /// This metric is tagged with:
    ///  - `result`: `success` or the kind of error that occurred, one of `transport`,
    ///    `timeout`, `protocol` and `rejected`.
    FlushResult,

    /// Number of items the trapper reported as failed in an accepted batch.
    ItemsFailed,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            ServerCounters::ServerStarting => "server.starting",
            ServerCounters::DatagramReceived => "ingest.datagram.received",
            ServerCounters::SampleInvalid => "ingest.sample.invalid",
            ServerCounters::FlushResult => "flush.result",
            ServerCounters::ItemsFailed => "flush.items.failed",
        }
    }
}

/// Histogram metrics used by the relay server.
pub enum ServerHistograms {
    /// Size of received datagrams in bytes.
    DatagramSize,

    /// Number of points in a flushed batch.
    BatchPoints,
}

impl HistogramMetric for ServerHistograms {
    fn name(&self) -> &'static str {
        match self {
            ServerHistograms::DatagramSize => "ingest.datagram.size",
            ServerHistograms::BatchPoints => "flush.batch.points",
        }
    }
}

/// Timer metrics used by the relay server.
pub enum ServerTimers {
    /// Total time spent in one flush, from draining the aggregator to the acknowledgement.
    FlushDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            ServerTimers::FlushDuration => "flush.duration",
        }
    }
}
