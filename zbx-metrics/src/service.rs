use zbx_system::{AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Sender, Service};

use crate::aggregator::{self, Drained};
use crate::protocol::Sample;
use crate::statsd::{MetricCounters, MetricGauges, MetricHistograms, MetricTimers};

/// A message containing decoded samples to merge into the aggregator.
#[derive(Debug)]
pub struct MergeSamples {
    samples: Vec<Sample>,
}

impl MergeSamples {
    /// Creates a new message containing a list of [`Sample`]s.
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Returns the samples in this message, consuming the message itself.
    pub fn samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// Takes all counters and timers out of the aggregator.
///
/// Responds with the [`Drained`] contents. Samples merged after this message are retained for
/// the next drain.
#[derive(Debug)]
pub struct DrainAll;

/// Requests the number of keys currently held by the aggregator.
#[derive(Debug)]
pub struct AggregatorStats;

/// The response to [`AggregatorStats`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    /// The number of counter keys.
    pub counters: usize,
    /// The number of timer keys.
    pub timers: usize,
}

/// Interface of the [`AggregatorService`].
#[derive(Debug)]
pub enum Aggregator {
    /// Merge samples into the running counters and timers.
    MergeSamples(MergeSamples),
    /// Take the current contents of the aggregator.
    DrainAll(DrainAll, Sender<Drained>),
    /// Report the number of keys held.
    AggregatorStats(AggregatorStats, Sender<StoreStats>),
}

impl Aggregator {
    /// Returns the name of the message variant.
    fn variant(&self) -> &'static str {
        match self {
            Aggregator::MergeSamples(_) => "MergeSamples",
            Aggregator::DrainAll(_, _) => "DrainAll",
            Aggregator::AggregatorStats(_, _) => "AggregatorStats",
        }
    }
}

impl Interface for Aggregator {}

impl FromMessage<MergeSamples> for Aggregator {
    type Response = NoResponse;

    fn from_message(message: MergeSamples, _: ()) -> Self {
        Self::MergeSamples(message)
    }
}

impl FromMessage<DrainAll> for Aggregator {
    type Response = AsyncResponse<Drained>;

    fn from_message(message: DrainAll, sender: Sender<Drained>) -> Self {
        Self::DrainAll(message, sender)
    }
}

impl FromMessage<AggregatorStats> for Aggregator {
    type Response = AsyncResponse<StoreStats>;

    fn from_message(message: AggregatorStats, sender: Sender<StoreStats>) -> Self {
        Self::AggregatorStats(message, sender)
    }
}

/// Service implementing the [`Aggregator`] interface.
///
/// The service is the single owner of the aggregation state. Messages are handled strictly one at
/// a time, so merging and draining never interleave. The service runs until all addresses to it
/// have been dropped, which allows a final drain during shutdown.
#[derive(Debug, Default)]
pub struct AggregatorService {
    aggregator: aggregator::Aggregator,
}

impl AggregatorService {
    /// Creates a new aggregator service with empty state.
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_merge_samples(&mut self, message: MergeSamples) {
        for sample in message.samples() {
            zbx_statsd::metric!(
                counter(MetricCounters::SamplesMerged) += 1,
                kind = sample.value.kind(),
            );
            self.aggregator.insert(sample);
        }
    }

    fn handle_drain_all(&mut self, sender: Sender<Drained>) {
        let drained = self.aggregator.drain_all();

        zbx_statsd::metric!(
            histogram(MetricHistograms::KeysDrained) = drained.counters.len() as u64,
            kind = "counter",
        );
        zbx_statsd::metric!(
            histogram(MetricHistograms::KeysDrained) = drained.timers.len() as u64,
            kind = "timer",
        );
        for samples in drained.timers.values() {
            zbx_statsd::metric!(histogram(MetricHistograms::TimerSamples) = samples.len() as u64);
        }

        zbx_log::trace!(
            counters = drained.counters.len(),
            timers = drained.timers.len(),
            "drained aggregator"
        );

        sender.send(drained);
    }

    fn handle_stats(&self, sender: Sender<StoreStats>) {
        let stats = StoreStats {
            counters: self.aggregator.counter_count(),
            timers: self.aggregator.timer_count(),
        };

        zbx_statsd::metric!(gauge(MetricGauges::Keys) = stats.counters as u64, kind = "counter");
        zbx_statsd::metric!(gauge(MetricGauges::Keys) = stats.timers as u64, kind = "timer");

        sender.send(stats);
    }

    fn handle_message(&mut self, message: Aggregator) {
        let ty = message.variant();
        zbx_statsd::metric!(
            timer(MetricTimers::AggregatorServiceDuration),
            message = ty,
            {
                match message {
                    Aggregator::MergeSamples(msg) => self.handle_merge_samples(msg),
                    Aggregator::DrainAll(_, sender) => self.handle_drain_all(sender),
                    Aggregator::AggregatorStats(_, sender) => self.handle_stats(sender),
                }
            }
        )
    }
}

impl Service for AggregatorService {
    type Interface = Aggregator;

    async fn run(mut self, mut rx: Receiver<Self::Interface>) {
        while let Some(message) = rx.recv().await {
            self.handle_message(message);
        }

        zbx_log::debug!("aggregator service stopped");
    }
}

impl Drop for AggregatorService {
    fn drop(&mut self) {
        let counters = self.aggregator.counter_count();
        let timers = self.aggregator.timer_count();
        let remaining = counters + timers;

        if remaining > 0 {
            zbx_log::warn!("metrics aggregator dropping {counters} counters and {timers} timers");
            zbx_statsd::metric!(counter(MetricCounters::KeysDropped) += remaining as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::protocol::{MetricKey, SampleValue};

    fn counter(delta: f64) -> Sample {
        Sample {
            key: MetricKey::new("web1", "app.hits"),
            value: SampleValue::Counter(delta),
            sample_rate: None,
        }
    }

    #[tokio::test]
    async fn test_merge_and_drain() {
        zbx_log::init_test!();

        let aggregator = AggregatorService::new().start_detached();
        aggregator.send(MergeSamples::new(vec![counter(1.0), counter(4.0)]));
        aggregator.send(MergeSamples::new(vec![
            Sample::parse(b"web1:app.latency:100|ms").unwrap(),
        ]));

        let stats = aggregator.send(AggregatorStats).await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                counters: 1,
                timers: 1
            }
        );

        let drained = aggregator.send(DrainAll).await.unwrap();
        assert_eq!(drained.counters[&MetricKey::new("web1", "app.hits")], 5.0);
        assert_eq!(drained.timers[&MetricKey::new("web1", "app.latency")], [100]);

        let drained = aggregator.send(DrainAll).await.unwrap();
        assert_eq!(drained.counters[&MetricKey::new("web1", "app.hits")], 0.0);
        assert!(drained.timers.is_empty());
    }

    #[tokio::test]
    async fn test_service_stops_without_addresses() {
        let (aggregator, handle) = AggregatorService::new().start_joinable();
        aggregator.send(MergeSamples::new(vec![counter(1.0)]));
        drop(aggregator);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_merge_emits_metrics() {
        let captures = zbx_statsd::with_capturing_test_client(|| {
            let mut service = AggregatorService::new();
            service.handle_merge_samples(MergeSamples::new(vec![counter(2.0)]));
            service.aggregator.drain_all();
        });

        assert_eq!(captures, ["metrics.samples.merged:1|c|#kind:counter"]);
    }

    #[test]
    fn test_drop_reports_remaining_keys() {
        let captures = zbx_statsd::with_capturing_test_client(|| {
            let mut service = AggregatorService::new();
            service.aggregator.increment_counter(MetricKey::new("a", "b"), 1.0);
            service.aggregator.append_timer(MetricKey::new("a", "c"), 1);
            drop(service);
        });

        assert_eq!(captures, ["metrics.keys.dropped:2|c"]);
    }

    /// Interleaves increments from concurrent producers with drains and checks that every
    /// increment is reported exactly once.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merge_and_drain() {
        const PRODUCERS: u64 = 4;
        const EVENTS: u64 = 500;

        let aggregator = AggregatorService::new().start_detached();

        let mut producers = Vec::new();
        for seed in 0..PRODUCERS {
            let aggregator = aggregator.clone();
            producers.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut total = 0.0;
                for _ in 0..EVENTS {
                    let delta = rng.random_range(1..=10) as f64;
                    total += delta;
                    aggregator.send(MergeSamples::new(vec![counter(delta)]));
                    if rng.random_bool(0.1) {
                        tokio::task::yield_now().await;
                    }
                }
                total
            }));
        }

        let drainer = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                let mut reported = 0.0;
                for _ in 0..50 {
                    let drained = aggregator.send(DrainAll).await.unwrap();
                    reported += drained.counters.values().sum::<f64>();
                    tokio::task::yield_now().await;
                }
                reported
            })
        };

        let mut sent = 0.0;
        for producer in producers {
            sent += producer.await.unwrap();
        }
        let mut reported = drainer.await.unwrap();

        let drained = aggregator.send(DrainAll).await.unwrap();
        reported += drained.counters.values().sum::<f64>();

        assert_eq!(reported, sent);
    }
}
