//! Periodic draining of the aggregator and delivery to the trapper.

use std::error::Error;
use std::time::{Duration, Instant};

use zbx_common::UnixTimestamp;
use zbx_metrics::{Aggregator, DrainAll, build_batch};
use zbx_sender::{SendError, ZabbixSender};
use zbx_system::{Addr, Receiver, Service, ShutdownHandle};

use crate::statsd::{ServerCounters, ServerHistograms, ServerTimers};

/// Parameters of the [`FlushService`].
#[derive(Clone, Copy, Debug)]
pub struct FlushConfig {
    /// Time between the end of one flush and the start of the next.
    pub interval: Duration,
    /// The percentile reported for timers.
    pub percentile: u8,
    /// Perform a final flush when shutting down.
    pub flush_on_shutdown: bool,
}

/// Periodically drains the aggregator and sends the resulting batch to the trapper.
///
/// The service alternates between waiting for the interval and flushing. The next wait starts
/// only after a flush has completed, so flushes never overlap even if the trapper is slow.
///
/// A batch that could not be delivered is dropped. On shutdown the pending wait is cancelled,
/// while a flush in progress runs to completion or until the sender times out.
#[derive(Debug)]
pub struct FlushService {
    config: FlushConfig,
    aggregator: Addr<Aggregator>,
    sender: ZabbixSender,
    shutdown: ShutdownHandle,
}

impl FlushService {
    /// Creates a new flush service.
    pub fn new(
        config: FlushConfig,
        aggregator: Addr<Aggregator>,
        sender: ZabbixSender,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            config,
            aggregator,
            sender,
            shutdown,
        }
    }

    /// Drains the aggregator and sends the batch, if there is anything to send.
    async fn flush(&self) {
        let start = Instant::now();

        let Ok(drained) = self.aggregator.send(DrainAll).await else {
            zbx_log::error!("aggregator stopped, nothing to flush");
            return;
        };

        let batch = build_batch(
            drained,
            self.config.interval,
            self.config.percentile,
            UnixTimestamp::now(),
        );

        if batch.is_empty() {
            zbx_log::trace!("no values aggregated, skipping flush");
            return;
        }

        zbx_statsd::metric!(histogram(ServerHistograms::BatchPoints) = batch.len() as u64);

        for point in &batch {
            zbx_log::debug!(
                host = %point.host,
                key = %point.key,
                value = %point.value,
                clock = point.clock.as_secs(),
                "flushing point"
            );
        }

        match self.sender.send(&batch).await {
            Ok(response) => {
                zbx_statsd::metric!(counter(ServerCounters::FlushResult) += 1, result = "success");

                match response.summary() {
                    Some(summary) if summary.failed > 0 => {
                        zbx_log::warn!(
                            processed = summary.processed,
                            failed = summary.failed,
                            total = summary.total,
                            "trapper failed to store some items"
                        );
                        zbx_statsd::metric!(
                            counter(ServerCounters::ItemsFailed) += summary.failed as i64
                        );
                    }
                    _ => zbx_log::debug!(
                        points = batch.len(),
                        info = %response.info,
                        "flushed batch"
                    ),
                }
            }
            Err(error) => {
                zbx_log::error!(
                    error = &error as &dyn Error,
                    points = batch.len(),
                    "failed to send batch to trapper, dropping it"
                );
                zbx_statsd::metric!(
                    counter(ServerCounters::FlushResult) += 1,
                    result = error_tag(&error),
                );
            }
        }

        zbx_statsd::metric!(timer(ServerTimers::FlushDuration) = start.elapsed());
    }
}

/// Returns the value of the `result` tag for a failed send.
fn error_tag(error: &SendError) -> &'static str {
    match error {
        SendError::Transport(_) => "transport",
        SendError::Timeout => "timeout",
        SendError::Protocol(_) => "protocol",
        SendError::Rejected { .. } => "rejected",
    }
}

impl Service for FlushService {
    type Interface = ();

    async fn run(mut self, _rx: Receiver<Self::Interface>) {
        zbx_log::info!(
            "flushing every {}ms with percentile {}",
            self.config.interval.as_millis(),
            self.config.percentile
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    if self.config.flush_on_shutdown {
                        zbx_log::info!("flushing aggregated values before shutdown");
                        self.flush().await;
                    }
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => self.flush().await,
            }
        }

        zbx_log::info!("flush service stopped");
    }
}
