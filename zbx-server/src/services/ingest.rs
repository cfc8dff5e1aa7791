//! Reception and decoding of statsd datagrams.

use std::error::Error;
use std::time::Duration;

use tokio::net::UdpSocket;
use zbx_metrics::{Aggregator, MergeSamples, Sample};
use zbx_system::{Addr, Receiver, Service, ShutdownHandle};

use crate::statsd::{ServerCounters, ServerHistograms};

/// Receives statsd datagrams and merges the decoded samples into the aggregator.
///
/// A datagram may carry multiple newline-separated lines. Valid lines of one datagram are merged
/// in a single message, invalid lines are logged and dropped. Of a datagram longer than the
/// receive buffer, only the lines that were received completely are kept.
///
/// After a socket error the service waits before receiving again, doubling the wait for every
/// consecutive error up to one second.
///
/// The service stops when a shutdown is requested. Datagrams still queued in the socket are not
/// read anymore.
#[derive(Debug)]
pub struct IngestService {
    socket: UdpSocket,
    buffer_size: usize,
    aggregator: Addr<Aggregator>,
    shutdown: ShutdownHandle,
}

impl IngestService {
    /// Creates a new ingest service reading from a bound socket.
    pub fn new(
        socket: UdpSocket,
        buffer_size: usize,
        aggregator: Addr<Aggregator>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            socket,
            buffer_size,
            aggregator,
            shutdown,
        }
    }
}

/// The wait after the first failed receive.
const RECV_BACKOFF: Duration = Duration::from_millis(10);

/// The longest wait between failed receives.
const MAX_RECV_BACKOFF: Duration = Duration::from_secs(1);

/// Returns the wait before receiving again after `errors` consecutive socket errors.
fn recv_backoff(errors: u32) -> Duration {
    let exponent = errors.saturating_sub(1).min(16);
    RECV_BACKOFF
        .saturating_mul(1 << exponent)
        .min(MAX_RECV_BACKOFF)
}

/// Removes the last line of a datagram that did not fit into the receive buffer.
///
/// The socket cuts such datagrams off without error, so the last line is incomplete unless it
/// ends in a newline.
fn strip_partial_line(datagram: &[u8]) -> &[u8] {
    zbx_statsd::metric!(
        counter(ServerCounters::SampleInvalid) += 1,
        reason = "truncated",
    );

    match datagram.iter().rposition(|&b| b == b'\n') {
        Some(end) => &datagram[..=end],
        None => &[],
    }
}

/// Decodes all lines of a datagram and forwards the valid samples.
fn handle_datagram(aggregator: &Addr<Aggregator>, datagram: &[u8]) {
    zbx_statsd::metric!(counter(ServerCounters::DatagramReceived) += 1);
    zbx_statsd::metric!(histogram(ServerHistograms::DatagramSize) = datagram.len() as u64);

    let mut samples = Vec::new();
    for result in Sample::parse_all(datagram) {
        match result {
            Ok(sample) => samples.push(sample),
            Err(error) => {
                zbx_log::debug!(
                    error = &error as &dyn Error,
                    datagram = %String::from_utf8_lossy(datagram),
                    "dropping invalid sample"
                );
                zbx_statsd::metric!(
                    counter(ServerCounters::SampleInvalid) += 1,
                    reason = error.kind().as_str(),
                );
            }
        }
    }

    if !samples.is_empty() {
        aggregator.send(MergeSamples::new(samples));
    }
}

impl Service for IngestService {
    type Interface = ();

    async fn run(self, _rx: Receiver<Self::Interface>) {
        let Self {
            socket,
            buffer_size,
            aggregator,
            mut shutdown,
        } = self;

        if let Ok(addr) = socket.local_addr() {
            zbx_log::info!("listening for datagrams on {addr}");
        }

        // One spare byte reveals datagrams longer than the buffer.
        let mut buf = vec![0; buffer_size + 1];
        let mut errors = 0;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => {
                        errors = 0;
                        zbx_log::trace!(%peer, len, "received datagram");

                        let datagram = if len > buffer_size {
                            zbx_log::debug!(%peer, "datagram exceeds {buffer_size} bytes");
                            strip_partial_line(&buf[..len])
                        } else {
                            &buf[..len]
                        };
                        handle_datagram(&aggregator, datagram);
                    }
                    Err(error) => {
                        errors += 1;
                        let backoff = recv_backoff(errors);
                        zbx_log::error!(
                            error = &error as &dyn Error,
                            errors,
                            "failed to receive datagram, retrying in {}ms",
                            backoff.as_millis()
                        );

                        tokio::select! {
                            biased;

                            _ = shutdown.notified() => break,
                            _ = tokio::time::sleep(backoff) => (),
                        }
                    }
                },
            }
        }

        zbx_log::info!("stopped receiving datagrams");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zbx_metrics::{AggregatorService, AggregatorStats, DrainAll, MetricKey};
    use zbx_system::Controller;

    use super::*;

    #[test]
    fn test_handle_datagram_metrics() {
        let captures = zbx_statsd::with_capturing_test_client(|| {
            let (aggregator, _rx) = zbx_system::channel();
            handle_datagram(&aggregator, b"web1:app.hits:1|c\nweb1:app.hits\n");
        });

        assert_eq!(
            captures,
            [
                "ingest.datagram.received:1|c",
                "ingest.datagram.size:32|h",
                "ingest.sample.invalid:1|c|#reason:field_count",
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_datagram_merges_valid_lines() {
        let aggregator = AggregatorService::new().start_detached();
        handle_datagram(
            &aggregator,
            b"web1:app.hits:1|c\nbroken\r\nweb1:app.latency:12|ms\n",
        );

        let drained = aggregator.send(DrainAll).await.unwrap();
        assert_eq!(drained.counters[&MetricKey::new("web1", "app.hits")], 1.0);
        assert_eq!(drained.timers[&MetricKey::new("web1", "app.latency")], [12]);
    }

    #[tokio::test]
    async fn test_handle_datagram_without_valid_lines() {
        let (aggregator, mut rx) = zbx_system::channel::<zbx_metrics::Aggregator>();
        handle_datagram(&aggregator, b"not a sample");
        drop(aggregator);

        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_strip_partial_line() {
        assert_eq!(
            strip_partial_line(b"web1:app.hits:1|c\nweb1:app.latency:150|m"),
            b"web1:app.hits:1|c\n"
        );
        assert_eq!(strip_partial_line(b"web1:app.latency:150|m"), b"");
        assert_eq!(strip_partial_line(b"web1:app.hits:1|c\n"), b"web1:app.hits:1|c\n");
    }

    #[test]
    fn test_strip_partial_line_metrics() {
        let captures = zbx_statsd::with_capturing_test_client(|| {
            strip_partial_line(b"web1:app.hits:1|c\nweb1:app");
        });

        assert_eq!(captures, ["ingest.sample.invalid:1|c|#reason:truncated"]);
    }

    #[test]
    fn test_recv_backoff() {
        assert_eq!(recv_backoff(1), Duration::from_millis(10));
        assert_eq!(recv_backoff(2), Duration::from_millis(20));
        assert_eq!(recv_backoff(5), Duration::from_millis(160));
        assert_eq!(recv_backoff(8), MAX_RECV_BACKOFF);
        assert_eq!(recv_backoff(u32::MAX), MAX_RECV_BACKOFF);
    }

    /// Waits until the aggregator holds at least one key.
    async fn wait_for_samples(aggregator: &Addr<Aggregator>) {
        for _ in 0..100 {
            let stats = aggregator.send(AggregatorStats).await.unwrap();
            if stats.counters + stats.timers > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no samples received");
    }

    #[tokio::test]
    async fn test_truncated_datagram_keeps_complete_lines() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let controller = Controller::new();
        let aggregator = AggregatorService::new().start_detached();
        let (_, handle) =
            IngestService::new(socket, 32, aggregator.clone(), controller.shutdown_handle())
                .start_joinable();

        // 41 bytes, cut off after `|m` by a 32 byte buffer.
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"web1:app.hits:1|c\nweb1:app.latency:150|ms", addr)
            .await
            .unwrap();
        wait_for_samples(&aggregator).await;

        let drained = aggregator.send(DrainAll).await.unwrap();
        assert_eq!(drained.counters.len(), 1);
        assert_eq!(drained.counters[&MetricKey::new("web1", "app.hits")], 1.0);
        assert!(drained.timers.is_empty());

        controller.shutdown(None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_datagram_filling_buffer_is_kept() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let controller = Controller::new();
        let aggregator = AggregatorService::new().start_detached();
        let datagram = b"web1:app.latency:150|ms";
        let (_, handle) = IngestService::new(
            socket,
            datagram.len(),
            aggregator.clone(),
            controller.shutdown_handle(),
        )
        .start_joinable();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(datagram, addr).await.unwrap();
        wait_for_samples(&aggregator).await;

        let drained = aggregator.send(DrainAll).await.unwrap();
        assert_eq!(drained.timers[&MetricKey::new("web1", "app.latency")], [150]);

        controller.shutdown(None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_until_shutdown() {
        zbx_log::init_test!();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let controller = Controller::new();
        let aggregator = AggregatorService::new().start_detached();
        let (_, handle) =
            IngestService::new(socket, 1024, aggregator.clone(), controller.shutdown_handle())
                .start_joinable();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"web1:app.hits:3|c", addr).await.unwrap();

        let mut stats = aggregator.send(AggregatorStats).await.unwrap();
        for _ in 0..100 {
            if stats.counters > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            stats = aggregator.send(AggregatorStats).await.unwrap();
        }
        assert_eq!(stats.counters, 1);

        controller.shutdown(None);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
