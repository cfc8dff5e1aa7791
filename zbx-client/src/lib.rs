//! A client for reporting counters and timers to the relay.
//!
//! Every stat is sent as its own datagram in the relay's line protocol:
//!
//! ```text
//! <host>:<stat>:<value>|<kind>[|@<sample_rate>]
//! ```
//!
//! The host is the name the aggregates are reported for in Zabbix. It defaults to the name of the
//! machine running the client. Sending is best effort: errors are logged and never returned to
//! the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use zbx_client::StatsClient;
//!
//! # async fn example() -> std::io::Result<()> {
//! let client = StatsClient::connect(("127.0.0.1", zbx_client::DEFAULT_PORT)).await?;
//! client.increment(&["app.hits"], 1.0).await;
//! client.timing("app.latency", Duration::from_millis(120), 1.0).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use rand::distr::StandardUniform;
use tokio::net::{ToSocketAddrs, UdpSocket, lookup_host};

/// The port the relay listens on by default.
pub const DEFAULT_PORT: u16 = 8126;

/// Host name used if the machine's name cannot be determined.
const FALLBACK_HOSTNAME: &str = "localhost";

/// Sends counters and timers to a relay over UDP.
#[derive(Debug)]
pub struct StatsClient {
    socket: UdpSocket,
    hostname: String,
}

impl StatsClient {
    /// Creates a client sending to the relay at `addr`.
    ///
    /// The first address `addr` resolves to is used.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let target = lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "relay address did not resolve")
        })?;

        let local = match target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;

        Ok(Self {
            socket,
            hostname: default_hostname(),
        })
    }

    /// Reports all stats for `hostname` instead of this machine's name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Returns the host name stats are reported for.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Reports a single timing for `stat` in milliseconds.
    pub async fn timing(&self, stat: &str, time: Duration, sample_rate: f64) {
        if should_send(sample_rate) {
            self.send(stat, time.as_millis(), "ms", sample_rate).await;
        }
    }

    /// Increments each of the counters in `stats` by one.
    pub async fn increment(&self, stats: &[&str], sample_rate: f64) {
        self.update_stats(stats, 1, sample_rate).await;
    }

    /// Decrements each of the counters in `stats` by one.
    pub async fn decrement(&self, stats: &[&str], sample_rate: f64) {
        self.update_stats(stats, -1, sample_rate).await;
    }

    /// Adds `delta` to each of the counters in `stats`.
    ///
    /// With a sample rate below `1`, either all or none of the stats are sent.
    pub async fn update_stats(&self, stats: &[&str], delta: i64, sample_rate: f64) {
        if !should_send(sample_rate) {
            return;
        }

        for stat in stats {
            self.send(stat, delta, "c", sample_rate).await;
        }
    }

    async fn send(&self, stat: &str, value: impl fmt::Display, kind: &str, sample_rate: f64) {
        let line = encode_line(&self.hostname, stat, value, kind, sample_rate);
        if let Err(error) = self.socket.send(line.as_bytes()).await {
            zbx_log::error!(
                error = &error as &dyn std::error::Error,
                stat,
                "error sending a stat",
            );
        }
    }
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOSTNAME.to_owned())
}

fn should_send(sample_rate: f64) -> bool {
    if sample_rate <= 0.0 {
        false
    } else if sample_rate >= 1.0 {
        true
    } else {
        let s: f64 = rand::rng().sample(StandardUniform);
        s <= sample_rate
    }
}

fn encode_line(
    hostname: &str,
    stat: &str,
    value: impl fmt::Display,
    kind: &str,
    sample_rate: f64,
) -> String {
    if sample_rate < 1.0 {
        format!("{hostname}:{stat}:{value}|{kind}|@{sample_rate}")
    } else {
        format!("{hostname}:{stat}:{value}|{kind}")
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use zbx_metrics::{MetricKey, Sample, SampleValue};

    use super::*;

    async fn receiver() -> (UdpSocket, StatsClient) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = StatsClient::connect(socket.local_addr().unwrap())
            .await
            .unwrap()
            .with_hostname("web1");
        (socket, client)
    }

    async fn recv_sample(socket: &UdpSocket) -> Sample {
        let mut buf = [0; 512];
        let len = tokio::time::timeout(Duration::from_secs(5), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        Sample::parse(&buf[..len]).unwrap()
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(
            encode_line("web1", "app.hits", 1, "c", 1.0),
            "web1:app.hits:1|c"
        );
        assert_eq!(
            encode_line("web1", "app.latency", 120, "ms", 0.25),
            "web1:app.latency:120|ms|@0.25"
        );
    }

    #[test]
    fn test_sampled_line_scales_counter() {
        let line = encode_line("web1", "app.hits", 10, "c", 0.5);
        let sample = Sample::parse(line.as_bytes()).unwrap();
        assert_eq!(sample.value, SampleValue::Counter(20.0));
        assert_eq!(sample.sample_rate, Some(0.5));
    }

    #[test]
    fn test_should_send_bounds() {
        assert!(should_send(1.0));
        assert!(should_send(2.0));
        assert!(!should_send(0.0));
        assert!(!should_send(-1.0));
    }

    #[test]
    fn test_default_hostname() {
        let hostname = default_hostname();
        assert!(!hostname.is_empty());
        assert!(!hostname.contains(':'));
    }

    #[tokio::test]
    async fn test_increment() {
        zbx_log::init_test!();
        let (socket, client) = receiver().await;

        client.increment(&["app.hits", "app.misses"], 1.0).await;

        let hits = recv_sample(&socket).await;
        assert_eq!(hits.key, MetricKey::new("web1", "app.hits"));
        assert_eq!(hits.value, SampleValue::Counter(1.0));
        assert_eq!(hits.sample_rate, None);

        let misses = recv_sample(&socket).await;
        assert_eq!(misses.key, MetricKey::new("web1", "app.misses"));
        assert_eq!(misses.value, SampleValue::Counter(1.0));
    }

    #[tokio::test]
    async fn test_decrement() {
        let (socket, client) = receiver().await;

        client.decrement(&["app.sessions"], 1.0).await;

        let sample = recv_sample(&socket).await;
        assert_eq!(sample.key, MetricKey::new("web1", "app.sessions"));
        assert_eq!(sample.value, SampleValue::Counter(-1.0));
    }

    #[tokio::test]
    async fn test_update_stats() {
        let (socket, client) = receiver().await;

        client.update_stats(&["app.bytes"], 4096, 1.0).await;

        let sample = recv_sample(&socket).await;
        assert_eq!(sample.value, SampleValue::Counter(4096.0));
    }

    #[tokio::test]
    async fn test_timing() {
        let (socket, client) = receiver().await;

        client
            .timing("app.latency", Duration::from_micros(120_900), 1.0)
            .await;

        let sample = recv_sample(&socket).await;
        assert_eq!(sample.key, MetricKey::new("web1", "app.latency"));
        assert_eq!(sample.value, SampleValue::Timer(120));
    }

    #[tokio::test]
    async fn test_zero_rate_sends_nothing() {
        let (socket, client) = receiver().await;

        client.increment(&["app.hits"], 0.0).await;
        client.increment(&["app.misses"], 1.0).await;

        let sample = recv_sample(&socket).await;
        assert_eq!(sample.key, MetricKey::new("web1", "app.misses"));
    }
}
