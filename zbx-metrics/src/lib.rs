//! Statsd line protocol, aggregation and timer reduction.
//!
//! The relay accepts a minimal statsd dialect over UDP. Every line addresses a host and an item in
//! the monitoring backend:
//!
//! ```text
//! web1:app.hits:1|c
//! web1:app.latency:120|ms|@0.5
//! ```
//!
//! Lines are decoded into [`Sample`]s and merged into the [`AggregatorService`], which exclusively
//! owns all counters and timers. In regular intervals the flush scheduler drains the service and
//! turns the contents into a [`FlushBatch`] through [`build_batch`]:
//!
//! - Counters are reported as a rate per second over the flush interval.
//! - Timers are [reduced](reduce) into six summary points: mean, upper, lower, count, the
//!   percentile threshold and the median.
//!
//! ```
//! use std::time::Duration;
//! use zbx_metrics::{aggregator::Aggregator, build_batch, Sample, UnixTimestamp};
//!
//! let mut aggregator = Aggregator::new();
//! aggregator.insert(Sample::parse(b"web1:app.hits:1|c").unwrap());
//! aggregator.insert(Sample::parse(b"web1:app.hits:4|c").unwrap());
//!
//! let clock = UnixTimestamp::from_secs(1_700_000_000);
//! let batch = build_batch(aggregator.drain_all(), Duration::from_secs(10), 90, clock);
//! assert_eq!(batch.points()[0].value, "0.5");
//! ```

#![warn(missing_docs)]

pub mod aggregator;
mod flush;
mod protocol;
mod service;
mod stats;
mod statsd;

pub use self::aggregator::Drained;
pub use self::flush::*;
pub use self::protocol::*;
pub use self::service::*;
pub use self::stats::*;

#[doc(inline)]
pub use zbx_common::UnixTimestamp;
