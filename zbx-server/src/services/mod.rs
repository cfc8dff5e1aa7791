//! Long-running services of the relay server.
//!
//! Every service holds an address of the [`AggregatorService`](zbx_metrics::AggregatorService),
//! which owns the aggregation state:
//!
//! - [`IngestService`](ingest::IngestService) receives datagrams, decodes them and merges the
//!   samples into the aggregator.
//! - [`FlushService`](flush::FlushService) periodically drains the aggregator and sends the
//!   reduced batch to the trapper.
//!
//! Both stop on shutdown. The aggregator stops once neither of them holds an address anymore.

pub mod flush;
pub mod ingest;
