//! The relay server: receives statsd datagrams over UDP, aggregates them and periodically flushes
//! the reduced values to a Zabbix trapper.
//!
//! # Structure
//!
//! The server is composed of three services, see the [`services`] module:
//!
//! ```text
//!  UDP datagrams ──> IngestService ──MergeSamples──> AggregatorService
//!                                                         ^
//!                                                         │ DrainAll
//!  Zabbix trapper <── ZabbixSender <── FlushService ──────┘
//! ```
//!
//! Aggregation state is owned by the [`AggregatorService`](zbx_metrics::AggregatorService) and
//! only accessed through messages, so ingestion and flushing never observe a partially merged or
//! partially drained state. Network I/O to the trapper happens in the flush service only.
//!
//! # Lifecycle
//!
//! [`Server::start`] binds the socket and spawns all services on the current runtime.
//! [`Server::stop`] requests a shutdown and [`Server::wait`] resolves once all services have
//! terminated. The blocking [`run`] function wraps all of this in its own runtime and stops on
//! process signals.

#![warn(missing_docs)]

mod service;
pub mod services;
mod statsd;

use std::sync::Arc;

use anyhow::Context;
use zbx_config::Config;

pub use crate::service::{Server, ServerError};

/// Runs the relay server until a shutdown signal is received.
///
/// This creates a multi-threaded tokio runtime, starts the [`Server`] and blocks the current
/// thread until the server stops. `SIGTERM` stops the server gracefully within the configured
/// shutdown timeout, `SIGINT` and `SIGQUIT` stop it immediately.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("zbx-relay")
        .enable_all()
        .build()
        .context("could not create tokio runtime")?;

    runtime.block_on(async move {
        let server = Server::start(config.clone())
            .await
            .with_context(|| {
                format!(
                    "could not listen on {}:{}",
                    config.listen_host(),
                    config.listen_port()
                )
            })?;

        server
            .controller()
            .listen_for_signals(config.shutdown_timeout())
            .map_err(ServerError::SignalHandler)?;

        server.wait().await?;
        Ok::<_, anyhow::Error>(())
    })
}
