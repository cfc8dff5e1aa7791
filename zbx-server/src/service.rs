use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use zbx_config::Config;
use zbx_metrics::{Aggregator, AggregatorService};
use zbx_sender::ZabbixSender;
use zbx_system::{Addr, Controller, Service, Shutdown};

use crate::services::flush::{FlushConfig, FlushService};
use crate::services::ingest::IngestService;
use crate::statsd::ServerCounters;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the UDP socket failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] io::Error),

    /// Registering the process signal handlers failed.
    #[error("could not register signal handlers")]
    SignalHandler(#[source] io::Error),

    /// A service terminated with a panic.
    #[error("service terminated unexpectedly")]
    ServiceFailed(#[from] tokio::task::JoinError),
}

/// A running relay server.
///
/// The server consists of the aggregator, a service receiving datagrams and a service flushing to
/// the trapper. All of them are spawned on the current tokio runtime by [`start`](Self::start)
/// and stopped through the server's [`Controller`].
#[derive(Debug)]
pub struct Server {
    config: Arc<Config>,
    controller: Controller,
    local_addr: SocketAddr,
    aggregator: Addr<Aggregator>,
    handles: ServiceHandles,
}

/// Join handles of the spawned services.
#[derive(Debug)]
struct ServiceHandles {
    ingest: JoinHandle<()>,
    flush: JoinHandle<()>,
    aggregator: JoinHandle<()>,
}

impl Server {
    /// Binds the listening socket and starts all services.
    ///
    /// Fails if the listen host cannot be resolved or the socket cannot be bound. No service is
    /// started in that case.
    pub async fn start(config: Arc<Config>) -> Result<Self, ServerError> {
        zbx_log::info!("relay server starting");
        zbx_statsd::metric!(counter(ServerCounters::ServerStarting) += 1);

        let socket = UdpSocket::bind((config.listen_host(), config.listen_port()))
            .await
            .map_err(ServerError::BindFailed)?;
        let local_addr = socket.local_addr().map_err(ServerError::BindFailed)?;

        let controller = Controller::new();

        let (aggregator, aggregator_handle) = AggregatorService::new().start_joinable();

        let sender = ZabbixSender::new(config.zabbix_host(), config.zabbix_port())
            .with_timeout(config.zabbix_timeout())
            .with_max_response_size(config.zabbix_max_response_size());
        let flush_config = FlushConfig {
            interval: config.flush_interval(),
            percentile: config.percentile_threshold(),
            flush_on_shutdown: config.flush_on_shutdown(),
        };
        let (_, flush_handle) = FlushService::new(
            flush_config,
            aggregator.clone(),
            sender,
            controller.shutdown_handle(),
        )
        .start_joinable();

        let (_, ingest_handle) = IngestService::new(
            socket,
            config.recv_buffer_size(),
            aggregator.clone(),
            controller.shutdown_handle(),
        )
        .start_joinable();

        zbx_log::info!(
            "forwarding to trapper at {}:{}",
            config.zabbix_host(),
            config.zabbix_port()
        );

        Ok(Self {
            config,
            controller,
            local_addr,
            aggregator,
            handles: ServiceHandles {
                ingest: ingest_handle,
                flush: flush_handle,
                aggregator: aggregator_handle,
            },
        })
    }

    /// Returns the address the server receives datagrams on.
    ///
    /// This differs from the configured address if port `0` was configured.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the controller that stops this server.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Returns the address of the aggregator.
    pub fn aggregator(&self) -> &Addr<Aggregator> {
        &self.aggregator
    }

    /// Returns the configuration the server was started with.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Requests the server to stop.
    ///
    /// With a `timeout`, [`wait`](Self::wait) gives services that long to finish their work.
    /// Without, services stop at the next opportunity. A flush in progress is completed in both
    /// cases, bounded by the trapper timeout, even if that exceeds `timeout`.
    pub fn stop(&self, timeout: Option<Duration>) {
        self.controller.shutdown(timeout);
    }

    /// Waits until the server has been stopped and all services have terminated.
    ///
    /// Ingestion still running after the shutdown timeout is aborted. The flush service is never
    /// aborted, so a send in progress and the final flush complete. Both are bounded by the
    /// trapper timeout.
    pub async fn wait(self) -> Result<(), ServerError> {
        let Self {
            controller,
            aggregator,
            handles,
            ..
        } = self;

        // The aggregator stops once all of its addresses are gone.
        drop(aggregator);

        let Shutdown { timeout } = controller.shutdown_handle().notified().await;
        zbx_log::info!("shutting down relay server");

        let ServiceHandles {
            ingest,
            flush,
            aggregator,
        } = handles;

        let abort_ingest = ingest.abort_handle();
        let mut join = futures::future::join3(ingest, flush, aggregator);

        let results = match timeout {
            Some(timeout) => tokio::select! {
                results = &mut join => results,
                _ = tokio::time::sleep(timeout) => {
                    zbx_log::warn!(
                        "services did not stop within {timeout:?}, waiting for the flush to complete"
                    );
                    abort_ingest.abort();
                    join.await
                }
            },
            None => join.await,
        };

        let (ingest, flush, aggregator) = results;
        for result in [ingest, flush, aggregator] {
            match result {
                Ok(()) => (),
                Err(error) if error.is_cancelled() => (),
                Err(error) => return Err(error.into()),
            }
        }

        zbx_log::info!("relay server stopped");
        Ok(())
    }

    /// Stops this server gracefully and starts a new one with the given configuration.
    pub async fn restart(self, config: Arc<Config>) -> Result<Self, ServerError> {
        zbx_log::info!("restarting relay server");

        self.stop(Some(self.config.shutdown_timeout()));
        self.wait().await?;

        Self::start(config).await
    }
}
