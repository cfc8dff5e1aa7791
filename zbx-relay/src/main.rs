//! The zbx-relay binary.
//!
//! The relay receives statsd datagrams over UDP, aggregates counters and timers per host and key,
//! and periodically forwards the aggregates to a Zabbix trapper.
//!
//! # Usage
//!
//! ```text
//! zbx-relay [-c CONFIG] run [--host HOST] [-p PORT] [--zabbix-host HOST] [--zabbix-port PORT]
//!                           [-f FLUSH_INTERVAL] [-t PERCENTILE] [-d]
//! zbx-relay [-c CONFIG] config show
//! ```
//!
//! Without a config folder, all settings take their defaults and can be overridden on the
//! command line.
//!
//! # Crates
//!
//! - `zbx-client`: A client library for reporting stats to the relay.
//! - `zbx-common`: Shared types such as timestamps.
//! - `zbx-config`: Loading and validation of the configuration.
//! - `zbx-log`: Logging setup and macros.
//! - `zbx-metrics`: Sample decoding, aggregation and reduction into flush batches.
//! - `zbx-sender`: The Zabbix sender protocol and client.
//! - `zbx-server`: The services making up the running relay.
//! - `zbx-statsd`: Internal metrics of the relay.
//! - `zbx-system`: Service and shutdown primitives.

mod cli;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            zbx_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
