//! Configuration for the relay CLI and server.
//!
//! The configuration is read from a `config.yml` file in a configuration folder. Every section and
//! field is optional and falls back to its default:
//!
//! ```yaml
//! relay:
//!   host: 0.0.0.0
//!   port: 8126
//! zabbix:
//!   host: zabbix.example.com
//!   port: 10051
//! aggregator:
//!   flush_interval: 10000
//!   percentile_threshold: 90
//! ```
//!
//! Individual values can be overridden afterwards, see [`Config::apply_override`].

#![warn(missing_docs)]

mod aggregator;
mod config;

pub use self::aggregator::*;
pub use self::config::*;
