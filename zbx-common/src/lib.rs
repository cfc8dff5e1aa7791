//! Common functionality for the Zabbix statsd relay.

#![warn(missing_docs)]

mod time;

pub use crate::time::*;
