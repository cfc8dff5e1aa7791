//! Zabbix trapper wire protocol and sender client.
//!
//! The trapper accepts batches of item values over TCP. Both directions use the same frame:
//!
//! ```text
//! +--------+---------+-----------------+-----------------+
//! | "ZBXD" | 0x01    | length (u64 LE) | JSON payload    |
//! +--------+---------+-----------------+-----------------+
//!   4 bytes  1 byte    8 bytes           length bytes
//! ```
//!
//! The request payload is a [`SenderRequest`], the trapper answers with a [`SenderResponse`].
//! [`ZabbixSender`] performs one complete exchange per [`FlushBatch`](zbx_metrics::FlushBatch).

#![warn(missing_docs)]

mod client;
mod protocol;

pub use self::client::*;
pub use self::protocol::*;
