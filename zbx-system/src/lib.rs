//! Foundational system components for the relay's services.
//!
//! Services are long-running tasks that exclusively own their state and receive messages through
//! an [`Addr`]. Their lifetime is tied to a [`Controller`], which broadcasts a [`Shutdown`] to
//! every [`ShutdownHandle`] when the server stops or the process receives a termination signal.

#![warn(missing_docs)]

mod controller;
mod service;

pub use self::controller::*;
pub use self::service::*;
