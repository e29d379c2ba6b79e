//! Useful development utils
//!
//! In-process [`Network`] connecting parties of a simulation, and [`handler_loop`] relaying
//! messages between a [`Handler`](crate::Handler) and the network.

mod driver;
mod network;

pub use driver::handler_loop;
pub use network::{Network, Receive};
