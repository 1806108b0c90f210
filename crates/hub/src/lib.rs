//! Real-time coordination hub.
//!
//! One [`HubRunner`] event loop owns the membership set; cloneable
//! [`Hub`] handles feed it through channels. Each connection runs two
//! pumps (read and write) that share nothing but the connection's own
//! outbound queue and liveness timestamp.

mod client;
mod connection;
mod hub;

pub use client::Client;
pub use connection::serve_connection;
pub use hub::{Hub, HubRunner};
