//! Network infrastructure for the peer.
//!
//! # Sub-modules
//!
//! - **`config`** – [`TransportConfig`]: keep-alive, timeouts, traffic class,
//!   and discovery addressing.
//!
//! - **`connection`** – one TCP stream connection: the `Idle → Connecting →
//!   Ready → Failed | Cancelled` state machine, the receive loop feeding the
//!   frame parser, and framed sends.
//!
//! - **`discovery`** – the browse and advertise roles over UDP broadcast,
//!   including automatic restart after transient socket loss.
//!
//! - **`socket_options`** – low-latency socket tuning applied to every stream.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod socket_options;

pub use config::{TrafficClass, TransportConfig};
pub use connection::{
    Connection, ConnectionHooks, ConnectionId, StreamSource, TransportError,
};
