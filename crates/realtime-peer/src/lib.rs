//! realtime-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does realtime-peer do?
//!
//! Two peers on one local network find each other without manual addressing
//! and keep a single TCP stream open between them for low-latency media:
//!
//! 1. One side **advertises** a service identifier; the other **browses** for
//!    it.  Discovery restarts by itself when the network stack drops its
//!    sockets.
//! 2. The browser dials the first peer it found.  At most one connection is
//!    ever ready; further inbound streams are closed until it ends.
//! 3. Payloads travel as TLV frames (see `realtime_core::protocol`) and every
//!    inbound frame is fanned out to all current consumers.

/// Application layer: the session manager, fan-out, and media controls.
pub mod application;

/// Infrastructure layer: sockets, discovery, and configuration storage.
pub mod infrastructure;

pub use application::{
    fanout::{Broadcaster, Subscription},
    session::{MessageSender, ReceivedMessage, SessionError, SessionManager},
};
pub use infrastructure::network::{TransportConfig, TransportError};
