//! Application layer for the peer.
//!
//! - **`session`** – [`session::SessionManager`]: owns the current connection
//!   and the discovery roles, enforces the single-ready-connection rule, and
//!   exposes connectivity and inbound messages.
//!
//! - **`fanout`** – per-consumer queues so any number of tasks can observe the
//!   same inbound message sequence.
//!
//! - **`media`** – encoder controls and HEVC send/receive helpers layered on
//!   a session.

pub mod fanout;
pub mod media;
pub mod session;
