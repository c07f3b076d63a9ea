//! Infrastructure layer for the peer.
//!
//! Contains OS-facing adapters: TCP and UDP sockets, socket tuning, and
//! file-system storage.
//!
//! **Dependency rule**: this layer may depend on `realtime_core`, but MUST NOT
//! import the `application` layer.  It reports upward only through the
//! callbacks it is handed.

pub mod network;
pub mod storage;
