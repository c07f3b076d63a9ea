//! # realtime-core
//!
//! Shared library for the realtime peer stream containing the TLV wire
//! protocol, the incremental frame parser, and the session domain types.
//!
//! This crate has zero dependencies on sockets, async runtimes, or OS APIs.
//! Everything here is deterministic and can be exercised with plain byte
//! slices.
//!
//! # Architecture overview
//!
//! Two peers on the same local network hold a single TCP connection open and
//! exchange typed, opaque payloads over it (for example HEVC access units).
//! TCP only gives us an ordered byte stream, so every payload is prefixed with
//! a fixed 8-byte header:
//!
//! ```text
//! offset 0..4   : message type   (u32, little-endian)
//! offset 4..8   : payload length (u32, little-endian)
//! offset 8..8+N : payload bytes  (opaque)
//! ```
//!
//! - **`protocol`** – the header codec, the [`MessageType`] enumeration, and
//!   the [`FrameParser`] that rebuilds whole frames from arbitrarily
//!   fragmented reads.
//!
//! - **`domain`** – connection and discovery state machines' state values and
//!   the opaque [`Endpoint`] identity produced by discovery.

pub mod domain;
pub mod protocol;

pub use domain::endpoint::Endpoint;
pub use domain::state::{ConnectionState, DiscoveryState};
pub use protocol::codec::{decode_header, encode_frame, encode_header, ProtocolError};
pub use protocol::messages::{Frame, Header, MessageType, HEADER_SIZE};
pub use protocol::parser::FrameParser;
