//! Domain types shared by the transport and discovery layers.
//!
//! # Sub-modules
//!
//! - **`state`** – the connection and discovery state values, including which
//!   transitions are terminal.
//! - **`endpoint`** – the opaque peer identity produced by discovery.

pub mod endpoint;
pub mod state;

pub use endpoint::Endpoint;
pub use state::{ConnectionState, DiscoveryState};
