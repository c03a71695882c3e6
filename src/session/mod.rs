//! # Sessions
//!
//! Per-connection state and the registry of live connections.
//!
//! ## Components
//! - **Connection**: receive buffer, outbound queue, protocol state, identity
//! - **ConnectionManager**: admission limits and name/address indices

pub mod connection;
pub mod manager;

pub use connection::{CloseReason, Connection, ConnectionId, ProtocolState, TimeoutAction};
pub use manager::ConnectionManager;
