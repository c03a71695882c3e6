//! # Session Protocol
//!
//! Wire protocol and session layer for a tile-based multiplayer game server.
//!
//! ## Layers
//! - **core**: packet catalogue, little-endian field codec, optional body
//!   compression, and a `tokio_util` codec for framed streams
//! - **session**: per-connection state and the connection registry with
//!   admission limits and unique account/character bindings
//! - **protocol**: per-state packet routers with the negotiation and
//!   challenge-response login handlers
//! - **security**: dual-stack CIDR ban list
//! - **auth**: account store contract and login challenge material
//! - **server**: the single-owner hub and its TCP listeners
//!
//! ## Example
//! ```rust
//! use session_protocol::core::packet::Packet;
//! use session_protocol::utils::compression::CompressionKind;
//!
//! let bytes = Packet::StartLogin { username: "alice".into() }
//!     .encode(CompressionKind::Zlib)
//!     .unwrap();
//! let (packet, used) = Packet::decode(&bytes, CompressionKind::Zlib).unwrap();
//! assert_eq!(used, bytes.len());
//! assert_eq!(packet, Packet::StartLogin { username: "alice".into() });
//! ```

pub mod auth;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod security;
pub mod server;
pub mod session;
pub mod utils;

pub use config::ServerConfig;
pub use error::{ProtocolError, Result};
pub use server::{Server, SessionServer};
