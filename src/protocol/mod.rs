//! # Protocol State Machine
//!
//! Packet handlers for each connection state and the routers that select
//! them.
//!
//! ```text
//! Negotiating -> WaitingForLogin <-> Authenticating -> InGame
//!      \______________\__________________\______________\___> Closed
//! ```
//!
//! ## Components
//! - **Router**: per-state handler tables with a rejecting default
//! - **Negotiation**: signature, revision and version checks
//! - **Login**: registration and challenge-response login
//! - **Context**: configuration and shared stores passed to handlers

pub mod context;
pub mod login;
pub mod negotiation;
pub mod router;

pub use context::ServerContext;
pub use router::{Handler, Router, Routers};
