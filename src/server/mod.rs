//! # Server
//!
//! The reactor around the protocol state machine.
//!
//! - [`hub::Server`] owns every connection, the connection manager, the ban
//!   list and the account store. It is synchronous and driven by events.
//! - [`listener::SessionServer`] binds the TCP listeners and runs one hub
//!   task that feeds the `Server` from the socket tasks, plus a periodic tick
//!   for timeouts.

pub mod hub;
pub mod listener;

pub use hub::{Admission, Drained, Server};
pub use listener::SessionServer;
