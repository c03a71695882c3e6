//! Packet routing by protocol state.
//!
//! Each state has its own [`Router`]: a table of handlers indexed by
//! [`PacketType`] plus a default for everything unmapped. Changing state swaps
//! the router, which changes the set of packets a client may send.

use super::context::ServerContext;
use crate::core::packet::{Packet, PacketType};
use crate::error::Result;
use crate::session::{CloseReason, Connection, ProtocolState};
use tracing::{trace, warn};

/// A packet handler.
pub type Handler =
    Box<dyn Fn(&mut Connection, &mut ServerContext, &Packet) -> Result<()> + Send + Sync + 'static>;

pub struct Router {
    state: ProtocolState,
    handlers: Vec<Option<Handler>>,
    default: Handler,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mapped: Vec<PacketType> = PacketType::ALL
            .iter()
            .copied()
            .filter(|t| self.handles(*t))
            .collect();
        f.debug_struct("Router")
            .field("state", &self.state)
            .field("mapped", &mapped)
            .finish()
    }
}

/// Unmapped packets are protocol violations.
fn reject_unexpected(conn: &mut Connection, _ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
    warn!(
        conn_id = conn.id(),
        peer = %conn.peer(),
        state = %conn.state(),
        packet_type = ?packet.packet_type(),
        "Unexpected packet, closing connection"
    );
    conn.close(CloseReason::UnexpectedPacket);
    Ok(())
}

fn keep_alive(conn: &mut Connection, _ctx: &mut ServerContext, _packet: &Packet) -> Result<()> {
    conn.send(&Packet::KeepAlive)
}

impl Router {
    /// A router for `state` with the keep-alive handler installed.
    pub fn new(state: ProtocolState) -> Self {
        let mut router = Self::empty(state);
        router.register(PacketType::KeepAlive, keep_alive);
        router
    }

    /// A router with nothing mapped.
    pub fn empty(state: ProtocolState) -> Self {
        let mut handlers = Vec::with_capacity(PacketType::COUNT);
        handlers.resize_with(PacketType::COUNT, || None);
        Self {
            state,
            handlers,
            default: Box::new(reject_unexpected),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn register<F>(&mut self, packet_type: PacketType, handler: F)
    where
        F: Fn(&mut Connection, &mut ServerContext, &Packet) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers[packet_type.index()] = Some(Box::new(handler));
    }

    pub fn unregister(&mut self, packet_type: PacketType) {
        self.handlers[packet_type.index()] = None;
    }

    pub fn handles(&self, packet_type: PacketType) -> bool {
        self.handlers
            .get(packet_type.index())
            .is_some_and(Option::is_some)
    }

    pub fn dispatch(&self, conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
        let packet_type = packet.packet_type();
        trace!(conn_id = conn.id(), state = %self.state, packet_type = ?packet_type, "Dispatching packet");
        match self.handlers.get(packet_type.index()).and_then(Option::as_ref) {
            Some(handler) => handler(conn, ctx, packet),
            None => (self.default)(conn, ctx, packet),
        }
    }
}

/// The router of every live state.
#[derive(Debug)]
pub struct Routers {
    negotiating: Router,
    waiting_for_login: Router,
    authenticating: Router,
    in_game: Router,
}

impl Routers {
    pub fn new(
        negotiating: Router,
        waiting_for_login: Router,
        authenticating: Router,
        in_game: Router,
    ) -> Self {
        Self {
            negotiating,
            waiting_for_login,
            authenticating,
            in_game,
        }
    }

    /// The handshake and login routers.
    pub fn standard() -> Self {
        Self::new(
            super::negotiation::router(),
            super::login::waiting_for_login_router(),
            super::login::authenticating_router(),
            super::login::in_game_router(),
        )
    }

    /// `None` for `Closed`, which accepts nothing.
    pub fn for_state(&self, state: ProtocolState) -> Option<&Router> {
        match state {
            ProtocolState::Negotiating => Some(&self.negotiating),
            ProtocolState::WaitingForLogin => Some(&self.waiting_for_login),
            ProtocolState::Authenticating => Some(&self.authenticating),
            ProtocolState::InGame => Some(&self.in_game),
            ProtocolState::Closed => None,
        }
    }

    /// Routes `packet` through the router of the connection's current state.
    pub fn dispatch(&self, conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
        match self.for_state(conn.state()) {
            Some(router) => router.dispatch(conn, ctx, packet),
            None => Ok(()),
        }
    }
}

impl Default for Routers {
    fn default() -> Self {
        Self::standard()
    }
}
