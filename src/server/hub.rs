//! The single owner of all session state.
//!
//! [`Server`] reacts to transport events (accept, data, peer gone, timer
//! tick) and never awaits anything, so it can be driven directly in tests
//! with chosen timestamps. The async listener in [`super::listener`] feeds it
//! from one task.

use crate::auth::AccountStore;
use crate::config::ServerConfig;
use crate::core::packet::Packet;
use crate::error::{LimitKind, ProtocolError};
use crate::protocol::{Routers, ServerContext};
use crate::security::BanStore;
use crate::session::{CloseReason, Connection, ConnectionId, ProtocolState, TimeoutAction};
use crate::utils::logging::RateLimitedWarn;
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// At most one admission warning per this interval.
const ADMISSION_WARN_INTERVAL: Duration = Duration::from_secs(10);

/// Result of offering a freshly accepted socket to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(ConnectionId),
    /// The peer address is banned. Drop the socket without a reply.
    Banned,
    /// An admission limit was hit. Drop the socket without a reply.
    Rejected(LimitKind),
}

/// What the transport has to do for one connection.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Bytes to write, in order.
    pub data: Option<Bytes>,
    /// Close the socket after writing `data`.
    pub close: bool,
}

pub struct Server {
    ctx: ServerContext,
    routers: Routers,
    sessions: HashMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    admission_warn: RateLimitedWarn,
}

impl Server {
    pub fn new(
        config: Arc<ServerConfig>,
        accounts: Box<dyn AccountStore>,
        bans: BanStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::with_routers(config, accounts, bans, metrics, Routers::standard())
    }

    pub fn with_routers(
        config: Arc<ServerConfig>,
        accounts: Box<dyn AccountStore>,
        bans: BanStore,
        metrics: Arc<Metrics>,
        routers: Routers,
    ) -> Self {
        Self {
            ctx: ServerContext::new(config, accounts, bans, metrics),
            routers,
            sessions: HashMap::new(),
            next_id: 0,
            admission_warn: RateLimitedWarn::new(ADMISSION_WARN_INTERVAL),
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ServerContext {
        &mut self.ctx
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.ctx.metrics)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.sessions.get(&id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Admission control for a new socket.
    ///
    /// IPv4-mapped IPv6 peers are treated as their IPv4 address for ban
    /// checks and per-address limits.
    pub fn accept(&mut self, peer: SocketAddr, now: Instant) -> Admission {
        let peer = SocketAddr::new(peer.ip().to_canonical(), peer.port());

        if self.ctx.bans.is_banned_ip(peer.ip(), SystemTime::now()) {
            self.ctx.metrics.connection_banned();
            info!(peer = %peer, "Refusing connection from banned address");
            return Admission::Banned;
        }

        let id = self.next_id + 1;
        let conn = Connection::new(id, peer, self.ctx.config.protocol.compression, now);
        match self.ctx.manager.add_connection(&conn) {
            Ok(()) => {
                self.next_id = id;
                self.sessions.insert(id, conn);
                self.ctx.metrics.connection_accepted();
                info!(conn_id = id, peer = %peer, "Connection accepted");
                Admission::Admitted(id)
            }
            Err(ProtocolError::LimitExceeded(kind)) => {
                self.ctx.metrics.connection_rejected();
                if let Some(suppressed) = self.admission_warn.check(now) {
                    warn!(peer = %peer, limit = %kind, suppressed, "Connection refused by admission limits");
                }
                Admission::Rejected(kind)
            }
            Err(e) => {
                error!(peer = %peer, error = %e, "Unexpected admission failure");
                Admission::Rejected(LimitKind::Total {
                    max: self.ctx.config.network.max_connections,
                })
            }
        }
    }

    /// Feeds received bytes to a connection and runs every complete packet
    /// through the router of its current state.
    ///
    /// Errors never escape: a connection that misbehaves or whose handler
    /// fails is closed, and only that one.
    pub fn handle_data(&mut self, id: ConnectionId, data: &[u8], now: Instant) {
        self.ctx.now = now;
        let Some(conn) = self.sessions.get_mut(&id) else {
            debug!(conn_id = id, "Data for unknown connection");
            return;
        };
        if conn.is_closed() {
            return;
        }

        self.ctx.metrics.bytes_in(data.len() as u64);
        conn.touch(now);
        conn.feed(data);

        while !conn.is_closed() {
            match conn.next_packet() {
                Ok(Some(packet)) => {
                    self.ctx.metrics.packet_received();
                    if let Err(e) = self.routers.dispatch(conn, &mut self.ctx, &packet) {
                        report_handler_error(conn, &packet, e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.ctx.metrics.corrupt_packet();
                    warn!(conn_id = id, peer = %conn.peer(), state = %conn.state(), error = %e, "Corrupt data from peer, closing connection");
                    conn.close(CloseReason::Corrupt);
                }
            }
        }

        self.release_if_closed(id);
    }

    /// The peer's socket is gone.
    pub fn handle_closed(&mut self, id: ConnectionId) {
        let Some(conn) = self.sessions.get_mut(&id) else {
            return;
        };
        conn.close(CloseReason::PeerClosed);
        self.release_if_closed(id);
        self.sessions.remove(&id);
    }

    /// Periodic sweep: probes quiet connections and expires dead ones.
    pub fn check_timeouts(&mut self, now: Instant) {
        self.ctx.now = now;
        let timeout = self.ctx.config.network.timeout;
        let mut expired = Vec::new();

        for (id, conn) in self.sessions.iter_mut() {
            let outcome = match conn.check_timeout(now, timeout) {
                TimeoutAction::None => Ok(()),
                TimeoutAction::Probe => {
                    debug!(conn_id = id, "Sending keep-alive probe");
                    conn.send(&Packet::KeepAlive)
                }
                TimeoutAction::Expire => {
                    info!(conn_id = id, peer = %conn.peer(), state = %conn.state(), "Connection timed out");
                    self.ctx.metrics.timeout();
                    let notified = conn.send(&Packet::Disconnect);
                    conn.close(CloseReason::Timeout);
                    expired.push(*id);
                    notified
                }
            };
            if let Err(e) = outcome {
                warn!(conn_id = id, error = %e, "Failed to queue timeout packet");
            }
        }

        for id in expired {
            self.release_if_closed(id);
        }
    }

    /// Drops bans that have run out.
    pub fn purge_expired_bans(&mut self, now: SystemTime) -> usize {
        self.ctx.bans.purge_expired(now)
    }

    /// Collects the pending output of a connection. A closed connection is
    /// forgotten once drained.
    pub fn drain(&mut self, id: ConnectionId) -> Drained {
        let Some(conn) = self.sessions.get_mut(&id) else {
            return Drained {
                data: None,
                close: true,
            };
        };

        let packets = conn.queued_packets() as u64;
        let data = conn.take_outbound();
        if let Some(bytes) = &data {
            self.ctx.metrics.packets_out(packets);
            self.ctx.metrics.bytes_out(bytes.len() as u64);
        }

        let close = conn.is_closed();
        if close {
            self.release_if_closed(id);
            self.sessions.remove(&id);
        }
        Drained { data, close }
    }

    /// Closes every connection. Each still gets its pending output on the
    /// next drain.
    pub fn shutdown(&mut self) {
        let ids = self.connection_ids();
        for id in &ids {
            if let Some(conn) = self.sessions.get_mut(id) {
                conn.close(CloseReason::Shutdown);
            }
        }
        for id in ids {
            self.release_if_closed(id);
        }
    }

    /// Deregisters a closed connection from the connection manager exactly once.
    fn release_if_closed(&mut self, id: ConnectionId) {
        let Some(conn) = self.sessions.get(&id) else {
            return;
        };
        if !conn.is_closed() || !self.ctx.manager.contains(id) {
            return;
        }
        if let Err(e) = self.ctx.manager.remove_connection(conn) {
            warn!(conn_id = id, error = %e, "Failed to deregister connection");
            return;
        }
        self.ctx.metrics.connection_closed();
        info!(
            conn_id = id,
            peer = %conn.peer(),
            reason = ?conn.close_reason(),
            account = ?conn.account_name(),
            "Connection closed"
        );
    }
}

fn report_handler_error(conn: &mut Connection, packet: &Packet, e: ProtocolError) {
    if e.is_fatal_to_connection() {
        error!(
            conn_id = conn.id(),
            peer = %conn.peer(),
            state = %conn.state(),
            packet_type = ?packet.packet_type(),
            error = %e,
            "Handler failed, closing connection"
        );
        conn.close(CloseReason::Error);
    } else {
        warn!(
            conn_id = conn.id(),
            state = %conn.state(),
            packet_type = ?packet.packet_type(),
            error = %e,
            "Handler reported a non-fatal error"
        );
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_game = self
            .sessions
            .values()
            .filter(|c| c.state() == ProtocolState::InGame)
            .count();
        f.debug_struct("Server")
            .field("connections", &self.sessions.len())
            .field("in_game", &in_game)
            .finish()
    }
}
