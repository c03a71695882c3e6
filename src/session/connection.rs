//! Per-socket session state.
//!
//! A [`Connection`] is a plain value owned by the server hub: it buffers the
//! bytes received from the peer, queues encoded replies until the transport
//! picks them up, and carries the identity bound to the session as the login
//! exchange progresses. It never touches a socket itself.

use crate::auth::{Account, Challenge};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::trace;

/// Identifier assigned by the server when a socket is accepted.
pub type ConnectionId = u64;

/// Where a connection is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// Waiting for the client's handshake.
    Negotiating,
    /// Handshake done; expecting a login or registration.
    WaitingForLogin,
    /// A challenge was issued; expecting its solution.
    Authenticating,
    /// Logged in.
    InGame,
    /// Terminal. Nothing is dispatched once here.
    Closed,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Negotiating => "negotiating",
            ProtocolState::WaitingForLogin => "waiting-for-login",
            ProtocolState::Authenticating => "authenticating",
            ProtocolState::InGame => "in-game",
            ProtocolState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Handshake refused.
    Rejected,
    /// A packet arrived that the current state does not accept.
    UnexpectedPacket,
    /// The peer sent bytes that do not decode.
    Corrupt,
    /// No activity for the whole timeout window.
    Timeout,
    /// The client said goodbye.
    ClientDisconnect,
    /// The socket went away.
    PeerClosed,
    /// A handler failed.
    Error,
    /// The server is stopping.
    Shutdown,
}

/// Outcome of a timeout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    None,
    /// Half the window passed: send one keep-alive.
    Probe,
    /// The whole window passed: notify and close.
    Expire,
}

pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: ProtocolState,
    compression: CompressionKind,
    recv_buf: BytesMut,
    outbound: BytesMut,
    queued_packets: usize,
    last_activity: Instant,
    keepalive_pending: bool,
    account: Option<Account>,
    character: Option<String>,
    challenge: Option<Challenge>,
    last_login_attempt: Option<Instant>,
    close_reason: Option<CloseReason>,
}

impl fmt::Debug for Connection {
    // challenge material stays out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("account", &self.account_name())
            .field("character", &self.character)
            .field("close_reason", &self.close_reason)
            .finish()
    }
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, compression: CompressionKind, now: Instant) -> Self {
        Self {
            id,
            peer,
            state: ProtocolState::Negotiating,
            compression,
            recv_buf: BytesMut::with_capacity(1024),
            outbound: BytesMut::new(),
            queued_packets: 0,
            last_activity: now,
            keepalive_pending: false,
            account: None,
            character: None,
            challenge: None,
            last_login_attempt: None,
            close_reason: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ProtocolState::Closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Moves to another state. A closed connection stays closed.
    pub fn set_state(&mut self, state: ProtocolState) {
        if self.is_closed() {
            return;
        }
        trace!(conn_id = self.id, from = %self.state, to = %state, "State transition");
        self.state = state;
    }

    /// Marks the connection closed. Returns `false` if it already was.
    ///
    /// Replies queued before the close are still delivered.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ProtocolState::Closed;
        self.close_reason = Some(reason);
        self.challenge = None;
        true
    }

    /// Records peer activity, which also answers any outstanding probe.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.keepalive_pending = false;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn keepalive_pending(&self) -> bool {
        self.keepalive_pending
    }

    /// Appends received bytes to the decode buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.recv_buf.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.recv_buf.len()
    }

    /// Decodes the next complete packet from the buffer.
    ///
    /// `Ok(None)` means the buffer holds only part of a packet; the bytes are
    /// kept for the next call.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        if self.recv_buf.is_empty() {
            return Ok(None);
        }
        match Packet::decode(&self.recv_buf, self.compression) {
            Ok((packet, used)) => {
                self.recv_buf.advance(used);
                Ok(Some(packet))
            }
            Err(ProtocolError::NeedMoreData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encodes `packet` onto the outbound queue. Ignored once closed.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            trace!(conn_id = self.id, packet_type = ?packet.packet_type(), "Dropping send on closed connection");
            return Ok(());
        }
        let bytes = packet.encode(self.compression)?;
        self.outbound.extend_from_slice(&bytes);
        self.queued_packets += 1;
        Ok(())
    }

    /// Packets waiting in the outbound queue.
    pub fn queued_packets(&self) -> usize {
        self.queued_packets
    }

    /// Hands the queued bytes to the transport.
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            return None;
        }
        self.queued_packets = 0;
        Some(self.outbound.split().freeze())
    }

    /// Decides what the periodic sweep should do with this connection.
    ///
    /// A probe is reported once per quiet period; `Negotiating` connections
    /// are never probed since keep-alives are invalid before the handshake.
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> TimeoutAction {
        if self.is_closed() {
            return TimeoutAction::None;
        }
        let idle = now.saturating_duration_since(self.last_activity);
        if idle >= timeout {
            return TimeoutAction::Expire;
        }
        if idle >= timeout / 2
            && !self.keepalive_pending
            && self.state != ProtocolState::Negotiating
        {
            self.keepalive_pending = true;
            return TimeoutAction::Probe;
        }
        TimeoutAction::None
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.username.as_str())
    }

    /// Binds an account, returning the one it replaces.
    pub fn bind_account(&mut self, account: Account) -> Option<Account> {
        self.account.replace(account)
    }

    pub fn unbind_account(&mut self) -> Option<Account> {
        self.account.take()
    }

    pub fn character(&self) -> Option<&str> {
        self.character.as_deref()
    }

    /// Binds a character name, returning the one it replaces.
    pub fn set_character(&mut self, character: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.character, character)
    }

    pub fn set_challenge(&mut self, challenge: Challenge) {
        self.challenge = Some(challenge);
    }

    /// Removes the outstanding challenge. It is single use.
    pub fn take_challenge(&mut self) -> Option<Challenge> {
        self.challenge.take()
    }

    pub fn has_challenge(&self) -> bool {
        self.challenge.is_some()
    }

    pub fn last_login_attempt(&self) -> Option<Instant> {
        self.last_login_attempt
    }

    pub fn record_login_attempt(&mut self, now: Instant) {
        self.last_login_attempt = Some(now);
    }
}
