//! Connection negotiation: the first packet a client sends.
//!
//! The client announces the protocol signature, revision and engine version
//! it speaks. All three must match exactly; the first mismatch found is
//! reported back and the connection is closed.

use super::context::ServerContext;
use super::router::Router;
use crate::config::{PROTOCOL_REVISION, PROTOCOL_SIGNATURE, VERSION_MAJOR, VERSION_MINOR};
use crate::core::packet::{Packet, PacketType, RejectionCode};
use crate::error::{constants, ProtocolError, Result};
use crate::session::{CloseReason, Connection, ProtocolState};
use tracing::{debug, info};

/// Router for `Negotiating`. Keep-alives are not valid before the handshake.
pub fn router() -> Router {
    let mut router = Router::new(ProtocolState::Negotiating);
    router.register(PacketType::NegotiateConnection, negotiate);
    router.unregister(PacketType::KeepAlive);
    router
}

fn negotiate(conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
    let Packet::NegotiateConnection {
        signature,
        revision,
        major,
        minor,
    } = packet
    else {
        return Err(ProtocolError::corrupt(constants::ERR_HANDLER_MISMATCH));
    };

    let rejection = if *signature != PROTOCOL_SIGNATURE {
        Some(RejectionCode::Signature)
    } else if *revision != PROTOCOL_REVISION {
        Some(RejectionCode::Revision)
    } else if *major != VERSION_MAJOR || *minor != VERSION_MINOR {
        Some(RejectionCode::Outdated)
    } else {
        None
    };

    if let Some(reason) = rejection {
        info!(
            conn_id = conn.id(),
            peer = %conn.peer(),
            ?reason,
            revision,
            version = %format!("{major}.{minor}"),
            "Connection rejected during negotiation"
        );
        conn.send(&Packet::ConnectionRejected { reason })?;
        conn.close(CloseReason::Rejected);
        return Ok(());
    }

    let general = &ctx.config.general;
    conn.send(&Packet::ConnectionAccepted {
        registration_disabled: ctx.config.login.registration_disabled,
        server_name: general.server_name.clone(),
        news_url: general.news_url.clone(),
    })?;
    conn.set_state(ProtocolState::WaitingForLogin);
    debug!(conn_id = conn.id(), peer = %conn.peer(), "Negotiation complete");
    Ok(())
}
