//! Login and registration handlers.
//!
//! `WaitingForLogin` accepts `StartLogin` and `Register`. A known, unlocked
//! account gets a random challenge and the connection moves to
//! `Authenticating`, where the only useful packet is `FinishLogin` carrying
//! `SHA-256(password_hash || challenge)`. The challenge is consumed by the
//! first answer, right or wrong.

use super::context::ServerContext;
use super::router::Router;
use crate::auth::{generate_challenge, validate_registration, verify_solution, NewAccount};
use crate::core::packet::{reason, BadLoginReason, Packet, PacketType};
use crate::error::{constants, ProtocolError, Result};
use crate::session::{CloseReason, Connection, ProtocolState};
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub fn waiting_for_login_router() -> Router {
    let mut router = Router::new(ProtocolState::WaitingForLogin);
    router.register(PacketType::StartLogin, start_login);
    router.register(PacketType::Register, register);
    router.register(PacketType::Disconnect, client_disconnect);
    router
}

pub fn authenticating_router() -> Router {
    let mut router = Router::new(ProtocolState::Authenticating);
    router.register(PacketType::FinishLogin, finish_login);
    router.register(PacketType::Disconnect, client_disconnect);
    router
}

/// Logged-in sessions. Game-world packets are handled elsewhere.
pub fn in_game_router() -> Router {
    let mut router = Router::new(ProtocolState::InGame);
    router.register(PacketType::Disconnect, client_disconnect);
    router
}

fn client_disconnect(conn: &mut Connection, _ctx: &mut ServerContext, _packet: &Packet) -> Result<()> {
    debug!(conn_id = conn.id(), peer = %conn.peer(), account = ?conn.account_name(), "Client disconnected");
    conn.close(CloseReason::ClientDisconnect);
    Ok(())
}

fn bad_login(conn: &mut Connection, ctx: &ServerContext, reason: BadLoginReason) -> Result<()> {
    ctx.metrics.login_failed();
    conn.send(&Packet::BadLogin { reason })
}

fn start_login(conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
    let Packet::StartLogin { username } = packet else {
        return Err(ProtocolError::corrupt(constants::ERR_HANDLER_MISMATCH));
    };

    let now = ctx.now;
    if let Some(last) = conn.last_login_attempt() {
        if now.saturating_duration_since(last) < ctx.config.login.login_delay {
            debug!(conn_id = conn.id(), username = %username, "Login attempt inside the login delay");
            return bad_login(conn, ctx, BadLoginReason::WaitForLogin);
        }
    }
    conn.record_login_attempt(now);

    let Some(account) = ctx.accounts.find_by_username(username) else {
        info!(conn_id = conn.id(), peer = %conn.peer(), username = %username, "Login for unknown account");
        return bad_login(conn, ctx, BadLoginReason::BadUsername);
    };

    if account.is_locked_out(SystemTime::now()) {
        info!(conn_id = conn.id(), peer = %conn.peer(), username = %username, "Login for locked account");
        return bad_login(conn, ctx, BadLoginReason::LockedOut);
    }

    let challenge = generate_challenge()?;
    conn.send(&Packet::LoginChallenge {
        salt: account.salt,
        challenge: *challenge,
    })?;
    conn.set_challenge(challenge);
    conn.bind_account(account);
    conn.set_state(ProtocolState::Authenticating);
    debug!(conn_id = conn.id(), username = %username, "Login challenge issued");
    Ok(())
}

fn finish_login(conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
    let Packet::FinishLogin {
        request_serial,
        solution,
    } = packet
    else {
        return Err(ProtocolError::corrupt(constants::ERR_HANDLER_MISMATCH));
    };

    let challenge = conn.take_challenge();
    let verified = match (conn.account(), challenge.as_ref()) {
        (Some(account), Some(challenge)) => {
            verify_solution(&account.password_hash, challenge, solution)
        }
        _ => false,
    };

    if !verified {
        info!(conn_id = conn.id(), peer = %conn.peer(), account = ?conn.account_name(), "Login failed, wrong challenge solution");
        conn.unbind_account();
        conn.set_state(ProtocolState::WaitingForLogin);
        return bad_login(conn, ctx, BadLoginReason::General);
    }

    match ctx.manager.update_connection(conn, None, None) {
        Ok(()) => {
            info!(conn_id = conn.id(), peer = %conn.peer(), account = ?conn.account_name(), "Login succeeded");
            ctx.metrics.login_succeeded();
            conn.send(&Packet::Success {
                request_serial: *request_serial,
                reason_code: reason::GENERAL,
            })?;
            conn.set_state(ProtocolState::InGame);
            Ok(())
        }
        Err(ProtocolError::NameAlreadyInUse(name)) => {
            warn!(conn_id = conn.id(), peer = %conn.peer(), account = %name, "Account is already logged in elsewhere");
            ctx.metrics.login_failed();
            conn.unbind_account();
            conn.send(&Packet::Failed {
                request_serial: *request_serial,
                reason_code: reason::ALREADY_LOGGED_IN,
            })?;
            conn.set_state(ProtocolState::WaitingForLogin);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn register(conn: &mut Connection, ctx: &mut ServerContext, packet: &Packet) -> Result<()> {
    let Packet::Register {
        request_serial,
        username,
        salt,
        password_hash,
        email,
    } = packet
    else {
        return Err(ProtocolError::corrupt(constants::ERR_HANDLER_MISMATCH));
    };
    let failed = |reason_code| Packet::Failed {
        request_serial: *request_serial,
        reason_code,
    };

    if ctx.config.login.registration_disabled {
        debug!(conn_id = conn.id(), "Registration attempted while disabled");
        return conn.send(&failed(reason::REGISTRATION_DISABLED));
    }

    let request = NewAccount {
        username: username.clone(),
        password_hash: password_hash.clone(),
        salt: salt.clone(),
        email: email.clone(),
        creator_ip: conn.peer().ip().to_string(),
    };
    if let Err(e) = validate_registration(&request) {
        info!(conn_id = conn.id(), peer = %conn.peer(), error = %e, "Registration refused");
        return conn.send(&failed(reason::INVALID_FIELD));
    }

    match ctx.accounts.register(request) {
        Ok(account) => {
            ctx.metrics.registration();
            info!(conn_id = conn.id(), peer = %conn.peer(), username = %account.username, "Registration accepted");
            conn.send(&Packet::Success {
                request_serial: *request_serial,
                reason_code: reason::GENERAL,
            })
        }
        Err(ProtocolError::UsernameTaken(name)) => {
            info!(conn_id = conn.id(), username = %name, "Registration refused, username taken");
            conn.send(&failed(reason::USERNAME_TAKEN))
        }
        Err(ProtocolError::InvalidField(msg)) => {
            info!(conn_id = conn.id(), error = %msg, "Registration refused by account store");
            conn.send(&failed(reason::INVALID_FIELD))
        }
        Err(e) => Err(e),
    }
}
