//! Player accounts and the store they live in.
//!
//! The session layer only needs two things from account storage: create an
//! account and look one up by name. [`AccountStore`] is that contract;
//! [`MemoryAccountStore`] keeps everything in a `HashMap` so lookups from a
//! handler never block the reactor.

use crate::core::packet::{MAX_EMAIL_CHARS, MAX_USERNAME_CHARS, PASSWORD_HASH_LEN, SALT_LEN};
use crate::error::{constants, ProtocolError, Result};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::info;

/// Longest textual IP address (IPv6 with an embedded IPv4 tail).
pub const MAX_CREATOR_IP_CHARS: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: u64,
    pub username: String,
    /// Salted password hash as produced by the client.
    pub password_hash: [u8; PASSWORD_HASH_LEN],
    pub salt: [u8; SALT_LEN],
    pub email: String,
    pub enabled: bool,
    pub banned: bool,
    /// `None` on a banned account means the ban never lifts.
    pub ban_expires: Option<SystemTime>,
    pub created_at: SystemTime,
    pub creator_ip: String,
}

impl Account {
    /// Whether the account may not log in at `now`.
    pub fn is_locked_out(&self, now: SystemTime) -> bool {
        if !self.enabled {
            return true;
        }
        self.banned && self.ban_expires.map_or(true, |expires| now < expires)
    }
}

/// Registration request as it arrives from a client.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub email: String,
    pub creator_ip: String,
}

fn char_len_between(text: &str, min: usize, max: usize) -> bool {
    let len = text.chars().count();
    (min..=max).contains(&len)
}

/// Checks the field constraints of a registration request.
///
/// Uniqueness is not checked here, that is the store's job.
pub fn validate_registration(request: &NewAccount) -> Result<()> {
    let invalid = |msg: &str| Err(ProtocolError::InvalidField(msg.to_string()));

    if !char_len_between(&request.username, 1, MAX_USERNAME_CHARS) {
        return invalid(constants::ERR_USERNAME_LENGTH);
    }
    if request.password_hash.len() != PASSWORD_HASH_LEN {
        return invalid(constants::ERR_HASH_LENGTH);
    }
    if request.salt.len() != SALT_LEN {
        return invalid(constants::ERR_SALT_LENGTH);
    }
    if !char_len_between(&request.email, 1, MAX_EMAIL_CHARS) {
        return invalid(constants::ERR_EMAIL_LENGTH);
    }
    if !request.email.contains('@') {
        return invalid(constants::ERR_EMAIL_SYNTAX);
    }
    if !char_len_between(&request.creator_ip, 1, MAX_CREATOR_IP_CHARS) {
        return invalid(constants::ERR_CREATOR_IP_LENGTH);
    }
    Ok(())
}

/// Account persistence as seen by the session layer.
pub trait AccountStore: Send {
    /// Creates an account. Fails with `InvalidField` or `UsernameTaken`
    /// without changing anything.
    fn register(&mut self, request: NewAccount) -> Result<Account>;

    fn find_by_username(&self, username: &str) -> Option<Account>;
}

/// In-process account store indexed by username.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: HashMap<String, Account>,
    next_id: u64,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Mutable access for administrative changes (ban, disable).
    pub fn get_mut(&mut self, username: &str) -> Option<&mut Account> {
        self.accounts.get_mut(username)
    }
}

impl AccountStore for MemoryAccountStore {
    fn register(&mut self, request: NewAccount) -> Result<Account> {
        validate_registration(&request)?;
        if self.accounts.contains_key(&request.username) {
            return Err(ProtocolError::UsernameTaken(request.username));
        }

        let password_hash: [u8; PASSWORD_HASH_LEN] = request
            .password_hash
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidField(constants::ERR_HASH_LENGTH.to_string()))?;
        let salt: [u8; SALT_LEN] = request
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidField(constants::ERR_SALT_LENGTH.to_string()))?;

        self.next_id += 1;
        let account = Account {
            id: self.next_id,
            username: request.username,
            password_hash,
            salt,
            email: request.email,
            enabled: true,
            banned: false,
            ban_expires: None,
            created_at: SystemTime::now(),
            creator_ip: request.creator_ip,
        };
        info!(username = %account.username, id = account.id, creator_ip = %account.creator_ip, "Account registered");
        self.accounts
            .insert(account.username.clone(), account.clone());
        Ok(account)
    }

    fn find_by_username(&self, username: &str) -> Option<Account> {
        self.accounts.get(username).cloned()
    }
}
