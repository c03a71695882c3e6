//! Admission control and lookup indices over live connections.
//!
//! The manager only stores connection ids. The connections themselves are
//! owned by the server hub and passed in by reference, which keeps the
//! indices free of shared ownership.

use super::connection::{Connection, ConnectionId};
use crate::error::{LimitKind, ProtocolError, Result};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ConnectionManager {
    max_connections: usize,
    max_per_address: usize,
    live: HashSet<ConnectionId>,
    by_address: HashMap<SocketAddr, ConnectionId>,
    by_account: HashMap<String, ConnectionId>,
    by_character: HashMap<String, ConnectionId>,
    per_address: HashMap<IpAddr, usize>,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, max_per_address: usize) -> Self {
        Self {
            max_connections,
            max_per_address,
            live: HashSet::new(),
            by_address: HashMap::new(),
            by_account: HashMap::new(),
            by_character: HashMap::new(),
            per_address: HashMap::new(),
        }
    }

    /// Admits a new connection.
    ///
    /// # Errors
    /// `LimitExceeded` when the server is full or the peer's address already
    /// holds its share of connections. The caller must drop the socket
    /// without replying.
    pub fn add_connection(&mut self, conn: &Connection) -> Result<()> {
        if self.live.len() >= self.max_connections {
            return Err(ProtocolError::LimitExceeded(LimitKind::Total {
                max: self.max_connections,
            }));
        }
        let ip = conn.peer().ip();
        let from_address = self.per_address.get(&ip).copied().unwrap_or(0);
        if from_address >= self.max_per_address {
            return Err(ProtocolError::LimitExceeded(LimitKind::PerAddress {
                address: ip,
                max: self.max_per_address,
            }));
        }

        self.live.insert(conn.id());
        self.by_address.insert(conn.peer(), conn.id());
        *self.per_address.entry(ip).or_insert(0) += 1;
        debug!(conn_id = conn.id(), peer = %conn.peer(), live = self.live.len(), "Connection registered");
        Ok(())
    }

    /// Brings the account and character indices in line with the
    /// connection's current bindings.
    ///
    /// # Errors
    /// `NameAlreadyInUse` if another connection owns the account or character
    /// name; nothing is changed in that case. `UnregisteredConnection` if the
    /// connection was never added.
    pub fn update_connection(
        &mut self,
        conn: &Connection,
        previous_account: Option<&str>,
        previous_character: Option<&str>,
    ) -> Result<()> {
        let id = conn.id();
        if !self.live.contains(&id) {
            return Err(ProtocolError::UnregisteredConnection);
        }

        let account = conn.account_name();
        let character = conn.character();
        for (index, name) in [(&self.by_account, account), (&self.by_character, character)] {
            if let Some(name) = name {
                if index.get(name).is_some_and(|owner| *owner != id) {
                    return Err(ProtocolError::NameAlreadyInUse(name.to_string()));
                }
            }
        }

        Self::rebind(&mut self.by_account, id, account, previous_account);
        Self::rebind(&mut self.by_character, id, character, previous_character);
        Ok(())
    }

    fn rebind(
        index: &mut HashMap<String, ConnectionId>,
        id: ConnectionId,
        current: Option<&str>,
        previous: Option<&str>,
    ) {
        if let Some(previous) = previous {
            if current != Some(previous) && index.get(previous) == Some(&id) {
                index.remove(previous);
            }
        }
        if let Some(current) = current {
            index.insert(current.to_string(), id);
        }
    }

    /// Drops a connection from every index it is part of.
    ///
    /// # Errors
    /// `UnregisteredConnection` if it was never added or is already gone.
    pub fn remove_connection(&mut self, conn: &Connection) -> Result<()> {
        let id = conn.id();
        if !self.live.remove(&id) {
            warn!(conn_id = id, peer = %conn.peer(), "Removing a connection that is not registered");
            return Err(ProtocolError::UnregisteredConnection);
        }

        if self.by_address.get(&conn.peer()) == Some(&id) {
            self.by_address.remove(&conn.peer());
        }
        // the connection may have been unbound without an update, so sweep by id
        self.by_account.retain(|_, owner| *owner != id);
        self.by_character.retain(|_, owner| *owner != id);

        let ip = conn.peer().ip();
        if let Some(count) = self.per_address.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                self.per_address.remove(&ip);
            }
        }
        debug!(conn_id = id, live = self.live.len(), "Connection deregistered");
        Ok(())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn count_for_address(&self, ip: IpAddr) -> usize {
        self.per_address.get(&ip).copied().unwrap_or(0)
    }

    pub fn find_by_address(&self, addr: &SocketAddr) -> Option<ConnectionId> {
        self.by_address.get(addr).copied()
    }

    pub fn find_by_account(&self, name: &str) -> Option<ConnectionId> {
        self.by_account.get(name).copied()
    }

    pub fn find_by_character(&self, name: &str) -> Option<ConnectionId> {
        self.by_character.get(name).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::{AccountStore, MemoryAccountStore, NewAccount};
    use crate::utils::compression::CompressionKind;
    use std::time::Instant;

    fn conn(id: ConnectionId, peer: &str) -> Connection {
        Connection::new(id, peer.parse().unwrap(), CompressionKind::Zlib, Instant::now())
    }

    fn account(name: &str) -> crate::auth::Account {
        MemoryAccountStore::new()
            .register(NewAccount {
                username: name.to_string(),
                password_hash: vec![1; 64],
                salt: vec![2; 16],
                email: "a@b".to_string(),
                creator_ip: "127.0.0.1".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_total_limit() {
        let mut manager = ConnectionManager::new(2, 10);
        manager.add_connection(&conn(1, "10.0.0.1:1000")).unwrap();
        manager.add_connection(&conn(2, "10.0.0.2:1000")).unwrap();
        let err = manager.add_connection(&conn(3, "10.0.0.3:1000")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LimitExceeded(LimitKind::Total { max: 2 })
        ));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_per_address_limit_is_independent() {
        let mut manager = ConnectionManager::new(50, 2);
        manager.add_connection(&conn(1, "10.0.0.1:1000")).unwrap();
        manager.add_connection(&conn(2, "10.0.0.1:1001")).unwrap();
        assert!(matches!(
            manager.add_connection(&conn(3, "10.0.0.1:1002")),
            Err(ProtocolError::LimitExceeded(LimitKind::PerAddress { .. }))
        ));
        manager.add_connection(&conn(4, "10.0.0.2:1000")).unwrap();
        assert_eq!(manager.count_for_address("10.0.0.1".parse().unwrap()), 2);
    }

    #[test]
    fn test_remove_frees_slots_and_is_not_repeatable() {
        let mut manager = ConnectionManager::new(1, 1);
        let c = conn(1, "10.0.0.1:1000");
        manager.add_connection(&c).unwrap();
        manager.remove_connection(&c).unwrap();
        assert!(matches!(
            manager.remove_connection(&c),
            Err(ProtocolError::UnregisteredConnection)
        ));
        assert_eq!(manager.count_for_address("10.0.0.1".parse().unwrap()), 0);
        manager.add_connection(&conn(2, "10.0.0.1:1001")).unwrap();
    }

    #[test]
    fn test_account_name_is_unique() {
        let mut manager = ConnectionManager::new(10, 10);
        let mut first = conn(1, "10.0.0.1:1000");
        let mut second = conn(2, "10.0.0.2:1000");
        manager.add_connection(&first).unwrap();
        manager.add_connection(&second).unwrap();

        first.bind_account(account("alice"));
        manager.update_connection(&first, None, None).unwrap();
        assert_eq!(manager.find_by_account("alice"), Some(1));

        second.bind_account(account("alice"));
        assert!(matches!(
            manager.update_connection(&second, None, None),
            Err(ProtocolError::NameAlreadyInUse(_))
        ));
        assert_eq!(manager.find_by_account("alice"), Some(1));

        // re-registering the same binding is fine
        manager.update_connection(&first, Some("alice"), None).unwrap();
    }

    #[test]
    fn test_stale_bindings_are_removed() {
        let mut manager = ConnectionManager::new(10, 10);
        let mut c = conn(1, "10.0.0.1:1000");
        manager.add_connection(&c).unwrap();

        c.bind_account(account("bob"));
        c.set_character(Some("Sir Bob".to_string()));
        manager.update_connection(&c, None, None).unwrap();
        assert_eq!(manager.find_by_character("Sir Bob"), Some(1));

        let previous_character = c.set_character(None);
        manager
            .update_connection(&c, Some("bob"), previous_character.as_deref())
            .unwrap();
        assert!(manager.find_by_character("Sir Bob").is_none());

        let previous = c.unbind_account().map(|a| a.username);
        manager.update_connection(&c, previous.as_deref(), None).unwrap();
        assert!(manager.find_by_account("bob").is_none());
    }

    #[test]
    fn test_remove_clears_every_index() {
        let mut manager = ConnectionManager::new(10, 10);
        let mut c = conn(7, "[2001:db8::1]:4000");
        manager.add_connection(&c).unwrap();
        c.bind_account(account("eve"));
        c.set_character(Some("Eve".to_string()));
        manager.update_connection(&c, None, None).unwrap();

        manager.remove_connection(&c).unwrap();
        assert!(manager.is_empty());
        assert!(manager.find_by_address(&c.peer()).is_none());
        assert!(manager.find_by_account("eve").is_none());
        assert!(manager.find_by_character("Eve").is_none());
    }

    #[test]
    fn test_update_unknown_connection() {
        let mut manager = ConnectionManager::new(10, 10);
        assert!(matches!(
            manager.update_connection(&conn(9, "10.0.0.9:1"), None, None),
            Err(ProtocolError::UnregisteredConnection)
        ));
    }
}
