#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests across the public API
//! Boundary conditions for the codec, the ban list, the connection manager and
//! the account store

use session_protocol::auth::{AccountStore, MemoryAccountStore, NewAccount};
use session_protocol::core::packet::{Packet, MAX_USERNAME_CHARS};
use session_protocol::error::{LimitKind, ProtocolError};
use session_protocol::security::{BanStore, Cidr, IpBanRecord};
use session_protocol::session::{Connection, ConnectionManager};
use session_protocol::utils::compression::CompressionKind;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant, SystemTime};

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_buffer_needs_more_data() {
    assert!(matches!(
        Packet::decode(&[], CompressionKind::Zlib),
        Err(ProtocolError::NeedMoreData)
    ));
}

#[test]
fn test_header_only_packet() {
    let bytes = Packet::KeepAlive.encode(CompressionKind::Zlib).unwrap();
    assert_eq!(bytes, vec![3, 0, 0, 0]);
}

#[test]
fn test_username_at_limit_with_multibyte_chars() {
    let username: String = "é".repeat(MAX_USERNAME_CHARS);
    let packet = Packet::StartLogin {
        username: username.clone(),
    };
    let bytes = packet.encode(CompressionKind::Zlib).unwrap();
    let (decoded, _) = Packet::decode(&bytes, CompressionKind::Zlib).unwrap();
    assert_eq!(decoded, Packet::StartLogin { username });
}

#[test]
fn test_encoder_refuses_overlong_username() {
    let packet = Packet::StartLogin {
        username: "x".repeat(MAX_USERNAME_CHARS + 1),
    };
    assert!(matches!(
        packet.encode(CompressionKind::Zlib),
        Err(ProtocolError::InvalidField(_))
    ));
}

#[test]
fn test_invalid_utf8_is_corrupt() {
    // StartLogin with a 2-byte string that is not UTF-8
    let bytes = [6, 0, 0, 0, 2, 0, 0, 0, 0xff, 0xfe];
    assert!(matches!(
        Packet::decode(&bytes, CompressionKind::Zlib),
        Err(ProtocolError::Corrupt(_))
    ));
}

#[test]
fn test_compressed_flag_with_mismatched_algorithm() {
    let packet = Packet::ConnectionAccepted {
        registration_disabled: false,
        server_name: "a".repeat(64),
        news_url: "b".repeat(256),
    };
    let bytes = packet.encode(CompressionKind::Zstd).unwrap();
    assert!(matches!(
        Packet::decode(&bytes, CompressionKind::Lz4),
        Err(ProtocolError::Corrupt(_))
    ));
}

// ============================================================================
// BAN LIST EDGE CASES
// ============================================================================

#[test]
fn test_ban_whole_ipv4_space() {
    let mut bans = BanStore::new();
    bans.add(IpBanRecord::permanent("0.0.0.0/0".parse().unwrap(), "").unwrap());
    let now = SystemTime::now();

    assert!(bans.is_banned("1.2.3.4", now).unwrap());
    assert!(bans.is_banned("255.255.255.255", now).unwrap());
    assert!(!bans.is_banned("::1", now).unwrap());
}

#[test]
fn test_ipv6_prefix_boundaries() {
    let now = SystemTime::now();
    let cases = [
        ("2001:db8::/32", "2001:db8:ffff::1", "2001:db9::1"),
        ("2001:db8:0:1::/64", "2001:db8:0:1:ffff::", "2001:db8:0:2::"),
        ("2001:db8::1:0:0/96", "2001:db8::1:abcd:ef01", "2001:db8::2:0:0"),
        ("2001:db8::ff00/120", "2001:db8::ffab", "2001:db8::fe00"),
    ];
    for (range, inside, outside) in cases {
        let mut bans = BanStore::new();
        bans.add(IpBanRecord::permanent(range.parse().unwrap(), "").unwrap());
        assert!(bans.is_banned(inside, now).unwrap(), "{inside} in {range}");
        assert!(!bans.is_banned(outside, now).unwrap(), "{outside} in {range}");
    }
}

#[test]
fn test_temporary_ban_expires() {
    let mut bans = BanStore::new();
    let now = SystemTime::now();
    let expires = now + Duration::from_secs(60);
    bans.add(IpBanRecord::temporary("10.1.0.0/16".parse().unwrap(), expires, "cooldown").unwrap());

    assert!(bans.is_banned("10.1.2.3", now).unwrap());
    assert!(!bans.is_banned("10.1.2.3", expires).unwrap());
    assert_eq!(bans.purge_expired(expires), 1);
    assert!(bans.is_empty());
}

#[test]
fn test_invalid_ban_inputs() {
    assert!("10.0.0.0/33".parse::<Cidr>().is_err());
    assert!("::/129".parse::<Cidr>().is_err());
    assert!("not-an-ip".parse::<Cidr>().is_err());
    assert!(IpBanRecord::permanent("10.0.0.1".parse().unwrap(), &"c".repeat(65)).is_err());
    assert!(BanStore::new().is_banned("10.0.0", SystemTime::now()).is_err());
}

// ============================================================================
// CONNECTION MANAGER EDGE CASES
// ============================================================================

fn connection(id: u64, peer: &str) -> Connection {
    let peer: SocketAddr = peer.parse().unwrap();
    Connection::new(id, peer, CompressionKind::Zlib, Instant::now())
}

#[test]
fn test_manager_limit_of_one() {
    let mut manager = ConnectionManager::new(1, 1);
    let first = connection(1, "10.0.0.1:1");
    manager.add_connection(&first).unwrap();

    assert!(matches!(
        manager.add_connection(&connection(2, "10.0.0.2:1")),
        Err(ProtocolError::LimitExceeded(LimitKind::Total { max: 1 }))
    ));
    manager.remove_connection(&first).unwrap();
    manager.add_connection(&connection(2, "10.0.0.2:1")).unwrap();
}

#[test]
fn test_manager_remove_unknown_connection() {
    let mut manager = ConnectionManager::new(4, 4);
    assert!(matches!(
        manager.remove_connection(&connection(9, "10.0.0.1:1")),
        Err(ProtocolError::UnregisteredConnection)
    ));
}

#[test]
fn test_manager_addresses_are_counted_per_ip_not_port() {
    let mut manager = ConnectionManager::new(10, 2);
    manager.add_connection(&connection(1, "[2001:db8::1]:1")).unwrap();
    manager.add_connection(&connection(2, "[2001:db8::1]:2")).unwrap();
    assert!(matches!(
        manager.add_connection(&connection(3, "[2001:db8::1]:3")),
        Err(ProtocolError::LimitExceeded(LimitKind::PerAddress { .. }))
    ));
    let ip: IpAddr = "2001:db8::1".parse().unwrap();
    assert_eq!(manager.count_for_address(ip), 2);
}

// ============================================================================
// ACCOUNT STORE EDGE CASES
// ============================================================================

fn new_account(username: &str) -> NewAccount {
    NewAccount {
        username: username.into(),
        password_hash: vec![1; 64],
        salt: vec![2; 16],
        email: "player@example.com".into(),
        creator_ip: "::1".into(),
    }
}

#[test]
fn test_username_boundaries() {
    let mut store = MemoryAccountStore::new();
    assert!(store.register(new_account(&"a".repeat(32))).is_ok());
    assert!(matches!(
        store.register(new_account(&"a".repeat(33))),
        Err(ProtocolError::InvalidField(_))
    ));
    assert!(matches!(
        store.register(new_account("")),
        Err(ProtocolError::InvalidField(_))
    ));
}

#[test]
fn test_account_ids_are_unique() {
    let mut store = MemoryAccountStore::new();
    let a = store.register(new_account("first")).unwrap();
    let b = store.register(new_account("second")).unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(store.find_by_username("second").unwrap().id, b.id);
}

#[test]
fn test_duplicate_registration_keeps_original() {
    let mut store = MemoryAccountStore::new();
    store.register(new_account("taken")).unwrap();

    let mut second = new_account("taken");
    second.email = "other@example.com".into();
    assert!(matches!(
        store.register(second),
        Err(ProtocolError::UsernameTaken(_))
    ));
    assert_eq!(
        store.find_by_username("taken").unwrap().email,
        "player@example.com"
    );
}
