//! Property-based tests using proptest
//!
//! These tests check codec invariants over randomly generated packets and
//! byte strings.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use session_protocol::core::packet::{BadLoginReason, Packet, PacketType, RejectionCode};
use session_protocol::error::ProtocolError;
use session_protocol::utils::compression::{compress, decompress, CompressionKind};
use proptest::prelude::*;

fn compression_kind() -> impl Strategy<Value = CompressionKind> {
    prop_oneof![
        Just(CompressionKind::Zlib),
        Just(CompressionKind::Lz4),
        Just(CompressionKind::Zstd),
    ]
}

fn rejection_code() -> impl Strategy<Value = RejectionCode> {
    prop_oneof![
        Just(RejectionCode::Other),
        Just(RejectionCode::Outdated),
        Just(RejectionCode::Revision),
        Just(RejectionCode::Signature),
        Just(RejectionCode::Banned),
        Just(RejectionCode::SecurityUpdate),
        Just(RejectionCode::NoSlots),
    ]
}

fn bad_login_reason() -> impl Strategy<Value = BadLoginReason> {
    prop_oneof![
        Just(BadLoginReason::General),
        Just(BadLoginReason::LockedOut),
        Just(BadLoginReason::BadUsername),
        Just(BadLoginReason::WaitForLogin),
    ]
}

fn packet() -> impl Strategy<Value = Packet> {
    prop_oneof![
        (any::<[u8; 2]>(), any::<u16>(), any::<u16>(), any::<u16>()).prop_map(
            |(signature, revision, major, minor)| Packet::NegotiateConnection {
                signature,
                revision,
                major,
                minor,
            }
        ),
        (any::<bool>(), "[a-zA-Z0-9 ]{0,64}", "[a-z:/.]{0,200}").prop_map(
            |(registration_disabled, server_name, news_url)| Packet::ConnectionAccepted {
                registration_disabled,
                server_name,
                news_url,
            }
        ),
        rejection_code().prop_map(|reason| Packet::ConnectionRejected { reason }),
        Just(Packet::KeepAlive),
        (any::<u32>(), any::<u16>()).prop_map(|(request_serial, reason_code)| Packet::Success {
            request_serial,
            reason_code,
        }),
        (any::<u32>(), any::<u16>()).prop_map(|(request_serial, reason_code)| Packet::Failed {
            request_serial,
            reason_code,
        }),
        "\\PC{0,32}".prop_map(|username| Packet::StartLogin { username }),
        (any::<[u8; 16]>(), any::<[u8; 32]>())
            .prop_map(|(salt, challenge)| Packet::LoginChallenge { salt, challenge }),
        (any::<u32>(), any::<[u8; 32]>()).prop_map(|(request_serial, solution)| {
            Packet::FinishLogin {
                request_serial,
                solution,
            }
        }),
        (
            any::<u32>(),
            "[a-z]{0,40}",
            prop::collection::vec(any::<u8>(), 0..32),
            prop::collection::vec(any::<u8>(), 0..96),
            "[a-z@.]{0,80}",
        )
            .prop_map(|(request_serial, username, salt, password_hash, email)| {
                Packet::Register {
                    request_serial,
                    username,
                    salt,
                    password_hash,
                    email,
                }
            }),
        Just(Packet::Disconnect),
        bad_login_reason().prop_map(|reason| Packet::BadLogin { reason }),
        Just(Packet::InvalidRequest),
    ]
}

// Property: every packet decodes back to itself and consumes exactly its bytes
proptest! {
    #[test]
    fn prop_packet_roundtrip(packet in packet(), kind in compression_kind()) {
        let bytes = packet.encode(kind).expect("encode should not fail");
        let (decoded, used) = Packet::decode(&bytes, kind).expect("decode should not fail");

        prop_assert_eq!(used, bytes.len());
        prop_assert_eq!(decoded, packet);
    }
}

// Property: a strict prefix of a packet is never mistaken for a packet
proptest! {
    #[test]
    fn prop_prefix_needs_more_data(packet in packet(), kind in compression_kind(), cut in any::<prop::sample::Index>()) {
        let bytes = packet.encode(kind).unwrap();
        let len = cut.index(bytes.len());

        let result = Packet::decode(&bytes[..len], kind);
        prop_assert!(matches!(result, Err(ProtocolError::NeedMoreData)), "prefix {} of {}: {:?}", len, bytes.len(), result);
    }
}

// Property: header types past the last known type are corrupt
proptest! {
    #[test]
    fn prop_out_of_range_type_is_corrupt(raw_type in (PacketType::MAX_VALID + 1)..=u16::MAX, flags in any::<u16>(), tail in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw_type.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&tail);

        prop_assert!(matches!(
            Packet::decode(&bytes, CompressionKind::Zlib),
            Err(ProtocolError::Corrupt(_))
        ));
    }
}

// Property: arbitrary bytes never panic the decoder, and a success never over-reads
proptest! {
    #[test]
    fn prop_random_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512), kind in compression_kind()) {
        if let Ok((_, used)) = Packet::decode(&data, kind) {
            prop_assert!(used <= data.len());
        }
    }
}

// Property: compression roundtrip preserves data for every algorithm
proptest! {
    #[test]
    fn prop_compression_roundtrip(data in prop::collection::vec(any::<u8>(), 0..50000), kind in compression_kind()) {
        let compressed = compress(&data, kind).expect("Compression should not fail");
        let decompressed = decompress(&compressed, kind).expect("Decompression should not fail");

        prop_assert_eq!(decompressed, data);
    }
}

// Property: encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic(packet in packet(), kind in compression_kind()) {
        prop_assert_eq!(packet.encode(kind).unwrap(), packet.encode(kind).unwrap());
    }
}
