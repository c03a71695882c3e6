//! Typed packets and their binary layout.
//!
//! ```text
//! [Type(u16 LE)] [Flags(u16 LE)] [Body]
//! ```
//!
//! The body layout is fixed per packet type, so framing is self-delimiting: no
//! stream-level length prefix is needed. When flag bit 0 is set the body is
//! replaced by a uint32-length-prefixed compressed block.

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::{self, CompressionKind, MAX_COMPRESSED_SIZE};

/// Size of the fixed packet header.
pub const HEADER_LEN: usize = 4;

/// Header flag set when the body is a compressed block.
pub const FLAG_COMPRESSED: u16 = 0x0001;

/// ConnectionAccepted flag bit: in-client registration is disabled.
pub const ACCEPTED_FLAG_NO_REGISTER: u8 = 0x01;

pub const MAX_SERVER_NAME_CHARS: usize = 64;
pub const MAX_NEWS_URL_CHARS: usize = 256;
pub const MAX_USERNAME_CHARS: usize = 32;
pub const MAX_EMAIL_CHARS: usize = 64;
pub const SALT_LEN: usize = 16;
pub const PASSWORD_HASH_LEN: usize = 64;
pub const CHALLENGE_LEN: usize = 32;
pub const SOLUTION_LEN: usize = 32;

/// Register fields are only loosely bounded by the codec; the login handler
/// validates them so that a bad registration is answered instead of dropped.
pub const REGISTER_MAX_TEXT_CHARS: usize = 255;
pub const REGISTER_MAX_BLOCK_LEN: usize = 256;

/// Reason codes carried by `Success` / `Failed` replies.
pub mod reason {
    pub const GENERAL: u16 = 0;
    pub const INVALID_FIELD: u16 = 1;
    pub const USERNAME_TAKEN: u16 = 2;
    pub const ALREADY_LOGGED_IN: u16 = 3;
    pub const REGISTRATION_DISABLED: u16 = 4;
}

macro_rules! packet_types {
    ($($name:ident = $value:expr),+ $(,)?) => {
        /// Every packet type defined by the protocol, in wire order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum PacketType {
            $($name = $value),+
        }

        impl PacketType {
            /// All types indexed by their wire value.
            pub const ALL: &'static [PacketType] = &[$(PacketType::$name),+];
        }
    };
}

packet_types! {
    NegotiateConnection = 0,
    ConnectionAccepted = 1,
    ConnectionRejected = 2,
    KeepAlive = 3,
    Success = 4,
    Failed = 5,
    StartLogin = 6,
    LoginChallenge = 7,
    FinishLogin = 8,
    Register = 9,
    AvailableCharacter = 10,
    StartCreateCharacter = 11,
    NewCharacterOptions = 12,
    FinishCreateCharacter = 13,
    SelectCharacter = 14,
    SendMessage = 15,
    ShowMessage = 16,
    AddObject = 17,
    DeleteObject = 18,
    UpdateObject = 19,
    GetMapCrc = 20,
    MapCrc = 21,
    GetMap = 22,
    MapReply = 23,
    InteractObject = 24,
    UpdateStats = 25,
    UpdateInventory = 26,
    Disconnect = 27,
    StartMovement = 28,
    EndMovement = 29,
    MovementValid = 30,
    MovementInvalid = 31,
    ServerInformation = 32,
    BadLogin = 33,
    DeleteCharacter = 34,
    StartCharacterList = 35,
    InvalidRequest = 36,
}

impl PacketType {
    /// Highest type value accepted in a header.
    pub const MAX_VALID: u16 = PacketType::InvalidRequest as u16;

    /// Number of defined packet types.
    pub const COUNT: usize = Self::MAX_VALID as usize + 1;

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Position in a per-type handler table.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectionCode {
    Other = 0,
    Outdated = 1,
    Revision = 2,
    Signature = 3,
    Banned = 4,
    SecurityUpdate = 5,
    NoSlots = 6,
}

impl RejectionCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => RejectionCode::Other,
            1 => RejectionCode::Outdated,
            2 => RejectionCode::Revision,
            3 => RejectionCode::Signature,
            4 => RejectionCode::Banned,
            5 => RejectionCode::SecurityUpdate,
            6 => RejectionCode::NoSlots,
            _ => return None,
        })
    }
}

/// Why a login attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BadLoginReason {
    General = 0,
    LockedOut = 1,
    BadUsername = 2,
    WaitForLogin = 3,
}

impl BadLoginReason {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => BadLoginReason::General,
            1 => BadLoginReason::LockedOut,
            2 => BadLoginReason::BadUsername,
            3 => BadLoginReason::WaitForLogin,
            _ => return None,
        })
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    NegotiateConnection {
        signature: [u8; 2],
        revision: u16,
        major: u16,
        minor: u16,
    },
    ConnectionAccepted {
        registration_disabled: bool,
        server_name: String,
        news_url: String,
    },
    ConnectionRejected {
        reason: RejectionCode,
    },
    KeepAlive,
    Success {
        request_serial: u32,
        reason_code: u16,
    },
    Failed {
        request_serial: u32,
        reason_code: u16,
    },
    StartLogin {
        username: String,
    },
    LoginChallenge {
        salt: [u8; SALT_LEN],
        challenge: [u8; CHALLENGE_LEN],
    },
    FinishLogin {
        request_serial: u32,
        solution: [u8; SOLUTION_LEN],
    },
    Register {
        request_serial: u32,
        username: String,
        salt: Vec<u8>,
        password_hash: Vec<u8>,
        email: String,
    },
    Disconnect,
    BadLogin {
        reason: BadLoginReason,
    },
    InvalidRequest,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::NegotiateConnection { .. } => PacketType::NegotiateConnection,
            Packet::ConnectionAccepted { .. } => PacketType::ConnectionAccepted,
            Packet::ConnectionRejected { .. } => PacketType::ConnectionRejected,
            Packet::KeepAlive => PacketType::KeepAlive,
            Packet::Success { .. } => PacketType::Success,
            Packet::Failed { .. } => PacketType::Failed,
            Packet::StartLogin { .. } => PacketType::StartLogin,
            Packet::LoginChallenge { .. } => PacketType::LoginChallenge,
            Packet::FinishLogin { .. } => PacketType::FinishLogin,
            Packet::Register { .. } => PacketType::Register,
            Packet::Disconnect => PacketType::Disconnect,
            Packet::BadLogin { .. } => PacketType::BadLogin,
            Packet::InvalidRequest => PacketType::InvalidRequest,
        }
    }

    /// Serializes the type-specific body (without header).
    fn write_body(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut w = WireWriter::new(out);
        match self {
            Packet::NegotiateConnection {
                signature,
                revision,
                major,
                minor,
            } => {
                w.put_raw(signature);
                w.put_u16(*revision);
                w.put_u16(*major);
                w.put_u16(*minor);
            }
            Packet::ConnectionAccepted {
                registration_disabled,
                server_name,
                news_url,
            } => {
                let flags = if *registration_disabled {
                    ACCEPTED_FLAG_NO_REGISTER
                } else {
                    0
                };
                w.put_u8(flags);
                w.put_utf8(server_name, MAX_SERVER_NAME_CHARS)?;
                w.put_utf8(news_url, MAX_NEWS_URL_CHARS)?;
            }
            Packet::ConnectionRejected { reason } => w.put_u8(*reason as u8),
            Packet::Success {
                request_serial,
                reason_code,
            }
            | Packet::Failed {
                request_serial,
                reason_code,
            } => {
                w.put_u32(*request_serial);
                w.put_u16(*reason_code);
            }
            Packet::StartLogin { username } => w.put_utf8(username, MAX_USERNAME_CHARS)?,
            Packet::LoginChallenge { salt, challenge } => {
                w.put_block(salt, SALT_LEN)?;
                w.put_block(challenge, CHALLENGE_LEN)?;
            }
            Packet::FinishLogin {
                request_serial,
                solution,
            } => {
                w.put_u32(*request_serial);
                w.put_block(solution, SOLUTION_LEN)?;
            }
            Packet::Register {
                request_serial,
                username,
                salt,
                password_hash,
                email,
            } => {
                w.put_u32(*request_serial);
                w.put_utf8(username, REGISTER_MAX_TEXT_CHARS)?;
                w.put_block(salt, REGISTER_MAX_BLOCK_LEN)?;
                w.put_block(password_hash, REGISTER_MAX_BLOCK_LEN)?;
                w.put_utf8(email, REGISTER_MAX_TEXT_CHARS)?;
            }
            Packet::BadLogin { reason } => w.put_u16(*reason as u16),
            Packet::KeepAlive | Packet::Disconnect | Packet::InvalidRequest => {}
        }
        Ok(())
    }

    /// Decodes the body for a header that has already been validated.
    fn read_body(packet_type: PacketType, r: &mut WireReader<'_>) -> Result<Packet> {
        Ok(match packet_type {
            PacketType::NegotiateConnection => Packet::NegotiateConnection {
                signature: r.read_array()?,
                revision: r.read_u16()?,
                major: r.read_u16()?,
                minor: r.read_u16()?,
            },
            PacketType::ConnectionAccepted => {
                let flags = r.read_u8()?;
                Packet::ConnectionAccepted {
                    registration_disabled: flags & ACCEPTED_FLAG_NO_REGISTER != 0,
                    server_name: r.read_utf8(MAX_SERVER_NAME_CHARS)?,
                    news_url: r.read_utf8(MAX_NEWS_URL_CHARS)?,
                }
            }
            PacketType::ConnectionRejected => Packet::ConnectionRejected {
                reason: RejectionCode::from_u8(r.read_u8()?)
                    .ok_or_else(|| ProtocolError::corrupt(constants::ERR_INVALID_REASON_CODE))?,
            },
            PacketType::KeepAlive => Packet::KeepAlive,
            PacketType::Success => Packet::Success {
                request_serial: r.read_u32()?,
                reason_code: r.read_u16()?,
            },
            PacketType::Failed => Packet::Failed {
                request_serial: r.read_u32()?,
                reason_code: r.read_u16()?,
            },
            PacketType::StartLogin => Packet::StartLogin {
                username: r.read_utf8(MAX_USERNAME_CHARS)?,
            },
            PacketType::LoginChallenge => Packet::LoginChallenge {
                salt: r.read_fixed_block()?,
                challenge: r.read_fixed_block()?,
            },
            PacketType::FinishLogin => Packet::FinishLogin {
                request_serial: r.read_u32()?,
                solution: r.read_fixed_block()?,
            },
            PacketType::Register => Packet::Register {
                request_serial: r.read_u32()?,
                username: r.read_utf8(REGISTER_MAX_TEXT_CHARS)?,
                salt: r.read_block(REGISTER_MAX_BLOCK_LEN)?.to_vec(),
                password_hash: r.read_block(REGISTER_MAX_BLOCK_LEN)?.to_vec(),
                email: r.read_utf8(REGISTER_MAX_TEXT_CHARS)?,
            },
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::BadLogin => Packet::BadLogin {
                reason: BadLoginReason::from_u16(r.read_u16()?)
                    .ok_or_else(|| ProtocolError::corrupt(constants::ERR_INVALID_REASON_CODE))?,
            },
            PacketType::InvalidRequest => Packet::InvalidRequest,
            // game-world packets are handled outside this core
            _ => return Err(ProtocolError::corrupt(constants::ERR_UNSUPPORTED_PACKET_TYPE)),
        })
    }

    /// Encodes the packet for transmission.
    ///
    /// A non-empty body is compressed when that makes it strictly smaller and
    /// the block fits in `MAX_COMPRESSED_SIZE`; otherwise it is sent raw.
    pub fn encode(&self, kind: CompressionKind) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.write_body(&mut body)?;

        let mut flags = 0u16;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len() + 4);
        let compressed = compression::compress_if_smaller(&body, kind)?;
        if compressed.is_some() {
            flags |= FLAG_COMPRESSED;
        }

        let mut w = WireWriter::new(&mut out);
        w.put_u16(self.packet_type().as_u16());
        w.put_u16(flags);
        match compressed {
            Some(block) => w.put_block(&block, MAX_COMPRESSED_SIZE)?,
            None => w.put_raw(&body),
        }
        Ok(out)
    }

    /// Decodes one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes it occupied; bytes after
    /// that belong to the next packet.
    ///
    /// # Errors
    /// - `NeedMoreData` if `buf` holds only a prefix of a packet.
    /// - `Corrupt` if the header type is out of range, the compressed block is
    ///   oversized or fails to inflate, or the body is structurally invalid.
    pub fn decode(buf: &[u8], kind: CompressionKind) -> Result<(Packet, usize)> {
        let mut r = WireReader::new(buf);
        let raw_type = r.read_u16()?;
        let flags = r.read_u16()?;

        let packet_type = PacketType::from_u16(raw_type)
            .ok_or_else(|| ProtocolError::corrupt(constants::ERR_INVALID_PACKET_TYPE))?;

        let packet = if flags & FLAG_COMPRESSED != 0 {
            let block = r.read_block(MAX_COMPRESSED_SIZE).map_err(|e| match e {
                ProtocolError::Corrupt(_) => {
                    ProtocolError::corrupt(constants::ERR_COMPRESSED_BLOCK_TOO_LARGE)
                }
                other => other,
            })?;
            let inflated = compression::decompress(block, kind)
                .map_err(|_| ProtocolError::corrupt(constants::ERR_DECOMPRESSION_FAILED))?;

            let mut inner = WireReader::new(&inflated);
            let packet = Self::read_body(packet_type, &mut inner).map_err(|e| match e {
                // the whole block is here, so a short body can never complete
                ProtocolError::NeedMoreData => {
                    ProtocolError::corrupt(constants::ERR_TRUNCATED_COMPRESSED_BODY)
                }
                other => other,
            })?;
            if inner.remaining() != 0 {
                return Err(ProtocolError::corrupt(
                    constants::ERR_TRAILING_COMPRESSED_BYTES,
                ));
            }
            packet
        } else {
            Self::read_body(packet_type, &mut r)?
        };

        Ok((packet, r.position()))
    }
}
