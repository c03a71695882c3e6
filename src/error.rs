//! # Error Types
//!
//! Error handling for the wire protocol and session layer.
//!
//! The variants follow the way the server reacts to them rather than where they
//! come from:
//!
//! - **NeedMoreData**: not a failure. The decoder ran out of buffered bytes; keep
//!   the buffer and retry once more data arrives.
//! - **Corrupt**: protocol violation. Log it and close the connection without a reply.
//! - **LimitExceeded**: admission rejected. Close immediately, no reply.
//! - **NameAlreadyInUse**: business-rule conflict. Reply with a failure and keep
//!   the connection open.
//! - **UnregisteredConnection**: programmer error in the caller. Logged, never fatal.
//! - **InvalidField / UsernameTaken**: registration refused. Reply with the
//!   specific reason, storage is left untouched.
//!
//! ## Example Usage
//! ```rust
//! use session_protocol::error::{ProtocolError, Result};
//!
//! fn parse_port(text: &str) -> Result<u16> {
//!     text.parse::<u16>()
//!         .map_err(|e| ProtocolError::ConfigError(format!("bad port '{text}': {e}")))
//! }
//!
//! assert!(parse_port("24020").is_ok());
//! assert!(parse_port("http").is_err());
//! ```

use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_INVALID_PACKET_TYPE: &str = "Invalid packet type in header";
    pub const ERR_UNSUPPORTED_PACKET_TYPE: &str = "Packet type has no body layout in this protocol core";
    pub const ERR_COMPRESSED_BLOCK_TOO_LARGE: &str = "Compressed block exceeds maximum size";
    pub const ERR_TRUNCATED_COMPRESSED_BODY: &str = "Compressed body ends before packet body is complete";
    pub const ERR_TRAILING_COMPRESSED_BYTES: &str = "Trailing bytes after packet body in compressed block";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_STRING_TOO_LONG: &str = "String field exceeds maximum length";
    pub const ERR_BLOCK_TOO_LONG: &str = "Binary block exceeds maximum length";
    pub const ERR_BLOCK_WRONG_LENGTH: &str = "Binary block has the wrong length";
    pub const ERR_INVALID_REASON_CODE: &str = "Unknown reason code";
    pub const ERR_HANDLER_MISMATCH: &str = "Packet routed to a handler for another type";

    /// Compression errors
    pub const ERR_DECOMPRESSION_FAILED: &str = "Decompression failed";

    /// Registration errors
    pub const ERR_USERNAME_LENGTH: &str = "Username must be 1 to 32 characters";
    pub const ERR_HASH_LENGTH: &str = "Password hash must be exactly 64 bytes";
    pub const ERR_SALT_LENGTH: &str = "Password salt must be exactly 16 bytes";
    pub const ERR_EMAIL_LENGTH: &str = "Email must be 1 to 64 characters";
    pub const ERR_EMAIL_SYNTAX: &str = "Email must contain '@'";
    pub const ERR_CREATOR_IP_LENGTH: &str = "Creator address must be 1 to 45 characters";

    /// Ban store errors
    pub const ERR_INVALID_CIDR: &str = "Invalid CIDR address";
    pub const ERR_INVALID_PREFIX: &str = "CIDR prefix length out of range";
    pub const ERR_COMMENT_TOO_LONG: &str = "Ban comment exceeds 64 characters";

    /// Security errors
    pub const ERR_RANDOM_SOURCE: &str = "Operating system random source failed";
}

/// Which admission limit turned a connection away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// The server-wide connection cap.
    Total { max: usize },
    /// The cap on simultaneous connections from one address.
    PerAddress { address: IpAddr, max: usize },
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Total { max } => write!(f, "total connection limit of {max} reached"),
            LimitKind::PerAddress { address, max } => {
                write!(f, "limit of {max} connections from {address} reached")
            }
        }
    }
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Incomplete packet, more data required")]
    NeedMoreData,

    #[error("Corrupt packet: {0}")]
    Corrupt(String),

    #[error("Connection rejected: {0}")]
    LimitExceeded(LimitKind),

    #[error("Name already in use: {0}")]
    NameAlreadyInUse(String),

    #[error("Connection is not registered with the connection manager")]
    UnregisteredConnection,

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Random source failure: {0}")]
    Random(String),

    #[error("Ban store error: {0}")]
    BanStore(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Shorthand for a [`ProtocolError::Corrupt`] built from a static message.
    pub fn corrupt(msg: &str) -> Self {
        ProtocolError::Corrupt(msg.to_string())
    }

    /// Whether the connection that produced this error has to be closed.
    ///
    /// Business-rule failures are answered on the wire and leave the
    /// connection usable; everything that means the byte stream or the socket
    /// can no longer be trusted is fatal.
    pub fn is_fatal_to_connection(&self) -> bool {
        match self {
            ProtocolError::NeedMoreData
            | ProtocolError::NameAlreadyInUse(_)
            | ProtocolError::UnregisteredConnection
            | ProtocolError::InvalidField(_)
            | ProtocolError::UsernameTaken(_) => false,
            ProtocolError::Io(_)
            | ProtocolError::Corrupt(_)
            | ProtocolError::LimitExceeded(_)
            | ProtocolError::CompressionFailure
            | ProtocolError::DecompressionFailure
            | ProtocolError::Random(_)
            | ProtocolError::BanStore(_)
            | ProtocolError::ConfigError(_) => true,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_errors_keep_connection_open() {
        assert!(!ProtocolError::NameAlreadyInUse("alice".into()).is_fatal_to_connection());
        assert!(!ProtocolError::UsernameTaken("alice".into()).is_fatal_to_connection());
        assert!(!ProtocolError::InvalidField("email".into()).is_fatal_to_connection());
        assert!(!ProtocolError::UnregisteredConnection.is_fatal_to_connection());
    }

    #[test]
    fn test_protocol_violations_close_connection() {
        assert!(ProtocolError::corrupt("bad").is_fatal_to_connection());
        assert!(ProtocolError::DecompressionFailure.is_fatal_to_connection());
        assert!(ProtocolError::CompressionFailure.is_fatal_to_connection());
        assert!(ProtocolError::Random("entropy".into()).is_fatal_to_connection());
        assert!(
            ProtocolError::LimitExceeded(LimitKind::Total { max: 1 }).is_fatal_to_connection()
        );
    }

    #[test]
    fn test_limit_display_names_address() {
        let err = ProtocolError::LimitExceeded(LimitKind::PerAddress {
            address: "10.0.0.1".parse().unwrap(),
            max: 2,
        });
        assert!(err.to_string().contains("10.0.0.1"));
    }
}
