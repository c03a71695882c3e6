//! # Core Protocol Components
//!
//! Low-level packet handling: field encoding, typed packets and framing.
//!
//! ## Components
//! - **Wire**: little-endian readers/writers for body fields
//! - **Packet**: the closed set of packet types and their body layouts
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Type(2)] [Flags(2)] [Body(N) | BlockLen(4) CompressedBody(M)]
//! ```
//!
//! ## Security
//! - Header types above `PacketType::MAX_VALID` are rejected outright
//! - Compressed blocks are capped at 64 KiB, their output at 1 MiB
//! - String and block lengths are validated before any data is buffered

pub mod codec;
pub mod packet;
pub mod wire;
