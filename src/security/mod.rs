//! # Security
//!
//! Address-based access control consulted when a connection is accepted.

pub mod ip_ban;

pub use ip_ban::{BanStore, Cidr, IpBanRecord, PackedAddress};
