//! CIDR-based IP ban list for both IPv4 and IPv6.
//!
//! Addresses of both families share one packed representation: an IPv6
//! address is split, in the order it is written, into a 64-bit, a 32-bit and
//! another 32-bit group (`low64`, `mid32`, `high32`). An IPv4 address keeps
//! `low64` and `mid32` at zero and lives entirely in `high32`, so the IPv4
//! matcher is the last step of the IPv6 one.
//!
//! Ban tables are expected to stay small; `is_banned` is a linear scan.

use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::{from_unix_secs, unix_secs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, info};

/// Maximum length of a ban comment, in characters.
pub const MAX_COMMENT_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// An address split into 64/32/32-bit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackedAddress {
    pub low64: u64,
    pub mid32: u32,
    pub high32: u32,
}

impl PackedAddress {
    pub fn from_ipv4(addr: Ipv4Addr) -> Self {
        Self {
            low64: 0,
            mid32: 0,
            high32: u32::from(addr),
        }
    }

    pub fn from_ipv6(addr: Ipv6Addr) -> Self {
        let bits = u128::from(addr);
        Self {
            low64: (bits >> 64) as u64,
            mid32: (bits >> 32) as u32,
            high32: bits as u32,
        }
    }

    pub fn to_ipv4(self) -> Ipv4Addr {
        Ipv4Addr::from(self.high32)
    }

    pub fn to_ipv6(self) -> Ipv6Addr {
        let bits = ((self.low64 as u128) << 64) | ((self.mid32 as u128) << 32) | self.high32 as u128;
        Ipv6Addr::from(bits)
    }

    /// Clears every bit below `prefix`, leaving the network address.
    pub fn network(self, family: AddressFamily, prefix: u8) -> Self {
        if prefix == 0 {
            return Self::default();
        }
        match family {
            AddressFamily::V4 => Self {
                high32: self.high32 & mask32(prefix.min(32)),
                ..Self::default()
            },
            AddressFamily::V6 => match prefix {
                1..=64 => Self {
                    low64: self.low64 & mask64(prefix),
                    ..Self::default()
                },
                65..=96 => Self {
                    low64: self.low64,
                    mid32: self.mid32 & mask32(prefix - 64),
                    high32: 0,
                },
                _ => Self {
                    high32: self.high32 & mask32(prefix.min(128) - 96),
                    ..self
                },
            },
        }
    }
}

/// Leading `bits` ones of a 32-bit group. `bits` must be 1..=32.
fn mask32(bits: u8) -> u32 {
    u32::MAX << (32 - u32::from(bits))
}

/// Leading `bits` ones of a 64-bit group. `bits` must be 1..=64.
fn mask64(bits: u8) -> u64 {
    u64::MAX << (64 - u32::from(bits))
}

/// An address range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    pub address: PackedAddress,
    pub family: AddressFamily,
    pub prefix: u8,
}

impl Cidr {
    /// An exact host range: /32 for IPv4, /128 for IPv6.
    pub fn host(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self {
                address: PackedAddress::from_ipv4(v4),
                family: AddressFamily::V4,
                prefix: 32,
            },
            IpAddr::V6(v6) => Self {
                address: PackedAddress::from_ipv6(v6),
                family: AddressFamily::V6,
                prefix: 128,
            },
        }
    }

    pub fn max_prefix(family: AddressFamily) -> u8 {
        match family {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

impl FromStr for Cidr {
    type Err = ProtocolError;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidField(format!("{}: '{text}'", constants::ERR_INVALID_CIDR));

        let mut parts = text.trim().split('/');
        let addr_text = parts.next().ok_or_else(invalid)?;
        let prefix_text = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        let (address, family) = if addr_text.contains(':') {
            let v6 = Ipv6Addr::from_str(addr_text).map_err(|_| invalid())?;
            (PackedAddress::from_ipv6(v6), AddressFamily::V6)
        } else {
            let v4 = Ipv4Addr::from_str(addr_text).map_err(|_| invalid())?;
            (PackedAddress::from_ipv4(v4), AddressFamily::V4)
        };

        let max = Cidr::max_prefix(family);
        let prefix = match prefix_text {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(ProtocolError::InvalidField(format!(
                "{}: /{prefix}",
                constants::ERR_INVALID_PREFIX
            )));
        }

        Ok(Self {
            address: address.network(family, prefix),
            family,
            prefix,
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::V4 => write!(f, "{}/{}", self.address.to_ipv4(), self.prefix),
            AddressFamily::V6 => write!(f, "{}/{}", self.address.to_ipv6(), self.prefix),
        }
    }
}

/// A single ban, permanent or with an expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BanEntry", into = "BanEntry")]
pub struct IpBanRecord {
    pub range: Cidr,
    pub created: SystemTime,
    pub permanent: bool,
    pub expires: Option<SystemTime>,
    pub comment: String,
}

impl IpBanRecord {
    pub fn permanent(range: Cidr, comment: impl Into<String>) -> Result<Self> {
        Self::build(range, true, None, comment.into())
    }

    pub fn temporary(range: Cidr, expires: SystemTime, comment: impl Into<String>) -> Result<Self> {
        Self::build(range, false, Some(expires), comment.into())
    }

    fn build(
        range: Cidr,
        permanent: bool,
        expires: Option<SystemTime>,
        comment: String,
    ) -> Result<Self> {
        if comment.chars().count() > MAX_COMMENT_CHARS {
            return Err(ProtocolError::InvalidField(
                constants::ERR_COMMENT_TOO_LONG.to_string(),
            ));
        }
        Ok(Self {
            range,
            created: SystemTime::now(),
            permanent,
            expires,
            comment,
        })
    }
}

/// On-disk form of a ban record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BanEntry {
    cidr: String,
    #[serde(default)]
    permanent: bool,
    #[serde(default)]
    created: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<u64>,
    #[serde(default)]
    comment: String,
}

impl TryFrom<BanEntry> for IpBanRecord {
    type Error = ProtocolError;

    fn try_from(entry: BanEntry) -> Result<Self> {
        let range = entry.cidr.parse::<Cidr>()?;
        let mut record = IpBanRecord::build(
            range,
            entry.permanent,
            entry.expires.map(from_unix_secs),
            entry.comment,
        )?;
        record.created = from_unix_secs(entry.created);
        Ok(record)
    }
}

impl From<IpBanRecord> for BanEntry {
    fn from(record: IpBanRecord) -> Self {
        BanEntry {
            cidr: record.range.to_string(),
            permanent: record.permanent,
            created: unix_secs(record.created),
            expires: record.expires.map(unix_secs),
            comment: record.comment,
        }
    }
}

/// True if the IPv4 address (as its 32-bit value) falls inside the record's range.
/// IPv6 records never match.
pub fn match_packed_ipv4(addr: u32, record: &IpBanRecord) -> bool {
    let range = &record.range;
    if range.family != AddressFamily::V4 {
        return false;
    }
    match range.prefix {
        0 => true,
        p => {
            let mask = mask32(p.min(32));
            addr & mask == range.address.high32 & mask
        }
    }
}

/// True if the IPv6 address falls inside the record's range.
/// IPv4 records never match.
pub fn match_packed_ipv6(addr: PackedAddress, record: &IpBanRecord) -> bool {
    let range = &record.range;
    if range.family != AddressFamily::V6 {
        return false;
    }
    let stored = range.address;
    match range.prefix {
        0 => true,
        p @ 1..=64 => addr.low64 & mask64(p) == stored.low64 & mask64(p),
        p @ 65..=96 => {
            addr.low64 == stored.low64 && addr.mid32 & mask32(p - 64) == stored.mid32 & mask32(p - 64)
        }
        p => {
            let bits = p.min(128) - 96;
            addr.low64 == stored.low64
                && addr.mid32 == stored.mid32
                && addr.high32 & mask32(bits) == stored.high32 & mask32(bits)
        }
    }
}

/// True if the record is permanent or has not yet expired at `now`.
pub fn valid_ban(record: &IpBanRecord, now: SystemTime) -> bool {
    record.permanent || record.expires.is_some_and(|expires| now < expires)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BanFile {
    #[serde(default)]
    bans: Vec<IpBanRecord>,
}

/// The set of active bans, consulted at accept time.
#[derive(Debug, Default)]
pub struct BanStore {
    records: Vec<IpBanRecord>,
}

impl BanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<IpBanRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[IpBanRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a ban, replacing any existing ban on exactly the same range.
    pub fn add(&mut self, record: IpBanRecord) {
        info!(range = %record.range, permanent = record.permanent, comment = %record.comment, "IP ban added");
        match self.records.iter_mut().find(|r| r.range == record.range) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Removes the ban on exactly `cidr`. Returns whether one existed.
    pub fn remove(&mut self, cidr: &str) -> Result<bool> {
        let range = cidr.parse::<Cidr>()?;
        let before = self.records.len();
        self.records.retain(|r| r.range != range);
        let removed = self.records.len() != before;
        if removed {
            info!(range = %range, "IP ban removed");
        }
        Ok(removed)
    }

    pub fn get(&self, cidr: &str) -> Result<Option<&IpBanRecord>> {
        let range = cidr.parse::<Cidr>()?;
        Ok(self.records.iter().find(|r| r.range == range))
    }

    /// Drops bans that have expired at `now`. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: SystemTime) -> usize {
        let before = self.records.len();
        self.records.retain(|r| valid_ban(r, now));
        let purged = before - self.records.len();
        if purged > 0 {
            debug!(purged, "Purged expired IP bans");
        }
        purged
    }

    /// Checks an address given as text. IPv6 is chosen by the presence of a colon.
    pub fn is_banned(&self, address: &str, now: SystemTime) -> Result<bool> {
        let invalid =
            || ProtocolError::InvalidField(format!("{}: '{address}'", constants::ERR_INVALID_CIDR));
        let ip = if address.contains(':') {
            IpAddr::V6(Ipv6Addr::from_str(address).map_err(|_| invalid())?)
        } else {
            IpAddr::V4(Ipv4Addr::from_str(address).map_err(|_| invalid())?)
        };
        Ok(self.is_banned_ip(ip, now))
    }

    /// Checks a peer address. IPv4-mapped IPv6 peers are checked as IPv4.
    pub fn is_banned_ip(&self, ip: IpAddr, now: SystemTime) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(v4) => {
                let packed = u32::from(v4);
                self.records
                    .iter()
                    .any(|r| match_packed_ipv4(packed, r) && valid_ban(r, now))
            }
            IpAddr::V6(v6) => {
                let packed = PackedAddress::from_ipv6(v6);
                self.records
                    .iter()
                    .any(|r| match_packed_ipv6(packed, r) && valid_ban(r, now))
            }
        }
    }

    /// Loads a ban list from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::BanStore(format!("Failed to read {}: {e}", path.display()))
        })?;
        let file: BanFile = toml::from_str(&text).map_err(|e| {
            ProtocolError::BanStore(format!("Failed to parse {}: {e}", path.display()))
        })?;
        info!(count = file.bans.len(), path = %path.display(), "Loaded IP bans");
        Ok(Self::from_records(file.bans))
    }

    /// Writes the ban list to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = BanFile {
            bans: self.records.clone(),
        };
        let text = toml::to_string_pretty(&file)
            .map_err(|e| ProtocolError::BanStore(format!("Failed to serialize bans: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            ProtocolError::BanStore(format!("Failed to write {}: {e}", path.display()))
        })
    }
}
