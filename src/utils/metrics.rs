//! Observability and Metrics
//!
//! Counters for connection admission, traffic, and login outcomes.
//!
//! Uses atomic counters so the listener tasks and the hub can share one
//! `Arc<Metrics>` without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for the session server
#[derive(Debug)]
pub struct Metrics {
    /// Connections admitted
    pub connections_accepted: AtomicU64,
    /// Connections turned away by admission limits
    pub connections_rejected: AtomicU64,
    /// Connections dropped because the peer address is banned
    pub connections_banned: AtomicU64,
    /// Currently live connections
    pub connections_active: AtomicU64,
    /// Packets decoded from peers
    pub packets_received: AtomicU64,
    /// Packets queued to peers
    pub packets_sent: AtomicU64,
    /// Raw bytes received
    pub bytes_received: AtomicU64,
    /// Raw bytes handed to the transport
    pub bytes_sent: AtomicU64,
    /// Connections closed for undecodable input
    pub corrupt_packets: AtomicU64,
    /// Completed logins
    pub logins_succeeded: AtomicU64,
    /// Refused login attempts of any kind
    pub logins_failed: AtomicU64,
    /// Accounts created
    pub registrations: AtomicU64,
    /// Connections closed for inactivity
    pub timeouts: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_banned: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            corrupt_packets: AtomicU64::new(0),
            logins_succeeded: AtomicU64::new(0),
            logins_failed: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_banned(&self) {
        self.connections_banned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_out(&self, count: u64) {
        self.packets_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_in(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn bytes_out(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn corrupt_packet(&self) {
        self.corrupt_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login_succeeded(&self) {
        self.logins_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn login_failed(&self) {
        self.logins_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_banned: self.connections_banned.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            corrupt_packets: self.corrupt_packets.load(Ordering::Relaxed),
            logins_succeeded: self.logins_succeeded.load(Ordering::Relaxed),
            logins_failed: self.logins_failed.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            connections_accepted = s.connections_accepted,
            connections_rejected = s.connections_rejected,
            connections_banned = s.connections_banned,
            connections_active = s.connections_active,
            packets_received = s.packets_received,
            packets_sent = s.packets_sent,
            bytes_received = s.bytes_received,
            bytes_sent = s.bytes_sent,
            corrupt_packets = s.corrupt_packets,
            logins_succeeded = s.logins_succeeded,
            logins_failed = s.logins_failed,
            registrations = s.registrations,
            timeouts = s.timeouts,
            uptime_seconds = s.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_banned: u64,
    pub connections_active: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub corrupt_packets: u64,
    pub logins_succeeded: u64,
    pub logins_failed: u64,
    pub registrations: u64,
    pub timeouts: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_tracks_accept_and_close() {
        let metrics = Metrics::new();
        metrics.connection_accepted();
        metrics.connection_accepted();
        metrics.connection_closed();
        let s = metrics.snapshot();
        assert_eq!(s.connections_accepted, 2);
        assert_eq!(s.connections_active, 1);
    }

    #[test]
    fn test_traffic_counters() {
        let metrics = Metrics::default();
        metrics.bytes_in(10);
        metrics.bytes_in(5);
        metrics.packet_received();
        metrics.bytes_out(4);
        let s = metrics.snapshot();
        assert_eq!(s.bytes_received, 15);
        assert_eq!(s.packets_received, 1);
        assert_eq!(s.bytes_sent, 4);
    }
}
