//! Server metrics collection.
//!
//! Aggregate counters only; no addresses or payload data are kept. Parse
//! failures and credential failures share the fallback counter so the numbers
//! cannot tell them apart either.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server metrics collector.
#[derive(Debug)]
pub struct ServerMetrics {
    /// Server start time
    start_time: Instant,
    /// Total connections accepted
    total_connections: AtomicU64,
    /// Connections currently being handled
    active_connections: AtomicU64,
    /// Connections that reached the bridging state
    tunneled_connections: AtomicU64,
    /// Connections relayed to the decoy
    fallback_connections: AtomicU64,
    /// Connections dropped before routing (initial read timeout or error)
    initial_read_failures: AtomicU64,
    /// Authenticated connections that failed after the reply was sent
    handshake_failures: AtomicU64,
    /// Plaintext bytes delivered to the backend
    bytes_to_backend: AtomicU64,
    /// Plaintext bytes received from the backend
    bytes_from_backend: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            tunneled_connections: AtomicU64::new(0),
            fallback_connections: AtomicU64::new(0),
            initial_read_failures: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            bytes_to_backend: AtomicU64::new(0),
            bytes_from_backend: AtomicU64::new(0),
        }
    }

    /// Increment total and active connections.
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connections.
    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a connection that entered the tunnel.
    pub fn increment_tunneled(&self) {
        self.tunneled_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection relayed to the decoy.
    pub fn increment_fallback(&self) {
        self.fallback_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a connection that sent nothing usable in time.
    pub fn increment_initial_read_failures(&self) {
        self.initial_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an authenticated connection lost during the handshake tail.
    pub fn increment_handshake_failures(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record byte counts of a finished bridge.
    pub fn add_bridge_bytes(&self, to_backend: u64, from_backend: u64) {
        self.bytes_to_backend.fetch_add(to_backend, Ordering::Relaxed);
        self.bytes_from_backend.fetch_add(from_backend, Ordering::Relaxed);
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get total connections.
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get active connections.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get tunneled connections.
    pub fn tunneled_connections(&self) -> u64 {
        self.tunneled_connections.load(Ordering::Relaxed)
    }

    /// Get fallback connections.
    pub fn fallback_connections(&self) -> u64 {
        self.fallback_connections.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_connections: self.total_connections(),
            active_connections: self.active_connections(),
            tunneled_connections: self.tunneled_connections(),
            fallback_connections: self.fallback_connections(),
            initial_read_failures: self.initial_read_failures.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            bytes_to_backend: self.bytes_to_backend.load(Ordering::Relaxed),
            bytes_from_backend: self.bytes_from_backend.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub tunneled_connections: u64,
    pub fallback_connections: u64,
    pub initial_read_failures: u64,
    pub handshake_failures: u64,
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

impl MetricsSnapshot {
    /// Share of connections that were tunneled.
    pub fn tunnel_rate(&self) -> f64 {
        if self.total_connections == 0 {
            0.0
        } else {
            self.tunneled_connections as f64 / self.total_connections as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={}s total={} active={} tunneled={} ({:.1}%) fallback={} dropped={} \
             handshake_failures={} to_backend={}B from_backend={}B",
            self.uptime_secs,
            self.total_connections,
            self.active_connections,
            self.tunneled_connections,
            self.tunnel_rate() * 100.0,
            self.fallback_connections,
            self.initial_read_failures,
            self.handshake_failures,
            self.bytes_to_backend,
            self.bytes_from_backend,
        )
    }
}
