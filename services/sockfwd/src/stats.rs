//! Process-wide forwarding counters.
//!
//! All updates are single atomic operations. Readers may observe `total`
//! and `current` from slightly different instants; nothing relies on the
//! two being consistent with each other.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Direction of a copy task, relative to the accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted connection to dialed connection.
    Upstream,
    /// Dialed connection back to the accepted connection.
    Downstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

/// Shared connection counters.
#[derive(Debug)]
pub struct Stats {
    /// Connections whose destination dial succeeded.
    total: AtomicU64,
    /// Connections still forwarding.
    current: AtomicI64,
    /// Bytes copied from accepted to dialed connections.
    bytes_upstream: AtomicU64,
    /// Bytes copied from dialed to accepted connections.
    bytes_downstream: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Point-in-time view of [`Stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub current: i64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            current: AtomicI64::new(0),
            bytes_upstream: AtomicU64::new(0),
            bytes_downstream: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Record a successfully dialed connection.
    ///
    /// Returns the new `(total, current)` values.
    pub fn record_connection_start(&self) -> (u64, i64) {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        (total, current)
    }

    /// Record a connection whose forwarding has fully terminated.
    pub fn record_connection_end(&self) {
        // Never drop below zero, even on an unmatched end.
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current > 0).then_some(current - 1)
            });
    }

    /// Add copied bytes to the counter for `direction`.
    pub fn record_bytes(&self, direction: Direction, bytes: u64) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_upstream,
            Direction::Downstream => &self.bytes_downstream,
        };
        counter.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            current: self.current(),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime: self.started.elapsed(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
