//! Connector metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a connector's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorMetrics {
    /// Successful connects of the connector and its connectables.
    pub connects: u64,

    /// Failed connect attempts.
    pub failed_connects: u64,

    /// Reconnects started after a connect-class fault.
    pub reconnects: u64,

    /// One-way dispatches.
    pub dispatches: u64,

    /// Sends expecting a response.
    pub sends: u64,

    /// Requests made through requesters.
    pub requests: u64,

    /// Messages handed to message listeners.
    pub messages_received: u64,

    /// Successful pool borrows.
    pub pool_borrows: u64,

    /// Borrows that failed because a key was exhausted.
    pub pool_exhaustions: u64,
}

/// A lock-free, atomic structure for metrics updates.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Successful connects (atomic counter).
    pub connects: AtomicU64,

    /// Failed connect attempts (atomic counter).
    pub failed_connects: AtomicU64,

    /// Reconnects (atomic counter).
    pub reconnects: AtomicU64,

    /// Dispatches (atomic counter).
    pub dispatches: AtomicU64,

    /// Sends (atomic counter).
    pub sends: AtomicU64,

    /// Requests (atomic counter).
    pub requests: AtomicU64,

    /// Messages received (atomic counter).
    pub messages_received: AtomicU64,

    /// Pool borrows (atomic counter).
    pub pool_borrows: AtomicU64,

    /// Pool exhaustions (atomic counter).
    pub pool_exhaustions: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a new `AtomicMetrics` instance with all counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Creates a serializable `ConnectorMetrics` snapshot from the current atomic values.
    pub fn snapshot(&self) -> ConnectorMetrics {
        ConnectorMetrics {
            connects: self.connects.load(Ordering::Relaxed),
            failed_connects: self.failed_connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            pool_borrows: self.pool_borrows.load(Ordering::Relaxed),
            pool_exhaustions: self.pool_exhaustions.load(Ordering::Relaxed),
        }
    }

    /// Resets all atomic metric counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.connects,
            &self.failed_connects,
            &self.reconnects,
            &self.dispatches,
            &self.sends,
            &self.requests,
            &self.messages_received,
            &self.pool_borrows,
            &self.pool_exhaustions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
