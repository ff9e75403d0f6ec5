//! Metrics collection for node monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock manager metrics.
pub struct Metrics {
    /// Acquires granted (any mode).
    pub acquires_granted: AtomicU64,
    /// Acquires denied (contention, refusal or unreachable targets).
    pub acquires_denied: AtomicU64,
    /// Releases that succeeded.
    pub releases_granted: AtomicU64,
    /// Releases that failed.
    pub releases_denied: AtomicU64,
    /// Fan-out calls issued (quorum and all modes).
    pub fan_outs: AtomicU64,
    /// Compensating rollback releases dispatched.
    pub rollbacks_dispatched: AtomicU64,
    /// Locks reclaimed from terminated owners.
    pub locks_reclaimed: AtomicU64,
    /// Owners currently under liveness watch.
    pub owners_watched: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            acquires_granted: AtomicU64::new(0),
            acquires_denied: AtomicU64::new(0),
            releases_granted: AtomicU64::new(0),
            releases_denied: AtomicU64::new(0),
            fan_outs: AtomicU64::new(0),
            rollbacks_dispatched: AtomicU64::new(0),
            locks_reclaimed: AtomicU64::new(0),
            owners_watched: AtomicU64::new(0),
        }
    }

    /// Record an acquire outcome.
    pub fn acquire_finished(&self, granted: bool) {
        if granted {
            self.acquires_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.acquires_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a release outcome.
    pub fn release_finished(&self, released: bool) {
        if released {
            self.releases_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.releases_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a fan-out call.
    pub fn fan_out(&self) {
        self.fan_outs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched compensating rollback.
    pub fn rollback_dispatched(&self) {
        self.rollbacks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock reclaimed from a terminated owner.
    pub fn lock_reclaimed(&self) {
        self.locks_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the number of owners currently under watch.
    pub fn set_owners_watched(&self, count: u64) {
        self.owners_watched.store(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquires_granted: self.acquires_granted.load(Ordering::Relaxed),
            acquires_denied: self.acquires_denied.load(Ordering::Relaxed),
            releases_granted: self.releases_granted.load(Ordering::Relaxed),
            releases_denied: self.releases_denied.load(Ordering::Relaxed),
            fan_outs: self.fan_outs.load(Ordering::Relaxed),
            rollbacks_dispatched: self.rollbacks_dispatched.load(Ordering::Relaxed),
            locks_reclaimed: self.locks_reclaimed.load(Ordering::Relaxed),
            owners_watched: self.owners_watched.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub acquires_granted: u64,
    pub acquires_denied: u64,
    pub releases_granted: u64,
    pub releases_denied: u64,
    pub fan_outs: u64,
    pub rollbacks_dispatched: u64,
    pub locks_reclaimed: u64,
    pub owners_watched: u64,
}
