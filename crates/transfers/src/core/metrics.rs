//! Counters for transfers handled by a coordinator
//!
//! Atomic counters updated from whichever thread handles an event, with a
//! plain snapshot type for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransferMetrics {
    pub transfers_created: AtomicU64,
    pub transfers_succeeded: AtomicU64,
    pub transfers_failed: AtomicU64,
    pub transfers_cancelled: AtomicU64,
    pub bytes_placed: AtomicU64,
    pub redirects_refused: AtomicU64,
    pub orphaned_files: AtomicU64,
}

impl TransferMetrics {
    /// A transfer was handed out by the coordinator
    pub fn record_created(&self) {
        self.transfers_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A transfer was placed at its destination
    pub fn record_succeeded(&self, size: u64) {
        self.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_placed.fetch_add(size, Ordering::Relaxed);
    }

    /// A transfer ended with an error other than cancellation
    pub fn record_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A transfer ended because it was cancelled
    pub fn record_cancelled(&self) {
        self.transfers_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// A redirect was refused by policy
    pub fn record_redirect_refused(&self) {
        self.redirects_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// A staged file arrived for a transfer nobody owns any more
    pub fn record_orphaned_file(&self) {
        self.orphaned_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            transfers_created: self.transfers_created.load(Ordering::Relaxed),
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_cancelled: self.transfers_cancelled.load(Ordering::Relaxed),
            bytes_placed: self.bytes_placed.load(Ordering::Relaxed),
            redirects_refused: self.redirects_refused.load(Ordering::Relaxed),
            orphaned_files: self.orphaned_files.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransferMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetricsSnapshot {
    pub transfers_created: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub transfers_cancelled: u64,
    pub bytes_placed: u64,
    pub redirects_refused: u64,
    pub orphaned_files: u64,
}

impl TransferMetricsSnapshot {
    /// Share of finished transfers that succeeded (0.0 to 1.0)
    ///
    /// Cancelled transfers count as failed.
    pub fn success_rate(&self) -> f64 {
        let finished = self.transfers_succeeded + self.transfers_failed;
        if finished == 0 {
            0.0
        } else {
            self.transfers_succeeded as f64 / finished as f64
        }
    }

    pub fn in_flight(&self) -> u64 {
        self.transfers_created
            .saturating_sub(self.transfers_succeeded + self.transfers_failed)
    }
}
