// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Insertion counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters of one sink instance.
#[derive(Debug)]
pub struct SinkStats {
    /// Records handed to `collect` (batch elements counted one by one).
    pub records_received: AtomicU64,

    /// Records written to the store.
    pub records_inserted: AtomicU64,

    /// Records rejected or failed at any stage.
    pub records_failed: AtomicU64,

    /// Sessions checked out of the pool.
    pub sessions_acquired: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl SinkStats {
    pub fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_inserted: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            sessions_acquired: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inserted(&self) {
        self.records_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_acquired(&self) {
        self.sessions_acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_inserted: self.records_inserted.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            sessions_acquired: self.sessions_acquired.load(Ordering::Relaxed),
            uptime: self.created.elapsed(),
        }
    }
}

impl Default for SinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub records_received: u64,
    pub records_inserted: u64,
    pub records_failed: u64,
    pub sessions_acquired: u64,
    pub uptime: Duration,
}

impl SinkStatsSnapshot {
    /// Inserted / received, or 1.0 before any record.
    pub fn success_rate(&self) -> f64 {
        if self.records_received == 0 {
            1.0
        } else {
            self.records_inserted as f64 / self.records_received as f64
        }
    }
}
