//! Job progress counters and throughput estimation.
//!
//! [`Statistics`] holds the six counters a scheme maintains while it runs.
//! `remaining` and `processed` are derived on demand and never stored.
//!
//! Throughput is estimated from a rolling history of snapshots covering the
//! most recent ten seconds: the speed reported by a snapshot is the change
//! in `processed` between the oldest sample in the window and now.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// How much snapshot history is kept for speed estimation (milliseconds).
pub const HISTORY_WINDOW_MS: i64 = 10_000;

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub total: u64,
    pub pending: u64,
    pub unique: u64,
    pub duplicate: u64,
    pub failed: u64,
    pub skipped: u64,
    pub remaining: u64,
    pub processed: u64,
    /// Tiles per second over the history window.
    pub speed: f64,
}

/// Checkpoint form of [`Statistics`].
///
/// History is not persisted and `pending` is always written as zero:
/// in-flight work does not survive a checkpoint as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub total: u64,
    pub pending: u64,
    pub unique: u64,
    pub duplicate: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Counters for a running scheme.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total: u64,
    pub pending: u64,
    pub unique: u64,
    pub duplicate: u64,
    pub failed: u64,
    pub skipped: u64,
    history: VecDeque<StatsSnapshot>,
}

impl Statistics {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Tiles resolved in any way.
    #[inline]
    pub fn processed(&self) -> u64 {
        self.unique + self.duplicate + self.failed + self.skipped
    }

    /// Tiles not yet resolved.
    ///
    /// Saturates at zero. A pyramid job counts pruned subtrees as skipped
    /// while its total only covers the top level, so `processed` can run
    /// past `total` there.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed())
    }

    /// Takes a snapshot stamped with the current wall-clock time.
    pub fn snapshot(&mut self) -> StatsSnapshot {
        self.snapshot_at(chrono::Utc::now().timestamp_millis())
    }

    /// Takes a snapshot at an explicit time in milliseconds and records it
    /// in the rolling history.
    pub fn snapshot_at(&mut self, time: i64) -> StatsSnapshot {
        let mut now = StatsSnapshot {
            time,
            total: self.total,
            pending: self.pending,
            unique: self.unique,
            duplicate: self.duplicate,
            failed: self.failed,
            skipped: self.skipped,
            remaining: self.remaining(),
            processed: self.processed(),
            speed: 0.0,
        };

        self.history.push_back(now);
        while self
            .history
            .front()
            .is_some_and(|oldest| oldest.time < time - HISTORY_WINDOW_MS)
        {
            self.history.pop_front();
        }

        if self.history.len() >= 2 {
            if let Some(oldest) = self.history.front() {
                let elapsed = time - oldest.time;
                if elapsed > 0 {
                    let delta = now.processed as f64 - oldest.processed as f64;
                    now.speed = (delta / elapsed as f64 * 1000.0).round();
                }
            }
        }

        // Keep the stored sample in sync with what the caller sees
        if let Some(last) = self.history.back_mut() {
            last.speed = now.speed;
        }

        now
    }

    /// Number of snapshots currently held in the rolling window.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn to_record(&self) -> StatisticsRecord {
        StatisticsRecord {
            total: self.total,
            pending: 0,
            unique: self.unique,
            duplicate: self.duplicate,
            failed: self.failed,
            skipped: self.skipped,
        }
    }

    pub fn from_record(record: &StatisticsRecord) -> Self {
        Self {
            total: record.total,
            pending: record.pending,
            unique: record.unique,
            duplicate: record.duplicate,
            failed: record.failed,
            skipped: record.skipped,
            history: VecDeque::new(),
        }
    }
}
