//! Progress accounting and throughput/ETA reporting.
//!
//! One [`ProgressTracker`] lives for one cache-area run. Counters are
//! atomics so completion recording is safe regardless of how the dispatcher
//! schedules completions, and the total is fixed at construction: the ETA
//! denominator never changes mid-run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Default upper bound for the report interval.
const DEFAULT_REPORT_INTERVAL: u64 = 1000;

/// A point-in-time progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub remaining: u64,
    /// Completions per second since the run started.
    pub rate: f64,
    pub elapsed_secs: f64,
    /// Estimated hours to completion at the observed rate.
    pub eta_hours: f64,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tiles done = {}, failed = {}, rate = {:.1} req/s ({} left, elapsed = {:.1}s, etc = {:.2}h)",
            self.completed, self.failed, self.rate, self.remaining, self.elapsed_secs, self.eta_hours
        )
    }
}

/// Tracks completions for one cache-area run.
pub struct ProgressTracker {
    total: u64,
    report_interval: u64,
    completed: AtomicU64,
    failed: AtomicU64,
    started_at: Instant,
}

impl ProgressTracker {
    /// Creates a tracker for `total` tasks.
    ///
    /// When no interval is given, status is emitted every
    /// `min(1000, total)` completions; never on every completion for large
    /// runs, where logging cost would dominate.
    pub fn new(total: u64, report_interval: Option<u64>) -> Self {
        let report_interval = report_interval
            .unwrap_or_else(|| DEFAULT_REPORT_INTERVAL.min(total))
            .max(1);
        Self {
            total,
            report_interval,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records one completion (success or failure both count as completed).
    ///
    /// Returns a report exactly when the completion count crosses a report
    /// boundary.
    pub fn record(&self, success: bool) -> Option<ProgressReport> {
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % self.report_interval == 0 {
            Some(self.report_at(completed))
        } else {
            None
        }
    }

    /// Builds a report for the current counters.
    pub fn snapshot(&self) -> ProgressReport {
        self.report_at(self.completed.load(Ordering::Relaxed))
    }

    fn report_at(&self, completed: u64) -> ProgressReport {
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            completed as f64 / elapsed_secs
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(completed);
        let eta_hours = if rate > 0.0 {
            (remaining as f64 / rate) / 3600.0
        } else {
            0.0
        };
        ProgressReport {
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total,
            remaining,
            rate,
            elapsed_secs,
            eta_hours,
        }
    }

    /// Total number of tasks in this run.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Completions so far, failures included.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Failed completions so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
