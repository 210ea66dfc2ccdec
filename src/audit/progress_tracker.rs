//! Progress tracking for audit runs.
//!
//! This module provides the `RunProgressTracker`, which counts processed, skipped and failed
//! units of a check run, logs progress at regular height intervals and produces the final
//! `RunStats` summary.

use chrono::{DateTime, Utc};
use tracing::info;

/// Heights between two progress log lines
const LOG_INTERVAL: i64 = 1000;

/// Service for tracking the progress of one check run
#[derive(Debug, Clone)]
pub struct RunProgressTracker {
    /// Name of the check being run
    check: String,
    /// Wall-clock start of the run
    started_at: DateTime<Utc>,
    /// Lowest height seen this run
    first_height: Option<i64>,
    /// Highest height seen this run
    highest_height: i64,
    /// Units that produced at least one record
    units_processed: usize,
    /// Units with nothing to check
    units_skipped: usize,
    /// Records written with `success = true`
    records_ok: usize,
    /// Records written with `success = false`
    records_failed: usize,
    /// Height at which we last logged progress
    last_logged_height: i64,
}

impl RunProgressTracker {
    /// Create a new tracker for `check`.
    pub fn new(check: &str) -> Self {
        Self {
            check: check.to_string(),
            started_at: Utc::now(),
            first_height: None,
            highest_height: 0,
            units_processed: 0,
            units_skipped: 0,
            records_ok: 0,
            records_failed: 0,
            last_logged_height: 0,
        }
    }

    fn record_height(&mut self, height: i64) {
        if self.first_height.is_none() {
            self.first_height = Some(height);
            self.last_logged_height = height;
        }
        self.highest_height = self.highest_height.max(height);
    }

    /// Record a unit that wrote `ok` successful and `failed` failed records
    pub fn record_unit(&mut self, height: i64, ok: usize, failed: usize) {
        self.record_height(height);
        self.units_processed += 1;
        self.records_ok += ok;
        self.records_failed += failed;
    }

    /// Record a unit that had nothing to check
    pub fn record_skipped(&mut self, height: i64) {
        self.record_height(height);
        self.units_skipped += 1;
    }

    /// Log progress every 1000 heights or when forced
    pub fn log_progress(&mut self, force: bool) {
        let heights_since_last_log = self.highest_height.saturating_sub(self.last_logged_height);
        let should_log = force || heights_since_last_log >= LOG_INTERVAL;

        if should_log && self.first_height.is_some() {
            info!(
                "{} progress: {} units checked, {} failed records, up to height {}",
                self.check, self.units_processed, self.records_failed, self.highest_height
            );
            self.last_logged_height = self.highest_height;
        }
    }

    /// Get run statistics as a RunStats struct
    pub fn get_stats(&self) -> RunStats {
        RunStats {
            check: self.check.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            first_height: self.first_height,
            highest_height: self.highest_height,
            units_processed: self.units_processed,
            units_skipped: self.units_skipped,
            records_ok: self.records_ok,
            records_failed: self.records_failed,
        }
    }
}

/// Statistics about a finished (or aborted) run
#[derive(Debug, Clone)]
pub struct RunStats {
    pub check: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub first_height: Option<i64>,
    pub highest_height: i64,
    pub units_processed: usize,
    pub units_skipped: usize,
    pub records_ok: usize,
    pub records_failed: usize,
}

impl RunStats {
    pub fn has_failures(&self) -> bool {
        self.records_failed > 0
    }

    /// Get a human-readable summary of the run statistics
    pub fn summary(&self) -> String {
        let range = match self.first_height {
            Some(first) => format!("heights {} to {}", first, self.highest_height),
            None => "no heights".to_string(),
        };
        format!(
            "{} over {}: {} units checked, {} skipped, {} ok, {} failed in {}s",
            self.check,
            range,
            self.units_processed,
            self.units_skipped,
            self.records_ok,
            self.records_failed,
            (self.finished_at - self.started_at).num_seconds()
        )
    }
}
