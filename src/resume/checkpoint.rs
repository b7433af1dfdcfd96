//! Checkpoint types for resume capability
//!
//! A checkpoint records the end of the last date window whose pages were all
//! fetched and persisted. Windows are inclusive, so resuming starts the day
//! after.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Completed work for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    job_id: String,
    last_completed_window_end: Option<NaiveDate>,
    windows_completed: u64,
    records_upserted: u64,
    updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Empty checkpoint for `job_id`.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            last_completed_window_end: None,
            windows_completed: 0,
            records_upserted: 0,
            updated_at: Utc::now(),
        }
    }

    /// Advance past a window ending on `end` that upserted `records`.
    ///
    /// Never moves the marker backwards.
    pub fn advance(&mut self, end: NaiveDate, records: u64) {
        self.last_completed_window_end = Some(match self.last_completed_window_end {
            Some(previous) => previous.max(end),
            None => end,
        });
        self.windows_completed += 1;
        self.records_upserted += records;
        self.updated_at = Utc::now();
    }

    /// Day after the last completed window.
    pub fn next_start(&self) -> Option<NaiveDate> {
        self.last_completed_window_end.and_then(|d| d.succ_opt())
    }

    /// Job this checkpoint belongs to
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// End of the last completed window
    pub fn last_completed_window_end(&self) -> Option<NaiveDate> {
        self.last_completed_window_end
    }

    /// Windows completed across all runs
    pub fn windows_completed(&self) -> u64 {
        self.windows_completed
    }

    /// Records upserted across all runs
    pub fn records_upserted(&self) -> u64 {
        self.records_upserted
    }

    /// Last update time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
