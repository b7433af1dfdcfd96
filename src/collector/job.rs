//! Collection job structures and status tracking

use super::window::{self, FetchWindow};
use super::CollectError;
use crate::{Depth, EntityType, Provider};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Collection job specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionJob {
    /// Upstream API
    pub provider: Provider,
    /// What to collect
    pub entity: EntityType,
    /// `owner/repo`, project key or site name
    pub target: String,
    /// First day, inclusive; `None` is unbounded
    pub start_date: Option<NaiveDate>,
    /// Last day, inclusive; `None` is unbounded
    pub end_date: Option<NaiveDate>,
    /// Per-item detail level
    #[serde(default)]
    pub depth: Depth,
    /// Days per window
    pub interval_days: u32,
    /// `;`-separated tag filter, for APIs that support one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged: Option<String>,
    /// Current job status
    #[serde(default)]
    pub status: JobStatus,
    /// Job progress tracking
    #[serde(default)]
    pub progress: JobProgress,
}

impl CollectionJob {
    /// Unbounded basic-depth job with daily windows.
    pub fn new(provider: Provider, entity: EntityType, target: impl Into<String>) -> Self {
        Self {
            provider,
            entity,
            target: target.into(),
            start_date: None,
            end_date: None,
            depth: Depth::Basic,
            interval_days: 1,
            tagged: None,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
        }
    }

    /// Restrict to `[start, end]`.
    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Set the detail level.
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Set days per window.
    pub fn with_interval_days(mut self, days: u32) -> Self {
        self.interval_days = days;
        self
    }

    /// Only collect items carrying `tags`.
    pub fn with_tagged(mut self, tags: Option<String>) -> Self {
        self.tagged = tags;
        self
    }

    /// Deterministic identifier; re-triggering the same job yields the same id.
    ///
    /// The target and tag filter are escaped with [`encode_component`], so
    /// distinct jobs never share an id.
    pub fn id(&self) -> String {
        let day = |d: Option<NaiveDate>| {
            d.map(|d| d.format("%Y%m%d").to_string())
                .unwrap_or_else(|| "open".to_string())
        };
        let mut id = format!(
            "{}-{}-{}-{}-{}",
            self.provider,
            self.entity,
            encode_component(&self.target),
            day(self.start_date),
            day(self.end_date)
        );
        if let Some(tags) = &self.tagged {
            id.push('~');
            id.push_str(&encode_component(tags));
        }
        id
    }

    /// Requested range as a window.
    pub fn requested_window(&self) -> FetchWindow {
        FetchWindow::new(self.start_date, self.end_date)
    }

    /// Validate job parameters; never touches the network.
    pub fn validate(&self) -> Result<(), CollectError> {
        if self.target.trim().is_empty() {
            return Err(CollectError::Configuration("target cannot be empty".to_string()));
        }
        if self.tagged.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(CollectError::Configuration("tag filter cannot be empty".to_string()));
        }
        window::split(self.start_date, self.end_date, self.interval_days)?;
        Ok(())
    }

    /// Snapshot of the job for the status collaborator.
    pub fn report(&self, operation: impl Into<String>) -> JobReport {
        JobReport {
            job_id: self.id(),
            status: self.status,
            operation: operation.into(),
            error: None,
            error_type: None,
            windows_completed: self.progress.windows_completed,
            records_upserted: self.progress.records_upserted,
            items_skipped: self.progress.items_skipped,
            skipped_pages: self.progress.skipped_pages.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// Escape `raw` for ids and file names.
///
/// `[A-Za-z0-9._-]` pass through; every other byte becomes `%XX`, including
/// `%` itself, so the mapping is injective.
pub fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not started
    #[default]
    Pending,
    /// Running
    Started,
    /// Every window completed
    Success,
    /// Stopped on an error or cancellation
    Failure,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        })
    }
}

/// Job progress tracking
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Windows in this run, when the range is bounded
    pub windows_total: Option<u64>,
    /// Windows fully persisted and checkpointed in this run
    pub windows_completed: u64,
    /// Records handed to the store
    pub records_upserted: u64,
    /// Items without a natural key, enrichments and pages skipped on upstream errors
    pub items_skipped: u64,
    /// Pages skipped on upstream errors, as `<window> page <n> (HTTP <status>)`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_pages: Vec<String>,
    /// Pages fetched
    pub pages_fetched: u64,
    /// Requests sent
    pub api_requests: u64,
    /// Credential switches
    pub rotations: u64,
    /// Quota-reset waits
    pub waits: u64,
    /// End of the last checkpointed window
    pub last_completed_window: Option<NaiveDate>,
}

impl JobProgress {
    /// Window completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> Option<f64> {
        self.windows_total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.windows_completed as f64 / total as f64) * 100.0
            }
        })
    }
}

/// What the status collaborator sees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Job identifier
    pub job_id: String,
    /// Lifecycle status
    pub status: JobStatus,
    /// Latest human-readable step
    pub operation: String,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Windows completed in this run
    pub windows_completed: u64,
    /// Records upserted in this run
    pub records_upserted: u64,
    /// Items skipped in this run
    pub items_skipped: u64,
    /// Pages skipped in this run, as `<window> page <n> (HTTP <status>)`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_pages: Vec<String>,
    /// When this report was produced
    pub updated_at: DateTime<Utc>,
}
