//! Job status publication and per-window progress.
//!
//! The orchestrator publishes a [`JobReport`] on every significant step (job
//! start, window start, page, rate-limit decision, window end, job end).
//! [`StatusSink`] implementations decide where those reports go; the CLI adds
//! a spinner sink of its own.
//!
//! [`WindowProgress`] computes the human-readable `operation` text for pages
//! of one window: item counts, the preflight estimate, rate and time left.

use super::job::{encode_component, JobReport};
use crate::resume::state::write_atomic;
use crate::resume::ResumeError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Receives job reports
pub trait StatusSink: Send + Sync {
    /// Publish the latest report; failures are logged, never propagated.
    fn publish(&self, report: &JobReport);
}

/// Keeps every published report
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    history: Mutex<Vec<JobReport>>,
}

impl MemoryStatusSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report in publication order.
    pub fn history(&self) -> Vec<JobReport> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Most recent report.
    pub fn last(&self) -> Option<JobReport> {
        self.history.lock().ok().and_then(|h| h.last().cloned())
    }

    /// Operation strings in publication order.
    pub fn operations(&self) -> Vec<String> {
        self.history().into_iter().map(|r| r.operation).collect()
    }
}

impl StatusSink for MemoryStatusSink {
    fn publish(&self, report: &JobReport) {
        if let Ok(mut history) = self.history.lock() {
            history.push(report.clone());
        }
    }
}

/// Writes the latest report to `<state_dir>/status/<job_id>.json`
#[derive(Debug, Clone)]
pub struct FileStatusSink {
    dir: PathBuf,
}

impl FileStatusSink {
    /// Sink writing under `<state_dir>/status`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("status"),
        }
    }

    /// Status file for `job_id`.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_component(job_id)))
    }

    /// Last report written for `job_id`.
    pub fn load(&self, job_id: &str) -> Result<Option<JobReport>, ResumeError> {
        let path = self.path_for(job_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| ResumeError::DeserializationError(e.to_string()))
    }
}

impl StatusSink for FileStatusSink {
    fn publish(&self, report: &JobReport) {
        let path = self.path_for(&report.job_id);
        let result = serde_json::to_vec_pretty(report)
            .map_err(|e| e.to_string())
            .and_then(|json| write_atomic(&path, &json));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write job status");
        }
    }
}

/// Publishes to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutSink {
    /// Empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl StatusSink for FanoutSink {
    fn publish(&self, report: &JobReport) {
        for sink in &self.sinks {
            sink.publish(report);
        }
    }
}

/// Progress of the pages of one window
#[derive(Debug, Clone)]
pub struct WindowProgress {
    /// Items fetched so far in this window
    pub items_fetched: u64,
    /// Preflight estimate of the window's items
    pub total_expected: Option<u64>,
    /// Pages fetched so far
    pub pages: u32,
    /// When the window started
    pub start_time: Instant,
    /// Items per second
    pub current_rate: f64,
    /// Label such as "window 3/10 2024-01-03..2024-01-03"
    pub phase: String,
}

impl WindowProgress {
    /// Progress for a window labelled `phase`.
    pub fn new(phase: impl Into<String>, total_expected: Option<u64>) -> Self {
        Self {
            items_fetched: 0,
            total_expected,
            pages: 0,
            start_time: Instant::now(),
            current_rate: 0.0,
            phase: phase.into(),
        }
    }

    /// Account for one fetched page of `items` items.
    pub fn update(&mut self, items: u64) {
        self.pages += 1;
        self.items_fetched = self.items_fetched.saturating_add(items);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.items_fetched as f64 / elapsed;
        }
    }

    /// Completion percentage against the preflight estimate.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.items_fetched as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Time left at the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.items_fetched);
        (remaining > 0).then(|| Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}: page {}, {} items",
            self.phase, self.pages, self.items_fetched
        )];

        if let Some(total) = self.total_expected {
            parts.push(format!("of ~{total}"));
        }

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.0} items/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration: `42s`, `7m`, `1.5h`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
