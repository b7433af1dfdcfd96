//! Date windowing
//!
//! Splits a requested date range into consecutive, non-overlapping windows of
//! at most `interval_days` days so long ranges can be collected and
//! checkpointed incrementally.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Windowing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    /// Start after end
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },

    /// Zero-day windows were requested
    #[error("interval must be at least one day")]
    InvalidInterval,
}

/// Inclusive date sub-range; an absent side is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    /// First day, inclusive
    pub start: Option<NaiveDate>,
    /// Last day, inclusive
    pub end: Option<NaiveDate>,
}

impl FetchWindow {
    /// Window from `start` to `end`.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Window without any date filter.
    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Whether neither side is bounded.
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Number of days covered, when both sides are bounded.
    pub fn days(&self) -> Option<u64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((end - start).num_days() as u64 + 1),
            _ => None,
        }
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "*".to_string());
        write!(f, "{}..{}", side(self.start), side(self.end))
    }
}

/// Lazy iterator over the windows of a range; `Clone` restarts it
#[derive(Debug, Clone)]
pub struct DateWindows {
    next: Option<NaiveDate>,
    end: NaiveDate,
    interval_days: u64,
    unbounded: Option<FetchWindow>,
}

impl Iterator for DateWindows {
    type Item = FetchWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(window) = self.unbounded.take() {
            return Some(window);
        }

        let start = self.next?;
        let last = start
            .checked_add_days(Days::new(self.interval_days - 1))
            .map_or(self.end, |d| d.min(self.end));
        self.next = last.succ_opt().filter(|d| *d <= self.end);
        Some(FetchWindow::new(Some(start), Some(last)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.unbounded.is_some() {
            return (1, Some(1));
        }
        match self.next {
            None => (0, Some(0)),
            Some(start) => {
                let days = (self.end - start).num_days() as u64 + 1;
                let n = days.div_ceil(self.interval_days) as usize;
                (n, Some(n))
            }
        }
    }
}

impl ExactSizeIterator for DateWindows {}

/// Split `[start, end]` into windows of at most `interval_days` days.
///
/// A missing bound yields a single window that is unbounded on that side.
///
/// # Errors
///
/// [`WindowError::InvalidRange`] when `start > end`, and
/// [`WindowError::InvalidInterval`] when `interval_days` is zero.
pub fn split(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    interval_days: u32,
) -> Result<DateWindows, WindowError> {
    if interval_days == 0 {
        return Err(WindowError::InvalidInterval);
    }

    match (start, end) {
        (Some(start), Some(end)) => {
            if start > end {
                return Err(WindowError::InvalidRange { start, end });
            }
            Ok(DateWindows {
                next: Some(start),
                end,
                interval_days: u64::from(interval_days),
                unbounded: None,
            })
        }
        _ => Ok(DateWindows {
            next: None,
            end: NaiveDate::MIN,
            interval_days: u64::from(interval_days),
            unbounded: Some(FetchWindow::new(start, end)),
        }),
    }
}
