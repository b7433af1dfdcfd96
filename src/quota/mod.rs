//! Quota tracking
//!
//! Each response is inspected for the quota fields its API exposes and turned
//! into an immutable [`QuotaState`] snapshot per bucket. Only the active
//! credential is tracked; the tracker is reset whenever the credential changes.

use crate::fetcher::ApiResponse;
use chrono::{DateTime, Days, FixedOffset, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;

pub mod extract;

pub use extract::{QuotaExtractor, QuotaFields};

/// Whether a bucket's quota belongs to each credential or to the caller as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketScope {
    /// Each credential has its own allowance; rotating helps
    PerCredential,
    /// Allowance is shared across credentials; only waiting helps
    Shared,
}

/// How a bucket's quota epoch ends when the API gives no reset hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPolicy {
    /// Rolling window of fixed length from now
    Rolling(Duration),
    /// Next midnight UTC
    UtcMidnight,
}

/// A named quota pool with independent limit/remaining tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name used in logs, metrics and probes
    pub name: &'static str,
    /// Credential scope
    pub scope: BucketScope,
    /// Documented limit assumed before the API reports one
    pub default_limit: u64,
    /// Reset fallback
    pub reset: ResetPolicy,
}

impl Bucket {
    /// GitHub REST core allowance.
    pub const GITHUB_CORE: Bucket = Bucket {
        name: "core",
        scope: BucketScope::PerCredential,
        default_limit: 5000,
        reset: ResetPolicy::Rolling(Duration::from_secs(3600)),
    };

    /// GitHub search allowance.
    pub const GITHUB_SEARCH: Bucket = Bucket {
        name: "search",
        scope: BucketScope::Shared,
        default_limit: 30,
        reset: ResetPolicy::Rolling(Duration::from_secs(60)),
    };

    /// Jira Cloud per-user allowance.
    pub const JIRA: Bucket = Bucket {
        name: "jira",
        scope: BucketScope::PerCredential,
        default_limit: 100,
        reset: ResetPolicy::Rolling(Duration::from_secs(60)),
    };

    /// Stack Exchange daily per-key quota.
    pub const STACK_EXCHANGE: Bucket = Bucket {
        name: "quota",
        scope: BucketScope::PerCredential,
        default_limit: 10_000,
        reset: ResetPolicy::UtcMidnight,
    };

    /// Whether rotating credentials can relieve exhaustion of this bucket.
    pub fn is_per_credential(&self) -> bool {
        self.scope == BucketScope::PerCredential
    }

    /// Reset instant to assume when the API did not say.
    pub fn default_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.reset {
            ResetPolicy::Rolling(window) => now + to_delta(window),
            ResetPolicy::UtcMidnight => now
                .date_naive()
                .checked_add_days(Days::new(1))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or(now),
        }
    }
}

/// Immutable quota snapshot for one bucket of the active credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    /// Bucket name
    pub bucket: &'static str,
    /// Requests allowed per epoch
    pub limit: u64,
    /// Requests left in the current epoch
    pub remaining: u64,
    /// When the epoch ends and `remaining` returns to `limit`
    pub reset_at: DateTime<Utc>,
    /// `limit - remaining`
    pub used: u64,
    /// Minimum wait the API asked for on the last response (backoff / Retry-After)
    pub retry_after: Option<Duration>,
}

impl QuotaState {
    fn new(
        bucket: &'static str,
        limit: u64,
        remaining: u64,
        reset_at: DateTime<Utc>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            bucket,
            limit,
            remaining,
            reset_at,
            used: limit.saturating_sub(remaining),
            retry_after,
        }
    }

    /// Fresh state assuming the full documented allowance.
    pub fn full(bucket: &Bucket, now: DateTime<Utc>) -> Self {
        Self::new(
            bucket.name,
            bucket.default_limit,
            bucket.default_limit,
            bucket.default_reset(now),
            None,
        )
    }

    /// Whether nothing is left before reset.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Time left until reset, zero if it already passed.
    pub fn until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Fraction of the limit still available.
    pub fn remaining_ratio(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.limit as f64
    }
}

/// Per-bucket quota snapshots for the active credential
#[derive(Debug, Clone, Default)]
pub struct QuotaTracker {
    states: HashMap<&'static str, QuotaState>,
}

impl QuotaTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect `response` with `extractor` and replace the snapshot for `bucket`.
    pub fn update(
        &mut self,
        response: &ApiResponse,
        extractor: QuotaExtractor,
        bucket: &Bucket,
        now: DateTime<Utc>,
    ) -> QuotaState {
        let fields = extractor.extract(response, now);
        self.apply(fields, bucket, now)
    }

    /// Merge already-extracted fields into the snapshot for `bucket`.
    ///
    /// Absent fields keep their previous values; the very first update assumes
    /// the bucket's documented full allowance. Once a known reset has passed,
    /// an update without `remaining` starts a new epoch at `limit`.
    pub fn apply(&mut self, fields: QuotaFields, bucket: &Bucket, now: DateTime<Utc>) -> QuotaState {
        let previous = self.states.get(bucket.name);

        let limit = fields
            .limit
            .or(previous.map(|p| p.limit))
            .unwrap_or(bucket.default_limit);

        let epoch_over = previous.is_some_and(|p| p.reset_at <= now);
        let remaining = match fields.remaining {
            Some(remaining) => remaining,
            None => match previous {
                Some(_) if epoch_over => limit,
                Some(p) => p.remaining,
                None => limit,
            },
        };

        let hinted = fields.retry_after.map(|wait| now + to_delta(wait));
        let reset_at = match (fields.reset_at, hinted) {
            (Some(reset), Some(hint)) => reset.max(hint),
            (Some(reset), None) => reset,
            (None, Some(hint)) => hint,
            (None, None) => match previous {
                Some(p) if !epoch_over => p.reset_at,
                _ => bucket.default_reset(now),
            },
        };

        let state = QuotaState::new(bucket.name, limit, remaining, reset_at, fields.retry_after);
        self.states.insert(bucket.name, state.clone());
        state
    }

    /// Latest snapshot for `bucket`, if any response has been inspected.
    pub fn current(&self, bucket: &str) -> Option<&QuotaState> {
        self.states.get(bucket)
    }

    /// Forget every snapshot; called when the active credential changes.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

/// Render the reset instant in `offset` plus seconds until reset.
///
/// Logging only; never consulted for control flow.
pub fn format_reset(state: &QuotaState, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = state.reset_at.with_timezone(&offset);
    let seconds = (state.reset_at - now).num_seconds().max(0);
    format!(
        "{} (in {} seconds)",
        local.format("%Y-%m-%d %H:%M:%S %:z"),
        seconds
    )
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
