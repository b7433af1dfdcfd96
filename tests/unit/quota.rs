//! Quota snapshot arithmetic and field retention

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use repo_miner::fetcher::ApiResponse;
use repo_miner::quota::{format_reset, Bucket, QuotaExtractor, QuotaFields, QuotaTracker};
use std::time::Duration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_used_is_limit_minus_remaining() {
    let mut tracker = QuotaTracker::new();
    for limit in [1u64, 30, 100, 5000, 10_000] {
        for remaining in [0, 1, limit / 2, limit.saturating_sub(1), limit] {
            let state = tracker.apply(
                QuotaFields {
                    limit: Some(limit),
                    remaining: Some(remaining),
                    ..Default::default()
                },
                &Bucket::GITHUB_CORE,
                now(),
            );
            assert_eq!(state.used, limit - remaining, "limit {limit}, remaining {remaining}");
            assert_eq!(state.is_exhausted(), remaining == 0);
        }
    }
}

#[test]
fn test_first_update_without_fields_assumes_full_quota() {
    let mut tracker = QuotaTracker::new();
    let state = tracker.apply(QuotaFields::default(), &Bucket::STACK_EXCHANGE, now());
    assert_eq!(state.limit, 10_000);
    assert_eq!(state.remaining, 10_000);
    assert_eq!(state.used, 0);
    // Stack Exchange quotas roll over at UTC midnight.
    assert_eq!(state.reset_at, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
}

#[test]
fn test_missing_fields_keep_previous_values() {
    let mut tracker = QuotaTracker::new();
    let response = ApiResponse::new(200, "[]")
        .with_header("x-ratelimit-limit", "5000")
        .with_header("x-ratelimit-remaining", "4321")
        .with_header("x-ratelimit-reset", (now().timestamp() + 600).to_string());
    let first = tracker.update(&response, QuotaExtractor::GitHubHeaders, &Bucket::GITHUB_CORE, now());

    let bare = ApiResponse::new(200, "[]");
    let second = tracker.update(&bare, QuotaExtractor::GitHubHeaders, &Bucket::GITHUB_CORE, now());
    assert_eq!(second.limit, first.limit);
    assert_eq!(second.remaining, 4321);
    assert_eq!(second.reset_at, first.reset_at);
    assert_eq!(tracker.current("core"), Some(&second));
    assert!(tracker.current("search").is_none());
}

#[test]
fn test_stack_exchange_body_and_backoff() {
    let mut tracker = QuotaTracker::new();
    let response = ApiResponse::new(200, r#"{"items":[],"quota_max":300,"quota_remaining":12,"backoff":10}"#);
    let state = tracker.update(&response, QuotaExtractor::StackExchangeBody, &Bucket::STACK_EXCHANGE, now());
    assert_eq!(state.used, 288);
    assert_eq!(state.retry_after, Some(Duration::from_secs(10)));
}

#[test]
fn test_format_reset_uses_display_offset() {
    let mut tracker = QuotaTracker::new();
    let state = tracker.apply(
        QuotaFields {
            limit: Some(30),
            remaining: Some(0),
            reset_at: Some(now() + chrono::TimeDelta::seconds(120)),
            retry_after: None,
        },
        &Bucket::GITHUB_SEARCH,
        now(),
    );
    let text = format_reset(&state, now(), FixedOffset::west_opt(3 * 3600).unwrap());
    assert_eq!(text, "2024-05-01 09:02:00 -03:00 (in 120 seconds)");
}
