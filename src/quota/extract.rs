//! Per-API quota field extraction

use crate::fetcher::ApiResponse;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;

/// Quota fields found on one response; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaFields {
    /// Requests allowed per epoch
    pub limit: Option<u64>,
    /// Requests left in the epoch
    pub remaining: Option<u64>,
    /// End of the epoch
    pub reset_at: Option<DateTime<Utc>>,
    /// Minimum wait requested by the API
    pub retry_after: Option<Duration>,
}

impl QuotaFields {
    /// Whether the response carried no quota information at all.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset_at.is_none()
            && self.retry_after.is_none()
    }
}

/// Where an API reports its quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaExtractor {
    /// `x-ratelimit-*` headers, reset in epoch seconds
    GitHubHeaders,
    /// `x-ratelimit-*` headers (reset as RFC 3339) and `retry-after`
    JiraHeaders,
    /// `quota_max` / `quota_remaining` / `backoff` in the JSON body
    StackExchangeBody,
}

impl QuotaExtractor {
    /// Pull whatever quota fields `response` carries.
    pub fn extract(&self, response: &ApiResponse, now: DateTime<Utc>) -> QuotaFields {
        match self {
            QuotaExtractor::GitHubHeaders => QuotaFields {
                limit: header_u64(response, "x-ratelimit-limit"),
                remaining: header_u64(response, "x-ratelimit-remaining"),
                reset_at: header_u64(response, "x-ratelimit-reset")
                    .and_then(|epoch| Utc.timestamp_opt(epoch as i64, 0).single()),
                retry_after: retry_after(response, now),
            },
            QuotaExtractor::JiraHeaders => QuotaFields {
                limit: header_u64(response, "x-ratelimit-limit"),
                remaining: header_u64(response, "x-ratelimit-remaining"),
                reset_at: response
                    .header("x-ratelimit-reset")
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                retry_after: retry_after(response, now),
            },
            QuotaExtractor::StackExchangeBody => {
                let body: Option<Value> = serde_json::from_str(&response.body).ok();
                let field = |name: &str| body.as_ref().and_then(|b| b.get(name)).and_then(Value::as_u64);
                QuotaFields {
                    limit: field("quota_max"),
                    remaining: field("quota_remaining"),
                    reset_at: None,
                    retry_after: field("backoff").map(Duration::from_secs),
                }
            }
        }
    }
}

fn header_u64(response: &ApiResponse, name: &str) -> Option<u64> {
    response.header(name).and_then(|v| v.trim().parse().ok())
}

/// `Retry-After` as delta seconds or an HTTP date.
fn retry_after(response: &ApiResponse, now: DateTime<Utc>) -> Option<Duration> {
    let raw = response.header("retry-after")?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|at| (at.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}
