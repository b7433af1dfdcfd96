//! Retry message formatting for transient request failures.
//!
//! Keeps the wording of retry, recovery and final-failure log lines consistent
//! across providers.

use super::TransportError;
use std::time::Duration;

/// What went wrong on a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// No response within the request or connect timeout
    Timeout,
    /// Host could not be reached (refused, DNS)
    Unreachable,
    /// API answered 5xx
    Server(u16),
    /// API answered 4xx
    Client(u16),
    /// Anything else below HTTP
    Other,
}

impl RetryErrorType {
    /// Classify a failure below HTTP.
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::Timeout,
            TransportError::Connect(_) => Self::Unreachable,
            TransportError::Other(_) => Self::Other,
        }
    }

    /// Classify an HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            500..=599 => Self::Server(status),
            400..=499 => Self::Client(status),
            _ => Self::Other,
        }
    }

    /// Short phrase for log lines.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "API host unreachable",
            Self::Server(502) => "bad gateway",
            Self::Server(503) => "API unavailable",
            Self::Server(504) => "gateway timeout",
            Self::Server(_) => "API server error",
            Self::Client(401) => "credential rejected",
            Self::Client(404) => "resource not found",
            Self::Client(422) => "query rejected",
            Self::Client(_) => "request rejected",
            Self::Other => "transport error",
        }
    }

    /// What the operator can do once retries run out.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout => "Raise MINER_HTTP_TIMEOUT_SECS or re-run the job later to resume",
            Self::Unreachable => "Check the configured API base URL and network access",
            Self::Server(_) => "The API is degraded; re-run the job later to resume from its checkpoint",
            Self::Client(_) => "Check the target reference, date range and credential scopes",
            Self::Other => "Re-run the job; completed windows are not collected again",
        }
    }

    /// Whether the fetcher retries this kind of failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RetryErrorType::Client(_))
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 1-based attempt that failed
    pub attempt: u32,
    /// Attempts allowed in total
    pub max_attempts: u32,
    /// Failure classification
    pub error_type: RetryErrorType,
    /// Delay until next attempt
    pub delay: Duration,
    /// Request URL without query string
    pub endpoint: String,
    /// Error text of the failed attempt
    pub error_message: String,
}

impl RetryContext {
    /// Context for one failed attempt.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        delay: Duration,
        endpoint: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            delay,
            endpoint: endpoint.into(),
            error_message: error_message.into(),
        }
    }

    /// Line logged before the next attempt.
    pub fn format_retry(&self) -> String {
        format!(
            "{} on {}, attempt {}/{} in {:.1}s",
            self.error_type.description(),
            self.endpoint,
            self.attempt + 1,
            self.max_attempts,
            self.delay.as_secs_f64()
        )
    }

    /// Line logged when a retry got through.
    pub fn format_success(&self) -> String {
        format!(
            "{} recovered on attempt {}/{}",
            self.endpoint, self.attempt, self.max_attempts
        )
    }

    /// Multi-line summary logged when every attempt failed.
    pub fn format_failure(&self) -> String {
        let lines = [
            format!("[FAILED] {} gave up after {} attempts", self.endpoint, self.max_attempts),
            format!("  Last error: {}", self.error_message),
            format!("  Hint: {}", self.error_type.suggestion()),
        ];
        lines.join("\n")
    }
}
