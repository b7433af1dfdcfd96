//! Collection orchestration and rate-limit handling
//!
//! This module turns a [`CollectionJob`] into a sequence of date windows, walks
//! every page of every window through the [`PaginatedFetcher`], upserts the
//! items and checkpoints each window once it is fully persisted.
//!
//! # Overview
//!
//! 1. **Job Creation**: Describe what to collect using [`CollectionJob`]
//! 2. **Windowing**: Split the requested range with [`split`]
//! 3. **Execution**: Run the job with [`CollectionOrchestrator::run`], or in
//!    the background with [`dispatch::spawn`]
//! 4. **Rate Limiting**: Throttled responses go to [`RateLimitGuard`]
//! 5. **Status**: Reports are published to a [`StatusSink`]
//!
//! # Error Handling
//!
//! Every failure surfaces as a [`CollectError`] whose [`CollectError::kind`]
//! is the classification written to the job status:
//! - configuration and credential errors stop the job before any window
//! - a window that cannot be completed stops the job without checkpointing it
//! - upstream errors on single pages or enrichments are skipped and logged
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - Provider strategies and pagination
//! - [`crate::resume`] - Checkpoint persistence
//! - [`crate::store`] - Record persistence
//!
//! [`PaginatedFetcher`]: crate::fetcher::PaginatedFetcher

pub mod dispatch;
pub mod executor;
pub mod job;
pub mod progress;
pub mod rate_limit;
pub mod window;

pub use dispatch::{spawn, JobHandle};
pub use executor::CollectionOrchestrator;
pub use job::{CollectionJob, JobProgress, JobReport, JobStatus};
pub use progress::{FanoutSink, FileStatusSink, MemoryStatusSink, StatusSink, WindowProgress};
pub use rate_limit::{Decision, RateLimitGuard};
pub use window::{split, DateWindows, FetchWindow, WindowError};

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::fetcher::FetcherError;
use crate::resume::ResumeError;
use crate::store::StoreError;
use crate::EntityType;

/// Collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Missing or malformed configuration, or an unsupported request
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every credential failed verification
    #[error("no valid credential: {0}")]
    NoValidCredential(String),

    /// Caller-supplied range is unusable
    #[error(transparent)]
    InvalidRange(#[from] WindowError),

    /// A window could not be completed; it was not checkpointed
    #[error(
        "{entity} window {window} failed after page {last_successful_page}: {source}"
    )]
    WindowFailed {
        /// Entity being collected
        entity: EntityType,
        /// Window that failed
        window: FetchWindow,
        /// Last page fetched and persisted, 0 if none
        last_successful_page: u32,
        /// Underlying fetch error
        #[source]
        source: FetcherError,
    },

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] ResumeError),

    /// Record store failure
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Stopped at a window boundary on request
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Background task ended abnormally
    #[error("job aborted: {0}")]
    Aborted(String),
}

impl CollectError {
    /// Error classification written to the job status.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Configuration(_) => "ConfigurationError",
            CollectError::NoValidCredential(_) => "NoValidCredentialError",
            CollectError::InvalidRange(_) => "InvalidRangeError",
            CollectError::WindowFailed { source, .. } => match source {
                FetcherError::RateLimitExhausted { .. } => "RateLimitExhausted",
                FetcherError::TransientNetwork { .. } => "TransientNetworkError",
                FetcherError::UpstreamApi { .. }
                | FetcherError::ParseError(_)
                | FetcherError::TooManyPages(_) => "UpstreamAPIError",
                FetcherError::CredentialRejected { .. } => "NoValidCredentialError",
                FetcherError::Unsupported(_) => "ConfigurationError",
            },
            CollectError::Checkpoint(_) => "CheckpointError",
            CollectError::Persistence(_) => "PersistenceError",
            CollectError::Cancelled(_) => "Cancelled",
            CollectError::Aborted(_) => "Aborted",
        }
    }
}

impl From<ConfigError> for CollectError {
    fn from(err: ConfigError) -> Self {
        CollectError::Configuration(err.to_string())
    }
}

impl From<CredentialError> for CollectError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Configuration(message) => CollectError::Configuration(message),
            other @ CredentialError::NoValidCredential { .. } => {
                CollectError::NoValidCredential(other.to_string())
            }
        }
    }
}
