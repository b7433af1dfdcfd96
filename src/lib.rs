//! # Repo Miner Library
//!
//! Collects software-repository activity (commits, issues, pull requests,
//! branches, repository metadata and Q&A questions) from quota-limited REST APIs
//! and hands every record to an upsert-by-natural-key store.
//!
//! ## Features
//!
//! - **Multi-Provider**: GitHub REST/Search, Jira REST v3, Stack Exchange v2.3
//! - **Credential Pools**: every configured token is verified up front; the one with
//!   the most remaining quota becomes active, and exhausted tokens are rotated out
//! - **Rate-Limit Recovery**: a single guard decides between rotating credentials,
//!   sleeping until the quota resets, or giving up
//! - **Date Windows**: long ranges are split into day-sized windows
//! - **Resume Capability**: a checkpoint is written after each fully persisted window,
//!   so an interrupted job redoes at most one window
//!
//! ## Quick Start
//!
//! ```no_run
//! use repo_miner::collector::{CollectionJob, CollectionOrchestrator, MemoryStatusSink};
//! use repo_miner::config::MinerConfig;
//! use repo_miner::fetcher::PaginatedFetcher;
//! use repo_miner::resume::ProgressCheckpoint;
//! use repo_miner::store::MemoryStore;
//! use repo_miner::{EntityType, Provider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MinerConfig::from_env()?;
//! let fetcher = PaginatedFetcher::from_config(&config, Provider::GitHub)?;
//! let mut orchestrator = CollectionOrchestrator::new(
//!     fetcher,
//!     ProgressCheckpoint::in_memory(),
//!     Box::new(MemoryStore::new()),
//!     Arc::new(MemoryStatusSink::new()),
//! );
//!
//! let mut job = CollectionJob::new(Provider::GitHub, EntityType::Issues, "rust-lang/rust")
//!     .with_range(
//!         Some("2024-01-01".parse()?),
//!         Some("2024-01-03".parse()?),
//!     );
//! let report = orchestrator.run(&mut job).await?;
//! println!("{} records upserted", report.records_upserted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`credentials`] - Credential pool, rotation and verification outcomes
//! - [`quota`] - Quota buckets and per-response quota tracking
//! - [`fetcher`] - HTTP transport, provider strategies and pagination
//! - [`collector`] - Rate-limit guard, windowing, jobs and orchestration
//! - [`resume`] - Checkpoint persistence
//! - [`store`] - Upsert-by-natural-key record stores

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Virtual and system time sources
pub mod clock;

/// Collection orchestration and rate-limit handling
pub mod collector;

/// Environment-driven configuration
pub mod config;

/// Credential pools
pub mod credentials;

/// HTTP transport, provider strategies and pagination
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Quota tracking
pub mod quota;

/// Checkpoints for resumable jobs
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Record persistence collaborators
pub mod store;

pub use collector::{CollectError, CollectionJob, CollectionOrchestrator, Decision, FetchWindow};
pub use credentials::{Credential, CredentialPool};
pub use fetcher::PaginatedFetcher;

/// Upstream API a job mines from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// GitHub REST and Search APIs
    #[serde(rename = "github")]
    GitHub,
    /// Jira Cloud REST API v3
    Jira,
    /// Stack Exchange API v2.3
    #[serde(rename = "stackexchange")]
    StackExchange,
}

impl Provider {
    /// Stable lowercase name used in job ids, paths and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Jira => "jira",
            Provider::StackExchange => "stackexchange",
        }
    }

    /// Whether credentials for this provider need a companion identity (account email).
    pub fn requires_identity(&self) -> bool {
        matches!(self, Provider::Jira)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" | "gh" => Ok(Provider::GitHub),
            "jira" => Ok(Provider::Jira),
            "stackexchange" | "stackoverflow" | "so" => Ok(Provider::StackExchange),
            _ => Err(format!(
                "Invalid provider: {s}. Valid options: github, jira, stackexchange"
            )),
        }
    }
}

/// Kind of record a job collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Commits (natural key: SHA)
    Commits,
    /// Issues (natural key: issue number or id)
    Issues,
    /// Pull requests (natural key: PR number)
    PullRequests,
    /// Branches (natural key: branch name)
    Branches,
    /// Repository metadata (natural key: full repository name)
    Metadata,
    /// Q&A questions (natural key: question id)
    Questions,
}

impl EntityType {
    /// Stable snake_case name used in job ids, paths and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Commits => "commits",
            EntityType::Issues => "issues",
            EntityType::PullRequests => "pull_requests",
            EntityType::Branches => "branches",
            EntityType::Metadata => "metadata",
            EntityType::Questions => "questions",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "commits" => Ok(EntityType::Commits),
            "issues" => Ok(EntityType::Issues),
            "pull_requests" | "pulls" | "prs" => Ok(EntityType::PullRequests),
            "branches" => Ok(EntityType::Branches),
            "metadata" => Ok(EntityType::Metadata),
            "questions" => Ok(EntityType::Questions),
            _ => Err(format!(
                "Invalid entity type: {s}. Valid options: commits, issues, pull_requests, branches, metadata, questions"
            )),
        }
    }
}

/// How much per-item detail a job collects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// List payloads only
    #[default]
    Basic,
    /// List payloads plus per-item sub-resources (comments, timelines, ...)
    Complex,
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Basic => f.write_str("basic"),
            Depth::Complex => f.write_str("complex"),
        }
    }
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Depth::Basic),
            "complex" => Ok(Depth::Complex),
            _ => Err(format!("Invalid depth: {s}. Valid options: basic, complex")),
        }
    }
}
