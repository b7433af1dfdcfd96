//! CLI error types and conversions

use crate::collector::CollectError;
use crate::config::ConfigError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("ConfigurationError: {0}")]
    Config(#[from] ConfigError),

    /// Collection job failed
    #[error("{kind}: {message}")]
    Collect {
        /// Error classification
        kind: String,
        /// Error message
        message: String,
    },

    /// Resume or status file error
    #[error("CheckpointError: {0}")]
    Checkpoint(#[from] ResumeError),

    /// Nothing recorded for the requested job
    #[error("not found: {0}")]
    NotFound(String),

    /// Output could not be rendered
    #[error("output error: {0}")]
    Output(String),
}

impl From<CollectError> for CliError {
    fn from(err: CollectError) -> Self {
        CliError::Collect {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
