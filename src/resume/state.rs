//! Resume state persistence
//!
//! One JSON document per job: schema version, the job it describes, and its
//! checkpoint. Writes are atomic and coordinated through a sibling lock file.

use super::checkpoint::Checkpoint;
use crate::collector::CollectionJob;
use crate::{EntityType, Provider};
use chrono::NaiveDate;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current resume state schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// The job a state file was written for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Upstream API
    pub provider: Provider,
    /// Entity collected
    pub entity: EntityType,
    /// Target reference
    pub target: String,
    /// Requested start
    pub start_date: Option<NaiveDate>,
    /// Requested end
    pub end_date: Option<NaiveDate>,
    /// Tag filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged: Option<String>,
}

impl From<&CollectionJob> for JobDescriptor {
    fn from(job: &CollectionJob) -> Self {
        Self {
            provider: job.provider,
            entity: job.entity,
            target: job.target.clone(),
            start_date: job.start_date,
            end_date: job.end_date,
            tagged: job.tagged.clone(),
        }
    }
}

impl std::fmt::Display for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let day = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "open".to_string());
        write!(
            f,
            "{} {} {:?} {}..{}",
            self.provider,
            self.entity,
            self.target,
            day(self.start_date),
            day(self.end_date)
        )?;
        if let Some(tagged) = &self.tagged {
            write!(f, " tagged {tagged:?}")?;
        }
        Ok(())
    }
}

/// Resume state for a collection job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    schema_version: String,
    job: JobDescriptor,
    checkpoint: Checkpoint,
}

impl ResumeState {
    /// State wrapping `checkpoint` for `job`.
    pub fn new(job: JobDescriptor, checkpoint: Checkpoint) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            job,
            checkpoint,
        }
    }

    /// Schema version the file was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Job descriptor
    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    /// Checkpoint
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Take the checkpoint out of the state.
    pub fn into_checkpoint(self) -> Checkpoint {
        self.checkpoint
    }

    /// Split into the job descriptor and its checkpoint.
    pub fn into_parts(self) -> (JobDescriptor, Checkpoint) {
        (self.job, self.checkpoint)
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state to `path` atomically while holding the write lock.
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(
            path = %path.display(),
            job_id = self.checkpoint.job_id(),
            "Saving resume state"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let lock_file = open_lock_file(path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        write_atomic(path, json.as_bytes()).map_err(ResumeError::IoError)?;

        info!(
            path = %path.display(),
            last_completed = ?self.checkpoint.last_completed_window_end(),
            windows_completed = self.checkpoint.windows_completed(),
            "Resume state saved"
        );
        Ok(())
    }

    /// Load state from `path` while holding the read lock.
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading resume state");

        let lock_file = open_lock_file(path)?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let state: ResumeState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize resume state");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if let Err(e) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Resume state schema version mismatch"
            );
            return Err(e);
        }

        debug!(
            job_id = state.checkpoint.job_id(),
            last_completed = ?state.checkpoint.last_completed_window_end(),
            "Resume state loaded"
        );
        Ok(state)
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, ResumeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("lock"))
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))
}

/// Replace `path` with `bytes` through a synced temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|e| format!("Failed to create directory: {e}"))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| format!("Failed to create temp file: {e}"))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| format!("Failed to write to temp file: {e}"))?;
    temp_file
        .flush()
        .map_err(|e| format!("Failed to flush temp file: {e}"))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| format!("Failed to sync temp file: {e}"))?;
    temp_file
        .persist(path)
        .map_err(|e| format!("Failed to persist temp file: {e}"))?;

    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Errors related to resume state
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// State file belongs to a different job
    #[error("checkpoint for '{found}' stored under job '{expected}'")]
    JobMismatch {
        /// Job the file was looked up for
        expected: String,
        /// Job recorded in the file
        found: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
