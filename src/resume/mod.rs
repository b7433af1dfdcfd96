//! Resume capability for collection jobs
//!
//! [`ProgressCheckpoint`] records the end of each fully persisted window and
//! answers where a re-triggered job should start. A crash mid-window leaves the
//! checkpoint untouched, so the whole window is redone on restart; the record
//! store's upserts make that safe.

pub mod checkpoint;
pub mod state;

pub use checkpoint::Checkpoint;
pub use state::{JobDescriptor, ResumeError, ResumeState};

use crate::collector::job::encode_component;
use crate::collector::{CollectionJob, FetchWindow};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Backend holding one checkpoint per job id
pub trait CheckpointStore: Send + Sync {
    /// Checkpoint for `job_id` and the job it was recorded for, if any.
    fn load_state(&self, job_id: &str) -> Result<Option<(JobDescriptor, Checkpoint)>, ResumeError>;

    /// Checkpoint for `job_id`, if one was recorded.
    fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, ResumeError> {
        Ok(self.load_state(job_id)?.map(|(_, checkpoint)| checkpoint))
    }

    /// Persist `checkpoint` for the job described by `job`.
    fn save(&self, job: &JobDescriptor, checkpoint: &Checkpoint) -> Result<(), ResumeError>;

    /// Delete the checkpoint for `job_id`; returns whether one existed.
    fn clear(&self, job_id: &str) -> Result<bool, ResumeError>;
}

/// One [`ResumeState`] file per job under `<state_dir>/checkpoints/`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `<state_dir>/checkpoints`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("checkpoints"),
        }
    }

    /// Directory holding the checkpoint files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `job_id`.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_component(job_id)))
    }

    /// Load every checkpoint file, failing on the first invalid one.
    ///
    /// Returns the number of valid files.
    pub fn verify_all(&self) -> Result<usize, ResumeError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        };

        let mut valid = 0;
        for entry in entries {
            let path = entry.map_err(|e| ResumeError::IoError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Err(e) = ResumeState::load(&path) {
                warn!(path = %path.display(), error = %e, "Invalid checkpoint file");
                return Err(e);
            }
            valid += 1;
        }

        info!(dir = %self.dir.display(), valid, "Checkpoint files verified");
        Ok(valid)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load_state(&self, job_id: &str) -> Result<Option<(JobDescriptor, Checkpoint)>, ResumeError> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let (job, checkpoint) = ResumeState::load(&path)?.into_parts();
        if checkpoint.job_id() != job_id {
            return Err(ResumeError::JobMismatch {
                expected: job_id.to_string(),
                found: checkpoint.job_id().to_string(),
            });
        }
        Ok(Some((job, checkpoint)))
    }

    fn save(&self, job: &JobDescriptor, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        ResumeState::new(job.clone(), checkpoint.clone()).save(&self.path_for(checkpoint.job_id()))
    }

    fn clear(&self, job_id: &str) -> Result<bool, ResumeError> {
        let path = self.path_for(job_id);
        let existed = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        };
        let _ = std::fs::remove_file(path.with_extension("lock"));
        Ok(existed)
    }
}

type MemoryEntries = HashMap<String, (JobDescriptor, Checkpoint)>;

/// In-memory checkpoints; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryEntries>>,
}

impl MemoryCheckpointStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> Result<std::sync::MutexGuard<'_, MemoryEntries>, ResumeError> {
        self.inner
            .lock()
            .map_err(|_| ResumeError::LockError("checkpoint map poisoned".to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load_state(&self, job_id: &str) -> Result<Option<(JobDescriptor, Checkpoint)>, ResumeError> {
        Ok(self.map()?.get(job_id).cloned())
    }

    fn save(&self, job: &JobDescriptor, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        self.map()?
            .insert(checkpoint.job_id().to_string(), (job.clone(), checkpoint.clone()));
        Ok(())
    }

    fn clear(&self, job_id: &str) -> Result<bool, ResumeError> {
        Ok(self.map()?.remove(job_id).is_some())
    }
}

/// Last-completed-window bookkeeping for jobs
#[derive(Clone)]
pub struct ProgressCheckpoint {
    store: Arc<dyn CheckpointStore>,
}

impl ProgressCheckpoint {
    /// Checkpoints kept in `store`.
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Checkpoints that live only as long as this process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCheckpointStore::new()))
    }

    /// Checkpoint files under `<state_dir>/checkpoints`.
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(Arc::new(FileCheckpointStore::new(state_dir)))
    }

    /// Mark `window` of `job` complete after all of its records were persisted.
    ///
    /// A window without an end date has no boundary to resume from and is not
    /// recorded.
    pub fn record(&self, job: &CollectionJob, window: &FetchWindow, records: u64) -> Result<(), ResumeError> {
        let Some(end) = window.end else {
            debug!(job_id = %job.id(), window = %window, "Open-ended window, no checkpoint recorded");
            return Ok(());
        };

        let job_id = job.id();
        let mut checkpoint = self
            .stored_for(job)?
            .unwrap_or_else(|| Checkpoint::new(job_id.clone()));
        checkpoint.advance(end, records);
        self.store.save(&JobDescriptor::from(job), &checkpoint)?;

        debug!(
            job_id = %job_id,
            window_end = %end,
            records,
            "Checkpoint recorded"
        );
        Ok(())
    }

    /// Day after the last completed window, or the job's configured start.
    pub fn resume_point(&self, job: &CollectionJob) -> Result<Option<NaiveDate>, ResumeError> {
        Ok(match self.stored_for(job)? {
            Some(checkpoint) => checkpoint.next_start().or(job.start_date),
            None => job.start_date,
        })
    }

    /// Stored checkpoint for `job`.
    pub fn last_completed(&self, job: &CollectionJob) -> Result<Option<Checkpoint>, ResumeError> {
        self.stored_for(job)
    }

    /// Checkpoint under `job`'s id, provided it was recorded for the same job.
    ///
    /// # Errors
    ///
    /// [`ResumeError::JobMismatch`] when the stored descriptor differs from `job`.
    fn stored_for(&self, job: &CollectionJob) -> Result<Option<Checkpoint>, ResumeError> {
        let Some((stored, checkpoint)) = self.store.load_state(&job.id())? else {
            return Ok(None);
        };
        let expected = JobDescriptor::from(job);
        if stored != expected {
            warn!(job_id = %job.id(), stored = %stored, "Checkpoint recorded for a different job");
            return Err(ResumeError::JobMismatch {
                expected: expected.to_string(),
                found: stored.to_string(),
            });
        }
        Ok(Some(checkpoint))
    }

    /// Checkpoint stored under `job_id`.
    pub fn load(&self, job_id: &str) -> Result<Option<Checkpoint>, ResumeError> {
        self.store.load(job_id)
    }

    /// Forget the checkpoint stored under `job_id`.
    pub fn clear(&self, job_id: &str) -> Result<bool, ResumeError> {
        let existed = self.store.clear(job_id)?;
        if existed {
            info!(job_id, "Checkpoint cleared");
        }
        Ok(existed)
    }
}

impl std::fmt::Debug for ProgressCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCheckpoint").finish_non_exhaustive()
    }
}
