//! One JSON file per record
//!
//! Layout: `<data_dir>/<provider>/<entity>/<escaped natural key>.json`, with the
//! key escaped by [`encode_component`] so distinct keys never share a file.

use super::{RecordStore, StoreError, StoreResult, UpsertOutcome};
use crate::collector::job::encode_component;
use crate::resume::state::write_atomic;
use crate::{EntityType, Provider};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File-per-record store for one provider
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
    provider: Provider,
}

impl JsonDirStore {
    /// Store writing under `<data_dir>/<provider>/`.
    pub fn new(data_dir: impl AsRef<Path>, provider: Provider) -> Self {
        Self {
            root: data_dir.as_ref().join(provider.as_str()),
            provider,
        }
    }

    /// Provider directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `entity`.
    pub fn entity_dir(&self, entity: EntityType) -> PathBuf {
        self.root.join(entity.as_str())
    }

    /// File for the record of `entity` with natural key `key`.
    pub fn path_for(&self, entity: EntityType, key: &str) -> StoreResult<PathBuf> {
        let name = encode_component(key);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.entity_dir(entity).join(format!("{name}.json")))
    }
}

impl RecordStore for JsonDirStore {
    fn upsert(&mut self, entity: EntityType, key: &str, fields: &Value) -> StoreResult<UpsertOutcome> {
        let path = self.path_for(entity, key)?;
        let outcome = if path.exists() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };

        let json = serde_json::to_vec_pretty(fields)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        write_atomic(&path, &json).map_err(StoreError::IoError)?;

        debug!(
            provider = %self.provider,
            entity = %entity,
            key,
            outcome = ?outcome,
            "Record upserted"
        );
        Ok(outcome)
    }

    fn count(&self, entity: EntityType) -> StoreResult<u64> {
        let entries = match std::fs::read_dir(self.entity_dir(entity)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::IoError(e.to_string())),
        };

        let mut count = 0;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::IoError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
