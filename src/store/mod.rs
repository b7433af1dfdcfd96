//! Record persistence collaborators
//!
//! Every collected item is handed to a [`RecordStore`] keyed by its natural
//! key. Upserting the same key twice replaces the record, which is what makes
//! redoing an interrupted window safe.

use crate::EntityType;
use serde_json::Value;

pub mod json_dir;
pub mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

/// Record store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Key that cannot address a record
    #[error("invalid natural key: {0:?}")]
    InvalidKey(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed for the key
    Created,
    /// An existing record was replaced
    Updated,
}

/// Upsert-by-natural-key persistence
pub trait RecordStore: Send {
    /// Insert or replace the record of `entity` identified by `key`.
    fn upsert(&mut self, entity: EntityType, key: &str, fields: &Value) -> StoreResult<UpsertOutcome>;

    /// Number of distinct records stored for `entity`.
    fn count(&self, entity: EntityType) -> StoreResult<u64>;

    /// Flush buffered writes.
    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }
}
