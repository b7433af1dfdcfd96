//! In-memory record store

use super::{RecordStore, StoreError, StoreResult, UpsertOutcome};
use crate::EntityType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Records = BTreeMap<(EntityType, String), Value>;

/// Records kept in a `BTreeMap`; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> StoreResult<MutexGuard<'_, Records>> {
        self.records
            .lock()
            .map_err(|_| StoreError::IoError("record map poisoned".to_string()))
    }

    /// Stored record for `key`.
    pub fn get(&self, entity: EntityType, key: &str) -> Option<Value> {
        self.records()
            .ok()?
            .get(&(entity, key.to_string()))
            .cloned()
    }

    /// Natural keys stored for `entity`, in key order.
    pub fn keys(&self, entity: EntityType) -> Vec<String> {
        self.records()
            .map(|records| {
                records
                    .keys()
                    .filter(|(e, _)| *e == entity)
                    .map(|(_, k)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total records across all entities.
    pub fn len(&self) -> usize {
        self.records().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&mut self, entity: EntityType, key: &str, fields: &Value) -> StoreResult<UpsertOutcome> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let previous = self.records()?.insert((entity, key.to_string()), fields.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        })
    }

    fn count(&self, entity: EntityType) -> StoreResult<u64> {
        Ok(self.records()?.keys().filter(|(e, _)| *e == entity).count() as u64)
    }
}
