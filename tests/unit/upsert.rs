//! Upsert idempotence in both record stores

use repo_miner::store::{JsonDirStore, MemoryStore, RecordStore, UpsertOutcome};
use repo_miner::{EntityType, Provider};
use serde_json::json;
use tempfile::TempDir;

fn upsert_twice(store: &mut dyn RecordStore) {
    let keys = ["a1b2c3", "d4e5f6", "0a0b0c"];

    for key in keys {
        let outcome = store.upsert(EntityType::Commits, key, &json!({"sha": key, "run": 1})).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
    }
    let after_first = store.count(EntityType::Commits).unwrap();

    for key in keys {
        let outcome = store.upsert(EntityType::Commits, key, &json!({"sha": key, "run": 2})).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }
    store.flush().unwrap();

    assert_eq!(after_first, 3);
    assert_eq!(store.count(EntityType::Commits).unwrap(), after_first);
    assert_eq!(store.count(EntityType::Branches).unwrap(), 0);
}

#[test]
fn test_memory_store_is_idempotent() {
    let store = MemoryStore::new();
    upsert_twice(&mut store.clone());
    assert_eq!(store.get(EntityType::Commits, "d4e5f6").unwrap()["run"], 2);
}

#[test]
fn test_json_dir_store_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut store = JsonDirStore::new(dir.path(), Provider::GitHub);
    upsert_twice(&mut store);

    let path = store.path_for(EntityType::Commits, "a1b2c3").unwrap();
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(saved["run"], 2);
}

#[test]
fn test_json_dir_store_rejects_unaddressable_keys() {
    let dir = TempDir::new().unwrap();
    let mut store = JsonDirStore::new(dir.path(), Provider::Jira);
    assert!(store.upsert(EntityType::Issues, "..", &json!({})).is_err());
    assert!(store.upsert(EntityType::Issues, "", &json!({})).is_err());
}
