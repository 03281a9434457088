//! Tests for StateManager

use super::*;
use chrono::Utc;
use std::collections::BTreeMap;
use tempfile::tempdir;

// ============================================================================
// Construction Tests
// ============================================================================

#[test]
fn test_state_manager_new() {
    let manager = StateManager::new("/tmp/test-state.json");
    assert!(!manager.is_in_memory());
    assert_eq!(manager.path().to_str().unwrap(), "/tmp/test-state.json");
}

#[test]
fn test_state_manager_in_memory() {
    let manager = StateManager::in_memory();
    assert!(manager.is_in_memory());
}

// ============================================================================
// Partition Tests
// ============================================================================

#[tokio::test]
async fn test_record_partitions() {
    let manager = StateManager::in_memory();
    assert!(manager.partition_watermarks(1).await.is_empty());

    let mut loaded = BTreeMap::new();
    loaded.insert("2024-01".to_string(), Some("2024-01-31 23:00:00".to_string()));
    loaded.insert("2024-02".to_string(), None);
    manager.record_partitions(1, &loaded, Utc::now()).await.unwrap();

    let marks = manager.partition_watermarks(1).await;
    assert_eq!(marks.len(), 1);
    assert_eq!(marks["2024-01"], "2024-01-31 23:00:00");

    let ds = manager.dataset(1).await;
    assert!(ds.get_partition("2024-02").unwrap().loaded_at.is_some());
}

#[tokio::test]
async fn test_full_refresh_marker() {
    let manager = StateManager::in_memory();
    assert!(manager.last_full_refresh(3).await.is_none());

    let now = Utc::now();
    manager.mark_full_refresh(3, now).await.unwrap();
    assert_eq!(manager.last_full_refresh(3).await, Some(now));

    manager.clear_dataset(3).await.unwrap();
    assert!(manager.last_full_refresh(3).await.is_none());
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_persists_across_instances() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    let manager = StateManager::new(&path);
    let mut loaded = BTreeMap::new();
    loaded.insert("2024-05-01".to_string(), Some("w1".to_string()));
    manager.record_partitions(8, &loaded, Utc::now()).await.unwrap();

    assert!(path.exists());
    // no temp files left next to the state file
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let reopened = StateManager::from_file(&path).unwrap();
    assert_eq!(
        reopened.partition_watermarks(8).await.get("2024-05-01"),
        Some(&"w1".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_all_succeed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("doc.json");

    let mut handles = Vec::new();
    for i in 0..64 {
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            write_json_atomic(&path, &serde_json::json!({ "writer": i })).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let doc: serde_json::Value = read_json_file(&path).unwrap().unwrap();
    assert!(doc["writer"].is_u64());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_from_missing_file_is_empty() {
    let dir = tempdir().unwrap();
    let manager = StateManager::from_file(dir.path().join("nope.json")).unwrap();
    assert!(manager.to_json_pretty().await.unwrap().contains("datasets"));
}

#[test]
fn test_from_corrupt_file_is_state_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{not json").unwrap();

    let err = StateManager::from_file(&path).unwrap_err();
    assert!(matches!(err, crate::error::Error::State { .. }));
}

#[tokio::test]
async fn test_clones_share_state() {
    let manager = StateManager::in_memory();
    let clone = manager.clone();
    manager.mark_full_refresh(1, Utc::now()).await.unwrap();
    assert!(clone.last_full_refresh(1).await.is_some());
}
