//! Cross-instance locking tests
//!
//! Two store instances on the same file stand in for two processes:
//! the advisory lock on the sibling `.lock` file serializes their
//! write cycles, and each cycle re-reads the on-disk state before
//! mutating.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use nanostore::canonical::CanonicalFilter;
use nanostore::config::StoreConfig;
use nanostore::dimension::Dimension;
use nanostore::lock::{lock_path, StoreLock};
use nanostore::query::ListOptions;
use nanostore::store::{Store, UpdateRequest};
use nanostore::Error;

fn config() -> StoreConfig {
    StoreConfig {
        dimensions: vec![Dimension::enumerated("status", &["pending", "done"])
            .with_default("pending")
            .with_prefix("done", "d")],
        canonical: vec![CanonicalFilter::new("status", "pending")],
        ..StoreConfig::default()
    }
}

#[test]
fn test_two_instances_interleave_through_the_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let first = Store::open(&path, &config()).unwrap();
    let second = Store::open(&path, &config()).unwrap();

    let target = first.add("from first", BTreeMap::new()).unwrap();
    second.add("from second", BTreeMap::new()).unwrap();
    first
        .update(
            &target.to_string(),
            UpdateRequest::default().with_title("updated by first"),
        )
        .unwrap();

    // A third instance sees both mutations in the file.
    let third = Store::open(&path, &config()).unwrap();
    let docs = third.list(&ListOptions::default()).unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().any(|d| d.title == "updated by first"));
    assert!(docs.iter().any(|d| d.title == "from second"));
}

#[test]
fn test_writer_blocks_until_lock_released() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let store = Arc::new(Store::open(&path, &config()).unwrap());

    // Simulate another process holding the store's write lock.
    let held = StoreLock::exclusive(
        &lock_path(&path),
        Instant::now() + Duration::from_millis(100),
    )
    .unwrap();

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || store.add("queued", BTreeMap::new()).map(|_| ()))
    };
    std::thread::sleep(Duration::from_millis(150));
    drop(held);

    writer.join().unwrap().unwrap();
    assert_eq!(store.list(&ListOptions::default()).unwrap().len(), 1);
}

#[test]
fn test_lock_timeout_surfaces_as_lock_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");
    let mut config = config();
    config.lock_timeout_ms = Some(120);
    let store = Store::open(&path, &config).unwrap();

    let _held = StoreLock::exclusive(
        &lock_path(&path),
        Instant::now() + Duration::from_millis(100),
    )
    .unwrap();

    let result = store.add("blocked", BTreeMap::new());
    assert!(matches!(result, Err(Error::LockUnavailable(_))));
}

#[test]
fn test_concurrent_adders_all_land() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.json");

    let mut handles = Vec::new();
    for worker in 0..4 {
        let path = path.clone();
        handles.push(std::thread::spawn(move || {
            let store = Store::open(&path, &config()).unwrap();
            for i in 0..5 {
                store
                    .add(&format!("w{worker}-{i}"), BTreeMap::new())
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let store = Store::open(&path, &config()).unwrap();
    let docs = store.list(&ListOptions::default()).unwrap();
    assert_eq!(docs.len(), 20);
    // Positions are unique within the single shared partition.
    let mut positions: Vec<u64> = docs.iter().map(|d| d.position).collect();
    positions.sort_unstable();
    positions.dedup();
    assert_eq!(positions.len(), 20);
}
