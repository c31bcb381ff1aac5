//! Concurrency tests for the packed engine
//!
//! These tests verify:
//! - Writers to different keys proceed independently
//! - Racing commits for one key produce exactly one winner
//! - Many readers share one store
//! - A file-backed index works across store handles

#[path = "../common/mod.rs"]
mod common;

use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{blob, payload, put, read_all, setup_temp_packed_store};
use packstore::{BlobStore, PackedStore, StoreConfig, StoreError};
use tempfile::TempDir;

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_concurrent_writers_different_keys() {
    let (_dir, store) = setup_temp_packed_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25u8 {
                    let key = format!("t{t}-{i}");
                    put(store.as_ref(), &blob("ns", &key), &payload(64, t ^ i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.index().count_pieces().unwrap(), 200);
    for t in 0..8u8 {
        for i in 0..25u8 {
            let key = format!("t{t}-{i}");
            assert_eq!(read_all(store.as_ref(), &blob("ns", &key)), payload(64, t ^ i));
        }
    }
}

#[test]
fn test_racing_commits_one_winner() {
    let (_dir, store) = setup_temp_packed_store();
    let store = Arc::new(store);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut writer = store.create(&blob("ns", "contended"), None).unwrap();
                writer.write_all(&[t; 16]).unwrap();
                barrier.wait();
                writer.commit()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::AlreadyExists(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 3);

    let data = read_all(store.as_ref(), &blob("ns", "contended"));
    assert_eq!(data.len(), 16);
    assert!(data.iter().all(|&b| b == data[0]));
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_concurrent_readers() {
    let (_dir, store) = setup_temp_packed_store();
    let data = payload(10_000, 5);
    put(&store, &blob("ns", "shared"), &data);
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let data = data.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(read_all(store.as_ref(), &blob("ns", "shared")), data);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// File-Backed Index Tests
// =============================================================================

#[test]
fn test_file_index_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = StoreConfig::builder()
        .store_dir(temp_dir.path().join("store"))
        .index_path(temp_dir.path().join("index.db"))
        .build();

    {
        let store = PackedStore::open(config.clone()).unwrap();
        put(&store, &blob("ns", "persisted"), b"still here");
        store.trash(&blob("ns", "persisted")).unwrap();
        store.close().unwrap();
    }

    let store = PackedStore::open(config).unwrap();
    assert!(store.open(&blob("ns", "persisted")).unwrap_err().is_not_found());
    assert_eq!(store.restore_trash(b"ns").unwrap().len(), 1);
    assert_eq!(read_all(&store, &blob("ns", "persisted")), b"still here");
}
