//! Tests for bootstrapping a packed store from a legacy tree
//!
//! These tests verify:
//! - Every legacy file becomes a readable piece with the same bytes
//! - Trash and temp content of the legacy store is not indexed
//! - A reindexed store can be compacted and cleaned like any other

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{blob, payload, put, read_all, setup_temp_file_store, walk_keys};
use packstore::maintenance::{Collector, Compactor, Reindexer};
use packstore::{BlobStore, MetaIndex, PackedStore, StoreConfig, StoreError};

// =============================================================================
// Helper Functions
// =============================================================================

/// Packed store over the legacy store's blob directory
fn reindexed(legacy: &packstore::FileStore) -> (PackedStore, Arc<MetaIndex>) {
    let index = Arc::new(MetaIndex::open_in_memory().unwrap());
    let report = Reindexer::new(legacy.blobs_dir(), "sj1", Arc::clone(&index))
        .run()
        .unwrap();
    assert_eq!(report.files_skipped, 0);

    let config = StoreConfig::builder()
        .store_dir(legacy.blobs_dir())
        .in_memory_index()
        .build();
    let store = PackedStore::with_index(config, Arc::clone(&index)).unwrap();
    (store, index)
}

// =============================================================================
// Reindex Tests
// =============================================================================

#[test]
fn test_reindex_preserves_content() {
    let (_dir, legacy) = setup_temp_file_store();
    put(&legacy, &blob("ns", "key1"), b"1234567890");
    put(&legacy, &blob("ns", "key2"), &payload(5000, 4));
    put(&legacy, &blob("other", "key3"), b"");

    let (store, index) = reindexed(&legacy);

    assert_eq!(index.count_pieces().unwrap(), 3);
    assert_eq!(read_all(&store, &blob("ns", "key1")), b"1234567890");
    assert_eq!(read_all(&store, &blob("ns", "key2")), payload(5000, 4));
    assert_eq!(read_all(&store, &blob("other", "key3")), b"");
    assert_eq!(
        walk_keys(&store, b"ns"),
        vec![b"key1".to_vec(), b"key2".to_vec()]
    );
    assert_eq!(store.space_used_for_blobs().unwrap(), 5010);
}

#[test]
fn test_reindex_ignores_legacy_trash() {
    let (_dir, legacy) = setup_temp_file_store();
    put(&legacy, &blob("ns", "live"), b"live");
    put(&legacy, &blob("ns", "trashed"), b"trashed");
    legacy.trash(&blob("ns", "trashed")).unwrap();

    let (store, _index) = reindexed(&legacy);

    assert_eq!(read_all(&store, &blob("ns", "live")), b"live");
    assert!(store.open(&blob("ns", "trashed")).unwrap_err().is_not_found());
}

#[test]
fn test_reindex_twice_is_refused() {
    let (_dir, legacy) = setup_temp_file_store();
    put(&legacy, &blob("ns", "k"), b"data");
    let (_store, index) = reindexed(&legacy);

    let err = Reindexer::new(legacy.blobs_dir(), "sj1", Arc::clone(&index))
        .run()
        .unwrap_err();
    assert!(matches!(err, StoreError::IndexNotEmpty));
    assert_eq!(index.count_pieces().unwrap(), 1);
}

#[test]
fn test_reindexed_store_accepts_new_writes() {
    let (_dir, legacy) = setup_temp_file_store();
    put(&legacy, &blob("ns", "old"), b"old");
    let (store, _index) = reindexed(&legacy);

    put(&store, &blob("ns", "new"), b"new");
    assert_eq!(read_all(&store, &blob("ns", "new")), b"new");

    let mut writer = store.create(&blob("ns", "old"), None).unwrap();
    std::io::Write::write_all(&mut writer, b"dup").unwrap();
    assert!(matches!(writer.commit(), Err(StoreError::AlreadyExists(_))));
}

#[test]
fn test_reindex_compact_clean_pipeline() {
    let (_dir, legacy) = setup_temp_file_store();
    for i in 0..20u8 {
        let key = format!("key{i:02}");
        put(&legacy, &blob("ns", &key), &payload(100 + usize::from(i), i));
    }
    let (store, index) = reindexed(&legacy);

    let compacted = Compactor::new(legacy.blobs_dir(), Arc::clone(&index))
        .run("packed-0001")
        .unwrap();
    assert_eq!(compacted.pieces_moved, 20);

    let cleaned = Collector::new(legacy.blobs_dir(), Arc::clone(&index))
        .run()
        .unwrap();
    assert_eq!(cleaned.files_removed, 20);

    for i in 0..20u8 {
        let key = format!("key{i:02}");
        assert_eq!(
            read_all(&store, &blob("ns", &key)),
            payload(100 + usize::from(i), i)
        );
    }
    let usage = index.extent_usage().unwrap();
    assert_eq!(usage.files, 1);
    assert_eq!(usage.orphaned_extents, 0);
}
