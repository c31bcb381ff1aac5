//! Tests for compaction and orphan collection
//!
//! These tests verify:
//! - Compaction packs live pieces densely and preserves content
//! - Source files survive compaction; readers opened earlier keep working
//! - Collection reclaims only files no piece references
//! - Collection is idempotent

#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::io::Read;
use std::sync::Arc;

use common::{blob, payload, put, read_all, setup_temp_packed_store_with_index};
use packstore::maintenance::{Collector, Compactor};
use packstore::{BlobStore, StoreError};

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compact_two_pieces() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    let first = payload(4000, 1);
    let second = payload(5000, 2);
    put(&store, &blob("ns", "key1"), &first);
    put(&store, &blob("ns", "key2"), &second);

    let report = Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed.dat")
        .unwrap();
    assert_eq!(report.pieces_moved, 2);
    assert_eq!(report.bytes_copied, 9000);

    assert_eq!(read_all(&store, &blob("ns", "key1")), first);
    assert_eq!(read_all(&store, &blob("ns", "key2")), second);
    assert_eq!(fs::metadata(dir.path().join("packed.dat")).unwrap().len(), 9000);

    let a = index.locate(&blob("ns", "key1")).unwrap().extent;
    let b = index.locate(&blob("ns", "key2")).unwrap().extent;
    assert_eq!(a.file, "packed.dat");
    assert_eq!(b.file, "packed.dat");
    assert!(a.end() <= b.start || b.end() <= a.start);
}

#[test]
fn test_compact_orders_by_namespace_then_key() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("b", "k1"), b"333");
    put(&store, &blob("a", "k2"), b"22");
    put(&store, &blob("a", "k1"), b"1");

    Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();

    assert_eq!(fs::read(dir.path().join("packed")).unwrap(), b"122333");
    assert_eq!(index.locate(&blob("a", "k1")).unwrap().extent.start, 0);
    assert_eq!(index.locate(&blob("a", "k2")).unwrap().extent.start, 1);
    assert_eq!(index.locate(&blob("b", "k1")).unwrap().extent.start, 3);
}

#[test]
fn test_compact_keeps_source_files() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "k"), b"data");
    let source = index.locate(&blob("ns", "k")).unwrap().extent.file;

    Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();

    assert_eq!(fs::read(dir.path().join(&source)).unwrap(), b"data");
    let usage = index.extent_usage().unwrap();
    assert_eq!(usage.orphaned_extents, 1);
    assert_eq!(usage.orphaned_bytes, 4);
}

#[test]
fn test_reader_opened_before_compaction_keeps_reading() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    let data = payload(2048, 9);
    put(&store, &blob("ns", "k"), &data);

    let mut early = store.open(&blob("ns", "k")).unwrap();
    Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();

    let mut out = Vec::new();
    early.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
    assert_eq!(read_all(&store, &blob("ns", "k")), data);
}

#[test]
fn test_compact_skips_trashed_pieces() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "live"), b"live");
    put(&store, &blob("ns", "trashed"), b"trashed");
    store.trash(&blob("ns", "trashed")).unwrap();

    let report = Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();
    assert_eq!(report.pieces_moved, 1);
    assert_eq!(fs::read(dir.path().join("packed")).unwrap(), b"live");

    store.restore_trash(b"ns").unwrap();
    assert_eq!(read_all(&store, &blob("ns", "trashed")), b"trashed");
}

#[test]
fn test_compact_twice_into_new_files() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), b"aaaa");
    put(&store, &blob("ns", "b"), b"bb");

    let compactor = Compactor::new(dir.path(), Arc::clone(&index));
    compactor.run("gen1").unwrap();
    compactor.run("gen2").unwrap();

    assert_eq!(fs::read(dir.path().join("gen2")).unwrap(), b"aaaabb");
    assert_eq!(index.locate(&blob("ns", "b")).unwrap().extent.file, "gen2");
    assert_eq!(read_all(&store, &blob("ns", "a")), b"aaaa");
}

#[test]
fn test_interrupted_compaction_resumes_cleanly() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), b"aaaa");
    put(&store, &blob("ns", "b"), b"bbbbbb");
    let sources: Vec<String> = ["a", "b"]
        .iter()
        .map(|k| index.locate(&blob("ns", k)).unwrap().extent.file)
        .collect();

    // A pass into gen1 copied both pieces but stopped after the first flip
    fs::write(dir.path().join("gen1"), b"aaaabbbbbb").unwrap();
    let old = index.locate(&blob("ns", "a")).unwrap().extent;
    assert!(index.relocate(&blob("ns", "a"), old.id, "gen1", 0, 4).unwrap());
    assert_eq!(read_all(&store, &blob("ns", "a")), b"aaaa");

    let report = Compactor::new(dir.path(), Arc::clone(&index))
        .run("gen2")
        .unwrap();
    assert_eq!(report.pieces_moved, 2);

    let cleaned = Collector::new(dir.path(), Arc::clone(&index)).run().unwrap();
    assert_eq!(cleaned.files_removed, 3);
    assert_eq!(cleaned.extents_removed, 3);
    assert_eq!(cleaned.bytes_reclaimed, 4 + 6 + 10);

    assert!(!dir.path().join("gen1").exists());
    for source in &sources {
        assert!(!dir.path().join(source).exists());
    }
    assert_eq!(fs::read(dir.path().join("gen2")).unwrap(), b"aaaabbbbbb");
    assert_eq!(read_all(&store, &blob("ns", "a")), b"aaaa");
    assert_eq!(read_all(&store, &blob("ns", "b")), b"bbbbbb");

    let usage = index.extent_usage().unwrap();
    assert_eq!(usage.files, 1);
    assert_eq!(usage.orphaned_extents, 0);
}

#[test]
fn test_compact_refuses_indexed_name() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), b"a");

    let compactor = Compactor::new(dir.path(), Arc::clone(&index));
    compactor.run("packed").unwrap();
    fs::remove_file(dir.path().join("packed")).unwrap_or(());

    // Still named by extents even though the file is gone
    let err = compactor.run("packed").unwrap_err();
    assert!(matches!(err, StoreError::FileExists(_)));
}

#[test]
fn test_compact_rejects_escaping_name() {
    let (dir, _store, index) = setup_temp_packed_store_with_index();
    let err = Compactor::new(dir.path(), index)
        .run("../outside")
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidPath(_)));
}

// =============================================================================
// Collection Tests
// =============================================================================

#[test]
fn test_clean_after_compaction_reclaims_sources() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), &payload(100, 1));
    put(&store, &blob("ns", "b"), &payload(200, 2));
    let sources: Vec<String> = ["a", "b"]
        .iter()
        .map(|k| index.locate(&blob("ns", k)).unwrap().extent.file)
        .collect();

    Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();
    let report = Collector::new(dir.path(), Arc::clone(&index)).run().unwrap();

    assert_eq!(report.files_removed, 2);
    assert_eq!(report.extents_removed, 2);
    assert_eq!(report.bytes_reclaimed, 300);
    for source in &sources {
        assert!(!dir.path().join(source).exists());
    }
    assert!(dir.path().join("packed").exists());
    assert_eq!(read_all(&store, &blob("ns", "a")), payload(100, 1));
    assert_eq!(read_all(&store, &blob("ns", "b")), payload(200, 2));

    let usage = index.extent_usage().unwrap();
    assert_eq!(usage.orphaned_extents, 0);
    assert_eq!(usage.files, 1);
}

#[test]
fn test_clean_is_idempotent() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), b"a");
    store.delete(&blob("ns", "a")).unwrap();

    let collector = Collector::new(dir.path(), Arc::clone(&index));
    let first = collector.run().unwrap();
    assert_eq!(first.files_removed, 1);

    let second = collector.run().unwrap();
    assert_eq!(second.files_removed, 0);
    assert_eq!(second.extents_removed, 0);
}

#[test]
fn test_clean_keeps_partially_live_packed_file() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "a"), b"aaa");
    put(&store, &blob("ns", "b"), b"bbb");
    Compactor::new(dir.path(), Arc::clone(&index))
        .run("packed")
        .unwrap();
    Collector::new(dir.path(), Arc::clone(&index)).run().unwrap();

    // One piece of the packed file goes away; the file still backs the other
    store.delete(&blob("ns", "a")).unwrap();
    let report = Collector::new(dir.path(), Arc::clone(&index)).run().unwrap();

    assert_eq!(report.files_removed, 0);
    assert!(dir.path().join("packed").exists());
    assert_eq!(read_all(&store, &blob("ns", "b")), b"bbb");
}

#[test]
fn test_clean_after_emptied_trash() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "k"), b"data");
    let file = index.locate(&blob("ns", "k")).unwrap().extent.file;
    store.trash(&blob("ns", "k")).unwrap();

    let collector = Collector::new(dir.path(), Arc::clone(&index));
    assert_eq!(collector.run().unwrap().files_removed, 0);

    store
        .empty_trash(b"ns", chrono::Utc::now() + chrono::Duration::seconds(1))
        .unwrap();
    assert_eq!(collector.run().unwrap().files_removed, 1);
    assert!(!dir.path().join(file).exists());
}

#[test]
fn test_writer_after_clean_reuses_stable_name() {
    let (dir, store, index) = setup_temp_packed_store_with_index();
    put(&store, &blob("ns", "k"), b"old");
    let old_file = index.locate(&blob("ns", "k")).unwrap().extent.file;
    store.delete(&blob("ns", "k")).unwrap();
    Collector::new(dir.path(), Arc::clone(&index)).run().unwrap();

    put(&store, &blob("ns", "k"), b"new");
    assert_eq!(index.locate(&blob("ns", "k")).unwrap().extent.file, old_file);
    assert_eq!(read_all(&store, &blob("ns", "k")), b"new");
}
