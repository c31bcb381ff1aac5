//! Shared helpers for integration tests
//!
//! Every conformance test runs against both backends through `each_backend`.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;

use packstore::{BlobRef, BlobStore, FileStore, MetaIndex, PackedStore, StoreConfig};
use tempfile::TempDir;

// =============================================================================
// Store Setup
// =============================================================================

pub fn packed_config(dir: &TempDir) -> StoreConfig {
    StoreConfig::builder()
        .store_dir(dir.path())
        .in_memory_index()
        .sync_on_commit(false)
        .walk_batch_size(3)
        .build()
}

pub fn setup_temp_packed_store() -> (TempDir, PackedStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = PackedStore::open(packed_config(&temp_dir)).unwrap();
    (temp_dir, store)
}

pub fn setup_temp_file_store() -> (TempDir, FileStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path(), "sj1").unwrap();
    (temp_dir, store)
}

/// Packed store over a caller-held index, for tests that run maintenance passes
pub fn setup_temp_packed_store_with_index() -> (TempDir, PackedStore, Arc<MetaIndex>) {
    let temp_dir = TempDir::new().unwrap();
    let index = Arc::new(MetaIndex::open_in_memory().unwrap());
    let store = PackedStore::with_index(packed_config(&temp_dir), Arc::clone(&index)).unwrap();
    (temp_dir, store, index)
}

/// Run `check` once per backend, naming the backend on failure
pub fn each_backend(check: impl Fn(&dyn BlobStore)) {
    let (_packed_dir, packed) = setup_temp_packed_store();
    let (_file_dir, file) = setup_temp_file_store();

    let backends: [(&str, &dyn BlobStore); 2] = [("packed", &packed), ("file", &file)];
    for (name, store) in backends {
        eprintln!("backend: {name}");
        check(store);
    }
}

// =============================================================================
// Piece Helpers
// =============================================================================

pub fn blob(namespace: &str, key: &str) -> BlobRef {
    BlobRef::new(namespace, key)
}

pub fn put(store: &dyn BlobStore, blob: &BlobRef, data: &[u8]) {
    let mut writer = store.create(blob, Some(data.len() as u64)).unwrap();
    writer.write_all(data).unwrap();
    writer.commit().unwrap();
}

pub fn read_all(store: &dyn BlobStore, blob: &BlobRef) -> Vec<u8> {
    let mut reader = store.open(blob).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn walk_keys(store: &dyn BlobStore, namespace: &[u8]) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    store
        .walk_namespace(namespace, &mut |info| {
            keys.push(info.blob_ref.key.clone());
            Ok(())
        })
        .unwrap();
    keys
}
