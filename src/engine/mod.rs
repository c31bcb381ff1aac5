//! Engine Module
//!
//! The packed blob store: pieces live in shared physical files, located
//! through the metadata index.
//!
//! ## Responsibilities
//! - Allocate a fresh file per written piece (`PieceWriter`)
//! - Resolve pieces to extents and serve bounded reads (`ExtentReader`)
//! - Trash, restore, delete and account for pieces through the index
//!
//! Nothing here reclaims file bytes; that is the job of the maintenance
//! passes.

mod reader;
mod writer;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::blob::{BlobInfo, BlobReader, BlobRef, BlobStore, BlobWriter, EmptiedTrash};
use crate::config::StoreConfig;
use crate::error::Result;
use crate::index::MetaIndex;

pub use reader::ExtentReader;
pub use writer::PieceWriter;
pub(crate) use writer::WriteCursor;

/// Packed blob store
///
/// ## Concurrency
/// All methods take `&self`. The index serializes its own statements; files
/// are never shared between writers, so writers to different keys proceed
/// independently. Any number of readers may be open at once.
pub struct PackedStore {
    config: StoreConfig,

    /// Shared with maintenance passes over the same store
    index: Arc<MetaIndex>,
}

impl PackedStore {
    /// Open a store and its index as described by `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(MetaIndex::open(&config)?);
        Self::with_index(config, index)
    }

    /// Open a store over an index the caller already holds
    pub fn with_index(config: StoreConfig, index: Arc<MetaIndex>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.store_dir)?;
        tracing::debug!(store_dir = %config.store_dir.display(), "opened packed store");
        Ok(Self { config, index })
    }

    /// Release the store. The index is closed if this was its last holder.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.index) {
            Ok(index) => index.close(),
            Err(_) => Ok(()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn index(&self) -> &Arc<MetaIndex> {
        &self.index
    }

    pub fn store_dir(&self) -> &Path {
        &self.config.store_dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl BlobStore for PackedStore {
    fn create(&self, blob: &BlobRef, size_hint: Option<u64>) -> Result<Box<dyn BlobWriter>> {
        let writer = PieceWriter::create(
            Arc::clone(&self.index),
            &self.config.store_dir,
            &self.config.file_extension,
            blob,
            self.config.sync_on_commit,
        )?;
        tracing::debug!(blob = %blob, file = %writer.file_name(), ?size_hint, "create");
        Ok(Box::new(writer))
    }

    fn open(&self, blob: &BlobRef) -> Result<Box<dyn BlobReader>> {
        let piece = self.index.locate(blob)?;
        let reader = ExtentReader::open(&self.config.store_dir, &piece.extent, piece.size)?;

        if let Err(e) = self.index.record_access(blob) {
            tracing::warn!(blob = %blob, error = %e, "failed to record access");
        }
        Ok(Box::new(reader))
    }

    fn delete(&self, blob: &BlobRef) -> Result<()> {
        let existed = self.index.delete(blob)?;
        tracing::debug!(blob = %blob, existed, "delete");
        Ok(())
    }

    fn delete_namespace(&self, namespace: &[u8]) -> Result<()> {
        let removed = self.index.delete_namespace(namespace)?;
        tracing::debug!(removed, "delete namespace");
        Ok(())
    }

    fn trash(&self, blob: &BlobRef) -> Result<()> {
        self.index.trash(blob, Utc::now())?;
        tracing::debug!(blob = %blob, "trash");
        Ok(())
    }

    fn restore_trash(&self, namespace: &[u8]) -> Result<Vec<Vec<u8>>> {
        let keys = self.index.restore_trash(namespace)?;
        tracing::debug!(restored = keys.len(), "restore trash");
        Ok(keys)
    }

    fn empty_trash(
        &self,
        namespace: &[u8],
        trashed_before: DateTime<Utc>,
    ) -> Result<EmptiedTrash> {
        let emptied = self.index.empty_trash(namespace, trashed_before)?;
        tracing::debug!(count = emptied.count, bytes = emptied.bytes, "empty trash");
        Ok(emptied)
    }

    fn stat(&self, blob: &BlobRef) -> Result<BlobInfo> {
        self.index.stat(blob)
    }

    fn walk_namespace(
        &self,
        namespace: &[u8],
        f: &mut dyn FnMut(&BlobInfo) -> Result<()>,
    ) -> Result<()> {
        for info in self.index.walk_namespace(namespace) {
            f(&info?)?;
        }
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<Vec<u8>>> {
        self.index.list_namespaces()
    }

    fn space_used_for_blobs(&self) -> Result<u64> {
        self.index.live_bytes(None)
    }

    fn space_used_for_blobs_in_namespace(&self, namespace: &[u8]) -> Result<u64> {
        self.index.live_bytes(Some(namespace))
    }

    fn space_used_for_trash(&self) -> Result<u64> {
        self.index.trashed_bytes()
    }
}
