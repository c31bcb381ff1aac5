//! One-file-per-piece store
//!
//! The layout packed stores are bootstrapped from, and the baseline the
//! packed engine is checked against.
//!
//! ```text
//!   {root}/
//!     ├── blobs/{ns}/{key[..2]}/{key[2..]}.sj1
//!     ├── trash/{ns}/{key[..2]}/{key[2..]}.sj1   (mtime = time trashed)
//!     └── temp/                                 (writers stage here)
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::blob::{path, BlobInfo, BlobReader, BlobRef, BlobStore, BlobWriter, EmptiedTrash};
use crate::engine::{ExtentReader, WriteCursor};
use crate::error::{Result, StoreError};

/// Legacy blob store rooted at a directory
pub struct FileStore {
    root: PathBuf,
    file_extension: String,

    /// Makes staging names unique within this process
    next_temp: AtomicU64,
}

impl FileStore {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const BLOBS_DIR: &'static str = "blobs";
    const TRASH_DIR: &'static str = "trash";
    const TEMP_DIR: &'static str = "temp";

    /// Open (or create) a store at `root`
    pub fn open(root: impl Into<PathBuf>, file_extension: impl Into<String>) -> Result<Self> {
        let root = root.into();
        for dir in [Self::BLOBS_DIR, Self::TRASH_DIR, Self::TEMP_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            file_extension: file_extension.into(),
            next_temp: AtomicU64::new(0),
        })
    }

    /// Directory holding live pieces; a packed store can be reindexed from it
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(Self::BLOBS_DIR)
    }

    fn trash_dir(&self) -> PathBuf {
        self.root.join(Self::TRASH_DIR)
    }

    fn blob_path(&self, blob: &BlobRef) -> PathBuf {
        self.blobs_dir()
            .join(path::legacy_relative_path(blob, &self.file_extension))
    }

    fn trash_path(&self, blob: &BlobRef) -> PathBuf {
        self.trash_dir()
            .join(path::legacy_relative_path(blob, &self.file_extension))
    }

    fn temp_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let seq = self.next_temp.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(Self::TEMP_DIR)
            .join(format!("{}-{nanos}-{seq}.partial", std::process::id()))
    }

    /// Every piece file under `{base}/{ns}`, decoded, sorted by key
    fn scan_namespace(&self, base: &Path, namespace: &[u8]) -> Result<Vec<(BlobRef, PathBuf)>> {
        let ns_dir = base.join(path::encode_component(namespace));
        if !ns_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&ns_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(base)
                .map_err(|_| StoreError::InvalidPath(entry.path().display().to_string()))?;
            match path::parse_legacy_path(relative, &self.file_extension) {
                Ok(blob) => found.push((blob, entry.into_path())),
                Err(e) => tracing::warn!(error = %e, "skipping unrecognized file"),
            }
        }
        found.sort();
        Ok(found)
    }

    /// Namespaces under `base` that still hold at least one file
    fn namespaces_in(&self, base: &Path) -> Result<Vec<Vec<u8>>> {
        let mut namespaces = Vec::new();
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let has_files = WalkDir::new(entry.path())
                .into_iter()
                .filter_map(|e| e.ok())
                .any(|e| e.file_type().is_file());
            if !has_files {
                continue;
            }
            let name = entry.file_name();
            if let Some(ns) = name.to_str().and_then(|s| path::decode_component(s).ok()) {
                namespaces.push(ns);
            }
        }
        Ok(namespaces)
    }

    fn total_size(&self, base: &Path) -> Result<u64> {
        let mut total = 0;
        for entry in WalkDir::new(base) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                total += entry.metadata().map_err(io::Error::from)?.len();
            }
        }
        Ok(total)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn rename_into(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)
}

impl BlobStore for FileStore {
    fn create(&self, blob: &BlobRef, size_hint: Option<u64>) -> Result<Box<dyn BlobWriter>> {
        let final_path = self.blob_path(blob);
        let temp_path = self.temp_path();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        tracing::debug!(blob = %blob, ?size_hint, "create");

        Ok(Box::new(FileWriter {
            blob: blob.clone(),
            temp_path,
            final_path,
            cursor: Some(WriteCursor::new(file)),
            committed_size: None,
        }))
    }

    fn open(&self, blob: &BlobRef) -> Result<Box<dyn BlobReader>> {
        let file = match File::open(self.blob_path(blob)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(blob.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok(Box::new(ExtentReader::from_file(file, 0, size)))
    }

    fn delete(&self, blob: &BlobRef) -> Result<()> {
        remove_if_exists(&self.blob_path(blob))?;
        remove_if_exists(&self.trash_path(blob))
    }

    fn delete_namespace(&self, namespace: &[u8]) -> Result<()> {
        let ns = path::encode_component(namespace);
        remove_dir_if_exists(&self.blobs_dir().join(&ns))?;
        remove_dir_if_exists(&self.trash_dir().join(&ns))
    }

    fn trash(&self, blob: &BlobRef) -> Result<()> {
        let live = self.blob_path(blob);
        let trashed = self.trash_path(blob);

        match rename_into(&live, &trashed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if trashed.is_file() {
                    return Ok(());
                }
                return Err(StoreError::NotFound(blob.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        // The trash time is kept as the file's mtime
        OpenOptions::new()
            .write(true)
            .open(&trashed)?
            .set_modified(SystemTime::now())?;
        Ok(())
    }

    fn restore_trash(&self, namespace: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut restored = Vec::new();
        for (blob, trashed) in self.scan_namespace(&self.trash_dir(), namespace)? {
            rename_into(&trashed, &self.blob_path(&blob))?;
            restored.push(blob.key);
        }
        Ok(restored)
    }

    fn empty_trash(
        &self,
        namespace: &[u8],
        trashed_before: DateTime<Utc>,
    ) -> Result<EmptiedTrash> {
        let mut emptied = EmptiedTrash::default();
        for (blob, trashed) in self.scan_namespace(&self.trash_dir(), namespace)? {
            let metadata = fs::metadata(&trashed)?;
            let trashed_at: DateTime<Utc> = metadata.modified()?.into();
            if trashed_at >= trashed_before {
                continue;
            }
            remove_if_exists(&trashed)?;
            emptied.count += 1;
            emptied.bytes += metadata.len();
            emptied.keys.push(blob.key);
        }
        Ok(emptied)
    }

    fn stat(&self, blob: &BlobRef) -> Result<BlobInfo> {
        let metadata = match fs::metadata(self.blob_path(blob)) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(blob.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(BlobInfo {
            blob_ref: blob.clone(),
            size: metadata.len(),
            modified: metadata.modified()?.into(),
        })
    }

    fn walk_namespace(
        &self,
        namespace: &[u8],
        f: &mut dyn FnMut(&BlobInfo) -> Result<()>,
    ) -> Result<()> {
        for (blob, live) in self.scan_namespace(&self.blobs_dir(), namespace)? {
            let metadata = match fs::metadata(&live) {
                Ok(metadata) => metadata,
                // Trashed or deleted since the scan
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            f(&BlobInfo {
                blob_ref: blob,
                size: metadata.len(),
                modified: metadata.modified()?.into(),
            })?;
        }
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<Vec<u8>>> {
        let mut namespaces = self.namespaces_in(&self.blobs_dir())?;
        namespaces.extend(self.namespaces_in(&self.trash_dir())?);
        namespaces.sort();
        namespaces.dedup();
        Ok(namespaces)
    }

    fn space_used_for_blobs(&self) -> Result<u64> {
        self.total_size(&self.blobs_dir())
    }

    fn space_used_for_blobs_in_namespace(&self, namespace: &[u8]) -> Result<u64> {
        let ns_dir = self.blobs_dir().join(path::encode_component(namespace));
        if !ns_dir.is_dir() {
            return Ok(0);
        }
        self.total_size(&ns_dir)
    }

    fn space_used_for_trash(&self) -> Result<u64> {
        self.total_size(&self.trash_dir())
    }
}

/// Writer staging into `temp/`, published with a no-clobber hard link
struct FileWriter {
    blob: BlobRef,
    temp_path: PathBuf,
    final_path: PathBuf,
    cursor: Option<WriteCursor>,
    committed_size: Option<u64>,
}

impl FileWriter {
    fn cursor_mut(&mut self) -> io::Result<&mut WriteCursor> {
        self.cursor
            .as_mut()
            .ok_or_else(|| io::Error::other("writer is no longer open"))
    }

    fn publish(&self, size: u64) -> Result<()> {
        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::hard_link(&self.temp_path, &self.final_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(self.blob.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(blob = %self.blob, size, "committed piece");
        Ok(())
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.cursor_mut()?.flush()
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor_mut()?.seek(pos)
    }
}

impl BlobWriter for FileWriter {
    fn size(&self) -> u64 {
        match (&self.cursor, self.committed_size) {
            (Some(cursor), _) => cursor.size(),
            (None, Some(size)) => size,
            (None, None) => 0,
        }
    }

    fn commit(&mut self) -> Result<()> {
        if self.committed_size.is_some() {
            return Err(StoreError::AlreadyCommitted);
        }
        let cursor = self
            .cursor
            .take()
            .ok_or_else(|| StoreError::Unsupported("commit after cancel".to_string()))?;

        let published = cursor
            .finish(true)
            .map_err(StoreError::from)
            .and_then(|size| self.publish(size).map(|()| size));
        remove_if_exists(&self.temp_path)?;

        self.committed_size = Some(published?);
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            remove_if_exists(&self.temp_path)?;
        }
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.cancel() {
            tracing::warn!(blob = %self.blob, error = %e, "failed to discard staged piece");
        }
    }
}
