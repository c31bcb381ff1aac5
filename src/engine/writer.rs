//! Piece Writer
//!
//! Streams a fresh piece into its own file. The piece becomes visible only
//! when `commit` records the file as one extent plus one piece row.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blob::{path, BlobRef, BlobWriter};
use crate::error::{Result, StoreError};
use crate::index::MetaIndex;

/// Buffered random-access file cursor that tracks the high-water mark.
///
/// Bytes skipped by seeking past the end and then writing are zero-filled by
/// the filesystem. Seeking alone never changes the size.
pub(crate) struct WriteCursor {
    file: BufWriter<File>,

    /// Current logical position
    pos: u64,

    /// Largest offset written so far
    high_water: u64,
}

impl WriteCursor {
    pub(crate) fn new(file: File) -> Self {
        Self {
            file: BufWriter::new(file),
            pos: 0,
            high_water: 0,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.high_water
    }

    /// Flush buffered bytes, optionally fsync, and release the handle
    pub(crate) fn finish(self, sync: bool) -> io::Result<u64> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_all()?;
        }
        Ok(self.high_water)
    }
}

impl Write for WriteCursor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.pos += n as u64;
        self.high_water = self.high_water.max(self.pos);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for WriteCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.high_water.checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;

        self.file.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Committed,
    Cancelled,
}

/// Writer for one piece of a packed store
pub struct PieceWriter {
    index: Arc<MetaIndex>,
    blob: BlobRef,

    /// File name relative to the store root, as recorded in the extent
    file_name: String,

    /// Absolute path of the same file
    path: PathBuf,

    cursor: Option<WriteCursor>,
    state: WriterState,
    sync_on_commit: bool,

    /// Size recorded at commit, once the cursor is gone
    committed_size: u64,
}

impl PieceWriter {
    /// Probe limit for generation suffixes before giving up
    const MAX_GENERATIONS: u32 = 1024;

    /// Allocate a fresh file for `blob` under `store_dir`.
    ///
    /// Names still on disk or still named by an extent row are skipped, so an
    /// existing file is never truncated or reused.
    pub(crate) fn create(
        index: Arc<MetaIndex>,
        store_dir: &Path,
        file_extension: &str,
        blob: &BlobRef,
        sync_on_commit: bool,
    ) -> Result<Self> {
        for generation in 0..Self::MAX_GENERATIONS {
            let file_name = path::piece_file_name(blob, file_extension, generation);
            if index.file_referenced(&file_name)? {
                continue;
            }

            let path = path::resolve(store_dir, &file_name)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            return Ok(Self {
                index,
                blob: blob.clone(),
                file_name,
                path,
                cursor: Some(WriteCursor::new(file)),
                state: WriterState::Open,
                sync_on_commit,
                committed_size: 0,
            });
        }

        Err(StoreError::FileExists(path::resolve(
            store_dir,
            &path::piece_file_name(blob, file_extension, 0),
        )?))
    }

    /// File name relative to the store root
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn cursor_mut(&mut self) -> io::Result<&mut WriteCursor> {
        self.cursor
            .as_mut()
            .ok_or_else(|| io::Error::other("writer is no longer open"))
    }

    fn discard_file(&mut self) -> Result<()> {
        self.cursor = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Write for PieceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.cursor_mut()?.flush()
    }
}

impl Seek for PieceWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor_mut()?.seek(pos)
    }
}

impl BlobWriter for PieceWriter {
    fn size(&self) -> u64 {
        self.cursor
            .as_ref()
            .map_or(self.committed_size, WriteCursor::size)
    }

    fn commit(&mut self) -> Result<()> {
        match self.state {
            WriterState::Committed => return Err(StoreError::AlreadyCommitted),
            WriterState::Cancelled => {
                return Err(StoreError::Unsupported("commit after cancel".to_string()))
            }
            WriterState::Open => {}
        }

        let cursor = self.cursor.take().ok_or(StoreError::AlreadyCommitted)?;
        let size = match cursor.finish(self.sync_on_commit) {
            Ok(size) => size,
            Err(e) => {
                self.state = WriterState::Cancelled;
                self.discard_file()?;
                return Err(e.into());
            }
        };

        if let Err(e) = self.index.insert_piece(&self.blob, &self.file_name, size) {
            self.state = WriterState::Cancelled;
            self.discard_file()?;
            return Err(e);
        }

        self.state = WriterState::Committed;
        self.committed_size = size;
        tracing::debug!(blob = %self.blob, file = %self.file_name, size, "committed piece");
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        if self.state != WriterState::Open {
            return Ok(());
        }
        self.state = WriterState::Cancelled;
        self.discard_file()?;
        tracing::debug!(blob = %self.blob, file = %self.file_name, "cancelled piece");
        Ok(())
    }
}

impl Drop for PieceWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Open {
            if let Err(e) = self.cancel() {
                tracing::warn!(blob = %self.blob, error = %e, "failed to discard uncommitted piece");
            }
        }
    }
}
