//! Extent Reader
//!
//! A bounded view over one extent of a physical file. Virtual offset 0 is
//! physical offset `extent.start`; nothing at or beyond the piece's logical
//! size is ever returned.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::blob::{path, BlobReader};
use crate::error::Result;
use crate::index::Extent;

/// Reader over `[start, start + size)` of a file
pub struct ExtentReader {
    file: File,

    /// Physical offset of virtual offset 0
    base: u64,

    /// Logical size; reads are clamped to it
    size: u64,

    /// Virtual position
    pos: u64,
}

impl ExtentReader {
    /// Open the file backing `extent` under `store_dir`, bounded to `size`
    pub fn open(store_dir: &Path, extent: &Extent, size: u64) -> Result<Self> {
        let file = File::open(path::resolve(store_dir, &extent.file)?)?;
        Ok(Self::from_file(file, extent.start, size))
    }

    /// Wrap an already open file
    pub fn from_file(file: File, base: u64, size: u64) -> Self {
        Self {
            file,
            base,
            size,
            pos: 0,
        }
    }

    /// Clamp a read of `len` bytes at virtual `offset` to the logical size
    fn clamp(&self, offset: u64, len: usize) -> usize {
        let remaining = self.size.saturating_sub(offset);
        usize::try_from(remaining).map_or(len, |r| r.min(len))
    }
}

impl Read for ExtentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ExtentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seek from end is not supported",
                ))
            }
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        Ok(self.pos)
    }
}

impl BlobReader for ExtentReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = self.clamp(offset, buf.len());
        if len == 0 {
            return Ok(0);
        }
        let physical = self.base.checked_add(offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "offset overflows the file")
        })?;
        positional_read(&self.file, &mut buf[..len], physical)
    }
}

#[cfg(unix)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
