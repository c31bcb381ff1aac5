//! Compactor
//!
//! Copies every live piece, in (namespace, key) order, into one new file and
//! repoints each piece at its new extent. Source files are never touched;
//! their extents simply become orphaned.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::blob::{path, BlobRef};
use crate::engine::ExtentReader;
use crate::error::{Result, StoreError};
use crate::index::{LocatedPiece, MetaIndex};

/// Result of a compaction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Destination file, relative to the store root
    pub destination: String,

    /// Pieces now served from the destination
    pub pieces_moved: u64,

    /// Pieces deleted or moved by someone else while the pass ran
    pub pieces_skipped: u64,

    /// Bytes written to the destination
    pub bytes_copied: u64,
}

/// Where a copied piece landed
struct Placement {
    blob: BlobRef,
    old_extent_id: i64,
    start: u64,
    size: u64,
}

/// Compaction pass over one store
pub struct Compactor {
    store_dir: PathBuf,
    index: Arc<MetaIndex>,
}

impl Compactor {
    pub fn new(store_dir: impl Into<PathBuf>, index: Arc<MetaIndex>) -> Self {
        Self {
            store_dir: store_dir.into(),
            index,
        }
    }

    /// Pack all live pieces into `destination` (relative to the store root).
    ///
    /// Fails with `FileExists` if the name is taken on disk or in the index.
    pub fn run(&self, destination: &str) -> Result<CompactionReport> {
        let dest_path = path::resolve(&self.store_dir, destination)?;
        if dest_path.exists() || self.index.file_referenced(destination)? {
            return Err(StoreError::FileExists(dest_path));
        }

        let pieces = self.index.live_pieces()?;
        let mut report = CompactionReport {
            destination: destination.to_string(),
            ..Default::default()
        };
        if pieces.is_empty() {
            tracing::info!(destination, "nothing to compact");
            return Ok(report);
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::FileExists(dest_path.clone()),
                _ => e.into(),
            })?;

        // Step 1: copy everything and make it durable
        let placements = match self.copy_pieces(file, &pieces) {
            Ok(placements) => placements,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&dest_path) {
                    tracing::warn!(error = %cleanup, "failed to remove partial destination");
                }
                return Err(e);
            }
        };

        // Step 2: flip pointers, one small transaction each
        self.flip_pieces(&dest_path, placements, &mut report)?;

        tracing::info!(
            destination,
            moved = report.pieces_moved,
            skipped = report.pieces_skipped,
            bytes = report.bytes_copied,
            "compaction finished"
        );
        Ok(report)
    }

    /// Repoint every copied piece at the destination. A destination that
    /// ends up backing no piece is removed; no extent row names it.
    fn flip_pieces(
        &self,
        dest_path: &Path,
        placements: Vec<Placement>,
        report: &mut CompactionReport,
    ) -> Result<()> {
        for placement in placements {
            let flipped = self.index.relocate(
                &placement.blob,
                placement.old_extent_id,
                &report.destination,
                placement.start,
                placement.size,
            )?;
            if flipped {
                report.pieces_moved += 1;
                report.bytes_copied += placement.size;
            } else {
                tracing::warn!(
                    blob = %placement.blob,
                    "piece changed during compaction; left in place"
                );
                report.pieces_skipped += 1;
            }
        }

        if report.pieces_moved == 0 {
            tracing::info!(
                destination = %report.destination,
                "no piece moved; removing destination"
            );
            fs::remove_file(dest_path)?;
        }
        Ok(())
    }

    fn copy_pieces(&self, file: File, pieces: &[LocatedPiece]) -> Result<Vec<Placement>> {
        let mut out = BufWriter::new(file);

        let mut placements = Vec::with_capacity(pieces.len());
        let mut pos = 0u64;
        for piece in pieces {
            let mut reader = ExtentReader::open(&self.store_dir, &piece.extent, piece.size)?;
            let copied = io::copy(&mut reader, &mut out)?;
            if copied != piece.size {
                return Err(StoreError::ShortExtent {
                    file: piece.extent.file.clone(),
                    expected: piece.size,
                    copied,
                });
            }

            tracing::debug!(
                blob = %piece.blob_ref,
                start = pos,
                size = piece.size,
                "copied piece"
            );
            placements.push(Placement {
                blob: piece.blob_ref.clone(),
                old_extent_id: piece.extent.id,
                start: pos,
                size: piece.size,
            });
            pos += piece.size;
        }

        out.flush()?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(placements)
    }
}
