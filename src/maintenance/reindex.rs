//! Reindexer
//!
//! Bootstraps an empty index from a one-file-per-piece tree:
//! `{store_dir}/{ns}/{key[..2]}/{key[2..]}.{ext}`. Every recognized file
//! becomes one extent covering the whole file and one piece pointing at it.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::blob::path;
use crate::error::{Result, StoreError};
use crate::index::{DiscoveredPiece, MetaIndex};

/// Result of a reindex pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub pieces_indexed: u64,
    pub bytes_indexed: u64,

    /// Files at piece depth whose names do not decode
    pub files_skipped: u64,
}

/// Reindex pass over one store directory
pub struct Reindexer {
    store_dir: PathBuf,
    file_extension: String,
    index: Arc<MetaIndex>,
}

impl Reindexer {
    pub fn new(
        store_dir: impl Into<PathBuf>,
        file_extension: impl Into<String>,
        index: Arc<MetaIndex>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            file_extension: file_extension.into(),
            index,
        }
    }

    /// Scan the tree and record everything found. Refuses a non-empty index.
    pub fn run(&self) -> Result<ReindexReport> {
        if !self.index.is_empty()? {
            return Err(StoreError::IndexNotEmpty);
        }

        let mut report = ReindexReport::default();
        let mut discovered = Vec::new();

        for entry in WalkDir::new(&self.store_dir)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.store_dir)
                .map_err(|_| StoreError::InvalidPath(entry.path().display().to_string()))?;
            let blob_ref = match path::parse_legacy_path(relative, &self.file_extension) {
                Ok(blob_ref) => blob_ref,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping file outside the piece layout");
                    report.files_skipped += 1;
                    continue;
                }
            };

            let metadata = entry.metadata().map_err(io::Error::from)?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let file = relative
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            tracing::debug!(
                blob = %blob_ref,
                file = %file,
                size = metadata.len(),
                "discovered piece"
            );
            report.bytes_indexed += metadata.len();
            discovered.push(DiscoveredPiece {
                blob_ref,
                file,
                size: metadata.len(),
                modified,
            });
        }

        report.pieces_indexed = self.index.insert_discovered(&discovered)?;
        tracing::info!(
            pieces = report.pieces_indexed,
            bytes = report.bytes_indexed,
            skipped = report.files_skipped,
            "reindex finished"
        );
        Ok(report)
    }
}
