//! Orphan Collector
//!
//! Unlinks files that no piece (live or trashed) references through any of
//! their extents, then drops those extent rows.
//!
//! ## Per file
//! 1. Claim: re-check the file is dead and take its extent ids (one transaction)
//! 2. Unlink the file; an already missing file is fine
//! 3. Delete exactly the claimed extent rows
//!
//! Writers skip any file name still named by an extent row, so a claimed
//! name cannot be handed to a new piece before step 3.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::blob::path;
use crate::error::Result;
use crate::index::MetaIndex;

/// Result of a collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Files unlinked from disk
    pub files_removed: u64,

    /// Dead files that were already gone; only their rows were dropped
    pub files_missing: u64,

    /// Extent rows dropped
    pub extents_removed: u64,

    /// On-disk size of the unlinked files
    pub bytes_reclaimed: u64,
}

/// Collection pass over one store
pub struct Collector {
    store_dir: PathBuf,
    index: Arc<MetaIndex>,
}

impl Collector {
    pub fn new(store_dir: impl Into<PathBuf>, index: Arc<MetaIndex>) -> Self {
        Self {
            store_dir: store_dir.into(),
            index,
        }
    }

    pub fn run(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();

        for file in self.index.dead_files()? {
            let ids = self.index.claim_dead_extents(&file)?;
            if ids.is_empty() {
                tracing::debug!(file = %file, "file came back to life; skipped");
                continue;
            }

            let path = path::resolve(&self.store_dir, &file)?;
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_reclaimed += size;
                    tracing::debug!(file = %file, size, "removed dead file");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    report.files_missing += 1;
                    tracing::warn!(file = %file, "dead file already missing; dropping its extents");
                }
                Err(e) => return Err(e.into()),
            }

            report.extents_removed += self.index.remove_extents(&ids)?;
        }

        tracing::info!(
            files_removed = report.files_removed,
            files_missing = report.files_missing,
            extents_removed = report.extents_removed,
            bytes = report.bytes_reclaimed,
            "clean finished"
        );
        Ok(report)
    }
}
