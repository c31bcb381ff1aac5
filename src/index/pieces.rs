//! Piece operations: commit, lookup, trash lifecycle, usage accounting

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::blob::{BlobInfo, BlobRef, EmptiedTrash};
use crate::error::{Result, StoreError};

use super::model::{from_millis, from_sql_size, to_millis, to_sql_size, Extent, LocatedPiece};
use super::MetaIndex;

/// Columns selected by every piece+extent join, in `located_from_row` order
const LOCATED_COLUMNS: &str = "p.namespace, p.key, p.size, p.created, \
     e.id, e.file, e.start, e.size";

pub(super) fn located_from_row(row: &Row<'_>) -> rusqlite::Result<LocatedPiece> {
    Ok(LocatedPiece {
        blob_ref: BlobRef::new(row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?),
        size: from_sql_size(row.get(2)?),
        created: from_millis(row.get(3)?),
        extent: Extent {
            id: row.get(4)?,
            file: row.get(5)?,
            start: from_sql_size(row.get(6)?),
            size: from_sql_size(row.get(7)?),
        },
    })
}

pub(super) fn info_from_row(row: &Row<'_>) -> rusqlite::Result<BlobInfo> {
    Ok(BlobInfo {
        blob_ref: BlobRef::new(row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?),
        size: from_sql_size(row.get(2)?),
        modified: from_millis(row.get(3)?),
    })
}

impl MetaIndex {
    // =========================================================================
    // Commit
    // =========================================================================

    /// Record a freshly written piece: one extent `{file, 0, size}` and one
    /// piece row pointing at it, in a single transaction.
    ///
    /// Fails with `AlreadyExists` if (namespace, key) is taken.
    pub fn insert_piece(&self, blob: &BlobRef, file: &str, size: u64) -> Result<Extent> {
        let now = to_millis(Utc::now());
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO extents (file, start, size) VALUES (?1, 0, ?2)",
                params![file, to_sql_size(size)],
            )?;
            let extent_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO pieces (namespace, key, size, extent_id, created, accessed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![blob.namespace, blob.key, to_sql_size(size), extent_id, now],
            )
            .map_err(|e| StoreError::from_insert(e, blob))?;

            Ok(Extent {
                id: extent_id,
                file: file.to_string(),
                start: 0,
                size,
            })
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve a live piece to its current extent
    pub fn locate(&self, blob: &BlobRef) -> Result<LocatedPiece> {
        let sql = format!(
            "SELECT {LOCATED_COLUMNS} FROM pieces p JOIN extents e ON p.extent_id = e.id \
             WHERE p.namespace = ?1 AND p.key = ?2 AND p.trash = 0"
        );
        self.with_conn(|conn| {
            conn.query_row(&sql, params![blob.namespace, blob.key], located_from_row)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(blob.clone()))
        })
    }

    /// Advisory: stamp the piece's `accessed` column
    pub fn record_access(&self, blob: &BlobRef) -> Result<()> {
        let now = to_millis(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE pieces SET accessed = ?3 WHERE namespace = ?1 AND key = ?2",
                params![blob.namespace, blob.key, now],
            )?;
            Ok(())
        })
    }

    /// Describe a live piece
    pub fn stat(&self, blob: &BlobRef) -> Result<BlobInfo> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT namespace, key, size, created FROM pieces \
                 WHERE namespace = ?1 AND key = ?2 AND trash = 0",
                params![blob.namespace, blob.key],
                info_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(blob.clone()))
        })
    }

    /// Number of piece rows, live or trashed
    pub fn count_pieces(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM pieces", [], |row| row.get(0))?;
            Ok(from_sql_size(count))
        })
    }

    /// Namespaces with at least one piece row (live or trashed), ascending
    pub fn list_namespaces(&self) -> Result<Vec<Vec<u8>>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT namespace FROM pieces ORDER BY namespace")?;
            let namespaces = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
            Ok(namespaces)
        })
    }

    // =========================================================================
    // Trash Lifecycle
    // =========================================================================

    /// Flag a piece as trashed. Trashing an already trashed piece keeps its
    /// original `trashed_at`. Missing pieces are `NotFound`.
    pub fn trash(&self, blob: &BlobRef, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE pieces SET trash = 1, trashed_at = COALESCE(trashed_at, ?3) \
                 WHERE namespace = ?1 AND key = ?2",
                params![blob.namespace, blob.key, to_millis(now)],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(blob.clone()));
            }
            Ok(())
        })
    }

    /// Clear the trash flag on every trashed piece of a namespace
    pub fn restore_trash(&self, namespace: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.with_tx(|tx| {
            let keys = {
                let mut stmt = tx.prepare(
                    "SELECT key FROM pieces WHERE namespace = ?1 AND trash = 1 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![namespace], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
                keys
            };
            tx.execute(
                "UPDATE pieces SET trash = 0, trashed_at = NULL \
                 WHERE namespace = ?1 AND trash = 1",
                params![namespace],
            )?;
            Ok(keys)
        })
    }

    /// Remove pieces of a namespace trashed strictly before `before`.
    /// Their extents are left for the collector.
    pub fn empty_trash(&self, namespace: &[u8], before: DateTime<Utc>) -> Result<EmptiedTrash> {
        let cutoff = to_millis(before);
        self.with_tx(|tx| {
            let mut emptied = EmptiedTrash::default();
            {
                let mut stmt = tx.prepare(
                    "SELECT key, size FROM pieces \
                     WHERE namespace = ?1 AND trash = 1 AND trashed_at < ?2 ORDER BY key",
                )?;
                let mut rows = stmt.query(params![namespace, cutoff])?;
                while let Some(row) = rows.next()? {
                    emptied.keys.push(row.get(0)?);
                    emptied.bytes += from_sql_size(row.get(1)?);
                }
            }
            let removed = tx.execute(
                "DELETE FROM pieces WHERE namespace = ?1 AND trash = 1 AND trashed_at < ?2",
                params![namespace, cutoff],
            )?;
            emptied.count = removed as u64;
            Ok(emptied)
        })
    }

    // =========================================================================
    // Hard Delete
    // =========================================================================

    /// Remove a piece row. Returns whether a row existed.
    pub fn delete(&self, blob: &BlobRef) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pieces WHERE namespace = ?1 AND key = ?2",
                params![blob.namespace, blob.key],
            )?;
            Ok(removed > 0)
        })
    }

    /// Remove every piece row of a namespace. Returns the number removed.
    pub fn delete_namespace(&self, namespace: &[u8]) -> Result<u64> {
        self.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM pieces WHERE namespace = ?1", params![namespace])?;
            Ok(removed as u64)
        })
    }

    // =========================================================================
    // Usage Accounting
    // =========================================================================

    /// Sum of live piece sizes, optionally limited to one namespace
    pub fn live_bytes(&self, namespace: Option<&[u8]>) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = match namespace {
                Some(ns) => conn.query_row(
                    "SELECT COALESCE(SUM(size), 0) FROM pieces WHERE trash = 0 AND namespace = ?1",
                    params![ns],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COALESCE(SUM(size), 0) FROM pieces WHERE trash = 0",
                    [],
                    |row| row.get(0),
                )?,
            };
            Ok(from_sql_size(total))
        })
    }

    /// Sum of trashed piece sizes
    pub fn trashed_bytes(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size), 0) FROM pieces WHERE trash = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(from_sql_size(total))
        })
    }
}
