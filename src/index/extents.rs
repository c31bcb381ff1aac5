//! Extent operations used by the writer, compactor, collector and reindexer

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::blob::BlobRef;
use crate::error::{Result, StoreError};

use super::model::{from_sql_size, to_millis, to_sql_size, ExtentUsage, LocatedPiece, NamespaceUsage};
use super::pieces::located_from_row;
use super::MetaIndex;

/// A file discovered by the reindexer, ready to become one piece + one extent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPiece {
    pub blob_ref: BlobRef,

    /// File name relative to the store root
    pub file: String,

    pub size: u64,

    pub modified: DateTime<Utc>,
}

impl MetaIndex {
    // =========================================================================
    // File Names
    // =========================================================================

    /// True if any extent row (live or dead) names `file`
    pub fn file_referenced(&self, file: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM extents WHERE file = ?1 LIMIT 1",
                    params![file],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// All live pieces with their current extent, ordered by namespace then key
    pub fn live_pieces(&self) -> Result<Vec<LocatedPiece>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.namespace, p.key, p.size, p.created, e.id, e.file, e.start, e.size \
                 FROM pieces p JOIN extents e ON p.extent_id = e.id \
                 WHERE p.trash = 0 ORDER BY p.namespace, p.key",
            )?;
            let pieces = stmt
                .query_map([], located_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pieces)
        })
    }

    /// Point `blob` at a new extent `{file, start, size}`, but only if it still
    /// references `old_extent_id`. Returns false (and changes nothing) when the
    /// piece was deleted or moved in the meantime.
    pub fn relocate(
        &self,
        blob: &BlobRef,
        old_extent_id: i64,
        file: &str,
        start: u64,
        size: u64,
    ) -> Result<bool> {
        self.with_tx(|tx| {
            let current = tx
                .query_row(
                    "SELECT 1 FROM pieces WHERE namespace = ?1 AND key = ?2 AND extent_id = ?3",
                    params![blob.namespace, blob.key, old_extent_id],
                    |_| Ok(()),
                )
                .optional()?;
            if current.is_none() {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO extents (file, start, size) VALUES (?1, ?2, ?3)",
                params![file, to_sql_size(start), to_sql_size(size)],
            )?;
            let new_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE pieces SET extent_id = ?3 WHERE namespace = ?1 AND key = ?2",
                params![blob.namespace, blob.key, new_id],
            )?;
            Ok(true)
        })
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Files none of whose extents is referenced by a piece
    pub fn dead_files(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.file FROM extents e \
                 WHERE NOT EXISTS ( \
                     SELECT 1 FROM extents e2 JOIN pieces p ON p.extent_id = e2.id \
                     WHERE e2.file = e.file) \
                 ORDER BY e.file",
            )?;
            let files = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(files)
        })
    }

    /// Re-check that `file` is still dead and return the ids of its extents.
    /// Returns an empty list if a piece started referencing it again.
    pub fn claim_dead_extents(&self, file: &str) -> Result<Vec<i64>> {
        self.with_tx(|tx| {
            let live: i64 = tx.query_row(
                "SELECT COUNT(*) FROM extents e JOIN pieces p ON p.extent_id = e.id \
                 WHERE e.file = ?1",
                params![file],
                |row| row.get(0),
            )?;
            if live > 0 {
                return Ok(Vec::new());
            }

            let mut stmt = tx.prepare("SELECT id FROM extents WHERE file = ?1 ORDER BY id")?;
            let ids = stmt
                .query_map(params![file], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    /// Delete extent rows by id. The foreign key from `pieces` refuses to
    /// drop an extent that is still referenced.
    pub fn remove_extents(&self, ids: &[i64]) -> Result<u64> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("DELETE FROM extents WHERE id = ?1")?;
            let mut removed = 0u64;
            for id in ids {
                removed += stmt.execute(params![id])? as u64;
            }
            Ok(removed)
        })
    }

    // =========================================================================
    // Reindex
    // =========================================================================

    /// Insert one extent and one piece per discovered file, all in one
    /// transaction. Refuses to run unless the index is empty.
    pub fn insert_discovered(&self, discovered: &[DiscoveredPiece]) -> Result<u64> {
        self.with_tx(|tx| {
            ensure_empty(tx)?;

            let mut insert_extent =
                tx.prepare("INSERT INTO extents (file, start, size) VALUES (?1, 0, ?2)")?;
            let mut insert_piece = tx.prepare(
                "INSERT INTO pieces (namespace, key, size, extent_id, created, accessed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            )?;

            for piece in discovered {
                let size = to_sql_size(piece.size);
                insert_extent.execute(params![piece.file, size])?;
                let extent_id = tx.last_insert_rowid();
                insert_piece
                    .execute(params![
                        piece.blob_ref.namespace,
                        piece.blob_ref.key,
                        size,
                        extent_id,
                        to_millis(piece.modified),
                    ])
                    .map_err(|e| StoreError::from_insert(e, &piece.blob_ref))?;
            }
            Ok(discovered.len() as u64)
        })
    }

    /// True if neither table has any rows
    pub fn is_empty(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let rows: i64 = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM pieces) + (SELECT COUNT(*) FROM extents)",
                [],
                |row| row.get(0),
            )?;
            Ok(rows == 0)
        })
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Live and trashed totals per namespace, ordered by namespace
    pub fn namespace_usage(&self) -> Result<Vec<NamespaceUsage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT namespace, \
                        SUM(CASE WHEN trash = 0 THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN trash = 0 THEN size ELSE 0 END), \
                        SUM(CASE WHEN trash = 1 THEN 1 ELSE 0 END), \
                        SUM(CASE WHEN trash = 1 THEN size ELSE 0 END) \
                 FROM pieces GROUP BY namespace ORDER BY namespace",
            )?;
            let usage = stmt
                .query_map([], |row| {
                    Ok(NamespaceUsage {
                        namespace: row.get(0)?,
                        live_pieces: from_sql_size(row.get(1)?),
                        live_bytes: from_sql_size(row.get(2)?),
                        trashed_pieces: from_sql_size(row.get(3)?),
                        trashed_bytes: from_sql_size(row.get(4)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(usage)
        })
    }

    /// File and extent totals, including dead space awaiting collection
    pub fn extent_usage(&self) -> Result<ExtentUsage> {
        self.with_conn(|conn| {
            let usage = conn.query_row(
                "SELECT COUNT(DISTINCT e.file), COUNT(*), \
                        COALESCE(SUM(CASE WHEN p.extent_id IS NULL THEN 1 ELSE 0 END), 0), \
                        COALESCE(SUM(CASE WHEN p.extent_id IS NULL THEN e.size ELSE 0 END), 0) \
                 FROM extents e \
                 LEFT JOIN (SELECT DISTINCT extent_id FROM pieces) p ON p.extent_id = e.id",
                [],
                |row| {
                    Ok(ExtentUsage {
                        files: from_sql_size(row.get(0)?),
                        extents: from_sql_size(row.get(1)?),
                        orphaned_extents: from_sql_size(row.get(2)?),
                        orphaned_bytes: from_sql_size(row.get(3)?),
                    })
                },
            )?;
            Ok(usage)
        })
    }
}

fn ensure_empty(tx: &Transaction<'_>) -> Result<()> {
    let rows: i64 = tx.query_row(
        "SELECT (SELECT COUNT(*) FROM pieces) + (SELECT COUNT(*) FROM extents)",
        [],
        |row| row.get(0),
    )?;
    if rows > 0 {
        return Err(StoreError::IndexNotEmpty);
    }
    Ok(())
}
