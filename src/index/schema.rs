//! Index schema
//!
//! ```text
//! extents(id PK autoincrement, file, start, size)
//! pieces((namespace, key) PK, size, trash, trashed_at, extent_id → extents.id,
//!        created, accessed)
//! ```
//!
//! `extents.id` uses AUTOINCREMENT so a collected id is never handed out
//! again; compaction flips are conditioned on the old id.

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS extents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file TEXT NOT NULL,
        start INTEGER NOT NULL DEFAULT 0,
        size INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS extents_by_file ON extents(file);

    CREATE TABLE IF NOT EXISTS pieces (
        namespace BLOB NOT NULL,
        key BLOB NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        trash INTEGER NOT NULL DEFAULT 0,
        trashed_at INTEGER,
        extent_id INTEGER NOT NULL REFERENCES extents(id),
        created INTEGER NOT NULL,
        accessed INTEGER NOT NULL,
        PRIMARY KEY (namespace, key)
    );
    CREATE INDEX IF NOT EXISTS pieces_by_extent ON pieces(extent_id);
"#;

/// Create tables and indexes if they do not exist yet
pub(crate) fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
