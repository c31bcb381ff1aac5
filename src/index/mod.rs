//! Metadata Index Module
//!
//! Transactional mapping from logical pieces to physical extents, kept in
//! SQLite.
//!
//! ## Responsibilities
//! - Own the `pieces` and `extents` tables (see `schema`)
//! - Point lookups by (namespace, key), namespace scans, usage aggregates
//! - Atomic commit of a piece with its first extent
//! - Conditional pointer flips for compaction, dead-extent queries for cleaning
//!
//! ## Concurrency
//! One connection behind a `parking_lot::Mutex`. Each public method holds the
//! lock for a single statement or one short transaction, never across file I/O.
//! Share the index as `Arc<MetaIndex>`.

mod extents;
mod model;
mod pieces;
mod schema;
mod walk;

use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::{IndexLocation, StoreConfig};
use crate::error::Result;

pub use extents::DiscoveredPiece;
pub use model::{Extent, ExtentUsage, LocatedPiece, NamespaceUsage};
pub use walk::NamespaceWalk;

/// Handle to the metadata index
pub struct MetaIndex {
    /// The only connection; rusqlite connections are not `Sync`
    conn: Mutex<Connection>,

    /// Page size for namespace walks
    walk_batch_size: usize,
}

impl MetaIndex {
    /// Default page size when opened without a config
    const DEFAULT_WALK_BATCH: usize = 1000;

    /// Open the index described by `config`, creating the schema if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.index {
            IndexLocation::Memory => Connection::open_in_memory()?,
            IndexLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                let mode: String = conn.pragma_update_and_check(
                    None,
                    "journal_mode",
                    "WAL",
                    |row| row.get(0),
                )?;
                tracing::debug!(path = %path.display(), journal_mode = %mode, "opened index");
                conn
            }
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Self::from_connection(conn, config.walk_batch_size)
    }

    /// Open a private in-memory index
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Self::DEFAULT_WALK_BATCH)
    }

    fn from_connection(conn: Connection, walk_batch_size: usize) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            walk_batch_size: walk_batch_size.max(1),
        })
    }

    /// Close the connection, surfacing any error SQLite reports on close
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| e.into())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Run `f` against the connection under the lock
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside an immediate transaction; commits only if `f` succeeds
    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
