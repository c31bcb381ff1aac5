//! Row types of the metadata index

use chrono::{DateTime, Utc};

use crate::blob::BlobRef;

/// A byte range inside a physical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extent {
    /// Surrogate key; never reused
    pub id: i64,

    /// File name relative to the store root
    pub file: String,

    /// First byte of the range
    pub start: u64,

    /// Length of the range
    pub size: u64,
}

impl Extent {
    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        self.start + self.size
    }
}

/// A piece joined with the extent currently holding its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedPiece {
    pub blob_ref: BlobRef,

    /// Logical size (what readers see)
    pub size: u64,

    pub extent: Extent,

    pub created: DateTime<Utc>,
}

/// Per-namespace totals for the `stat` report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceUsage {
    pub namespace: Vec<u8>,
    pub live_pieces: u64,
    pub live_bytes: u64,
    pub trashed_pieces: u64,
    pub trashed_bytes: u64,
}

/// Physical-side totals for the `stat` report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentUsage {
    /// Distinct files named by any extent
    pub files: u64,

    /// All extent rows
    pub extents: u64,

    /// Extents no piece points at
    pub orphaned_extents: u64,

    /// Bytes covered by orphaned extents
    pub orphaned_bytes: u64,
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_size(size: i64) -> u64 {
    u64::try_from(size).unwrap_or(0)
}
