//! Blob Module
//!
//! The narrow blob-store contract consumed by a storage node.
//!
//! ## Responsibilities
//! - Identify pieces by (namespace, key)
//! - Define the `BlobStore` capability shared by every backend
//! - Define streaming writer/reader handles
//! - Encode refs into on-disk names (see `path`)
//!
//! ## Writer lifecycle
//! ```text
//!   create ──► write/seek ... ──► commit  (piece becomes visible)
//!                         └─────► cancel  (partial file removed)
//! ```

pub mod path;

use std::fmt;
use std::io::{self, Read, Seek, Write};

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Identifies a piece: an opaque namespace plus an opaque key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobRef {
    pub namespace: Vec<u8>,
    pub key: Vec<u8>,
}

impl BlobRef {
    pub fn new(namespace: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            path::encode_component(&self.namespace),
            path::encode_component(&self.key)
        )
    }
}

/// Descriptor of a live piece, as returned by `stat` and namespace walks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub blob_ref: BlobRef,

    /// Logical size in bytes
    pub size: u64,

    /// When the piece was committed (or last modified, for file-backed stores)
    pub modified: DateTime<Utc>,
}

/// Outcome of emptying a namespace's trash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmptiedTrash {
    /// Number of pieces removed
    pub count: u64,

    /// Sum of their logical sizes
    pub bytes: u64,

    /// Keys of the removed pieces
    pub keys: Vec<Vec<u8>>,
}

/// A piece being written. Nothing is visible to readers until `commit`.
pub trait BlobWriter: Write + Seek + Send {
    /// Current logical size (largest offset written so far)
    fn size(&self) -> u64;

    /// Publish the piece. A second call fails with `AlreadyCommitted`.
    fn commit(&mut self) -> Result<()>;

    /// Discard the partial piece. No-op after commit.
    fn cancel(&mut self) -> Result<()>;
}

/// A committed piece opened for reading, bounded to its logical size
pub trait BlobReader: Read + Seek + Send {
    /// Logical size of the piece
    fn size(&self) -> u64;

    /// Positional read relative to the start of the piece; does not move the cursor
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl fmt::Debug for dyn BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader").field("size", &self.size()).finish()
    }
}

/// Blob storage capability implemented by the packed engine and the legacy
/// one-file-per-piece store.
pub trait BlobStore: Send + Sync {
    /// Start writing a new piece. `size_hint` is advisory only.
    fn create(&self, blob: &BlobRef, size_hint: Option<u64>) -> Result<Box<dyn BlobWriter>>;

    /// Open a live piece. Missing and trashed pieces are `NotFound`.
    fn open(&self, blob: &BlobRef) -> Result<Box<dyn BlobReader>>;

    /// Hard-delete a piece (trashed or not). Deleting a missing piece is not an error.
    fn delete(&self, blob: &BlobRef) -> Result<()>;

    /// Hard-delete every piece in a namespace
    fn delete_namespace(&self, namespace: &[u8]) -> Result<()>;

    /// Move a piece to the trash. Idempotent.
    fn trash(&self, blob: &BlobRef) -> Result<()>;

    /// Restore every trashed piece of a namespace, returning the restored keys
    fn restore_trash(&self, namespace: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Permanently remove pieces trashed before `trashed_before`
    fn empty_trash(&self, namespace: &[u8], trashed_before: DateTime<Utc>)
        -> Result<EmptiedTrash>;

    /// Describe a live piece
    fn stat(&self, blob: &BlobRef) -> Result<BlobInfo>;

    /// Visit every live piece of a namespace; stops at the first error from `f`
    fn walk_namespace(
        &self,
        namespace: &[u8],
        f: &mut dyn FnMut(&BlobInfo) -> Result<()>,
    ) -> Result<()>;

    /// Namespaces that currently hold at least one piece
    fn list_namespaces(&self) -> Result<Vec<Vec<u8>>>;

    /// Bytes held by live pieces
    fn space_used_for_blobs(&self) -> Result<u64>;

    /// Bytes held by live pieces of one namespace
    fn space_used_for_blobs_in_namespace(&self, namespace: &[u8]) -> Result<u64>;

    /// Bytes held by trashed pieces
    fn space_used_for_trash(&self) -> Result<u64>;
}
