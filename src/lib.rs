//! # packstore
//!
//! A packed blob store for storage nodes:
//! - Many small immutable pieces, identified by (namespace, key)
//! - Pieces live as byte ranges (extents) inside shared physical files
//! - A transactional SQLite index maps every piece to its current extent
//! - Offline compaction, orphan collection and reindexing from a legacy tree
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  BlobStore trait (blob)                      │
//! │        PackedStore (engine)    │    FileStore (legacy)       │
//! └───────────┬──────────────────────────────┬───────────────────┘
//!             │                              │
//!    ┌────────▼────────┐            ┌────────▼────────┐
//!    │   PieceWriter   │            │  ExtentReader   │
//!    │ (file per piece)│            │ (bounded range) │
//!    └────────┬────────┘            └────────▲────────┘
//!             │ commit                       │ locate
//!    ┌────────▼──────────────────────────────┴────────┐
//!    │              MetaIndex (SQLite)                │
//!    │         pieces ──extent_id──► extents          │
//!    └────────▲──────────────────────────────▲────────┘
//!             │                              │
//!    ┌────────┴────────┐            ┌────────┴────────┐
//!    │    Compactor    │            │ Collector /     │
//!    │ (flip pointers) │            │ Reindexer       │
//!    └─────────────────┘            └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod blob;
pub mod index;
pub mod engine;
pub mod filestore;
pub mod maintenance;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use blob::{BlobInfo, BlobReader, BlobRef, BlobStore, BlobWriter, EmptiedTrash};
pub use config::{IndexLocation, StoreConfig};
pub use engine::PackedStore;
pub use error::{Result, StoreError};
pub use filestore::FileStore;
pub use index::MetaIndex;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of packstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
