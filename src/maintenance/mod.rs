//! Maintenance Module
//!
//! Offline passes over a packed store. Each is a one-shot batch that aborts
//! on the first unrecoverable error and leaves the store safe to resume.
//!
//! ## Passes
//! ```text
//!   reindex:  legacy tree ──► one extent + one piece per file
//!   compact:  live pieces ──► one dense new file, pointers flipped
//!   clean:    files backing no piece ──► unlinked, extent rows dropped
//! ```
//!
//! Run `clean` after `compact` to reclaim the space compaction orphaned.

mod clean;
mod compact;
mod reindex;

pub use clean::{CleanReport, Collector};
pub use compact::{CompactionReport, Compactor};
pub use reindex::{ReindexReport, Reindexer};
