//! Sync engine for docmirror.
//!
//! This crate ties together the remote source, block conversion, media
//! resolution, and the sync state store into one incremental run
//! ([`SyncEngine::run`]), and owns the output side: front matter rendering
//! and change-aware document writes.

pub mod frontmatter;
pub mod progress;
pub mod sync;
pub mod writer;

pub use frontmatter::FrontMatter;
pub use progress::{ProgressReporter, SilentProgress};
pub use sync::{
    DocumentFailure, DocumentOutcome, DocumentPhase, RunSummary, SyncEngine, SyncMode, SyncOptions,
};
pub use writer::{DocumentWriter, WriteOutcome, WriteResult};
