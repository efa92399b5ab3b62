//! Shared types, error model, and configuration for docmirror.
//!
//! This crate is the foundation depended on by all other docmirror crates.
//! It provides:
//! - [`MirrorError`]: the unified error type
//! - Domain types ([`Document`], [`Block`], [`RichText`], [`MediaDescriptor`])
//! - Configuration ([`AppConfig`], [`RemoteConfig`], [`SyncConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, PropertyNames, RemoteConfig, RemoteSection, SyncConfig, SyncSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_database_id,
    resolve_token,
};
pub use error::{MirrorError, Result};
pub use types::{
    Block, BlockKind, Document, DocumentProperties, DocumentSummary, Marks, MediaBlock,
    MediaDescriptor, MediaKind, MediaSource, RetryPolicy, RichText, Span, compact_id, sha256_hex,
};
