//! Remote document store access.
//!
//! This crate provides:
//! - [`DocumentSource`]: the read contract the sync engine depends on
//! - [`DocumentPager`]: lazy, restartable walk over a paginated listing
//! - [`NotionClient`]: HTTP implementation with retry and backoff
//! - [`send_with_retry`]: the retry loop, shared with media downloads

pub mod client;
pub mod retry;
pub mod source;
pub mod wire;

pub use client::{ConnectionReport, NotionClient};
pub use retry::{is_retryable, send_with_retry, status_error};
pub use source::{DocumentFilter, DocumentPager, DocumentSource, Page};
pub use wire::{hosted_asset_id, sanitize_slug};
