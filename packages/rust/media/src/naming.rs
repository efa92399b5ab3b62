//! Stable on-disk names for media assets.
//!
//! A descriptor's file name depends only on its dedup key and kind, so the
//! same asset lands on the same path in every run no matter which signed URL
//! it was fetched through.

use std::path::{Path, PathBuf};

use url::Url;

use docmirror_shared::{MediaDescriptor, MediaSource, sha256_hex};

/// Longest extension taken from a URL; anything longer is treated as noise.
const MAX_EXTENSION_LEN: usize = 5;
/// Hex characters of the SHA-256 used for URL-derived names.
const HASH_PREFIX_LEN: usize = 16;

/// Where an asset lives on disk and how pages reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    /// Absolute (or static-dir relative) filesystem path.
    pub path: PathBuf,
    /// Site-root reference, e.g. `/images/<file>`.
    pub site_path: String,
}

/// File name for `descriptor`: asset id for hosted assets, a hash prefix of
/// the URL for external ones, plus the URL's extension (kind default when
/// the URL has none).
pub fn file_name(descriptor: &MediaDescriptor) -> String {
    let stem = match &descriptor.source {
        MediaSource::Hosted { asset_id, .. } if is_safe_stem(asset_id) => asset_id.to_lowercase(),
        MediaSource::Hosted { asset_id, .. } => hash_prefix(asset_id),
        MediaSource::External { url } => hash_prefix(url),
    };
    let extension = url_extension(descriptor.url())
        .unwrap_or_else(|| descriptor.kind.default_extension().to_string());
    format!("{stem}.{extension}")
}

pub fn locate(static_dir: &Path, descriptor: &MediaDescriptor) -> AssetLocation {
    let dir = descriptor.kind.dir_name();
    let name = file_name(descriptor);
    AssetLocation {
        path: static_dir.join(dir).join(&name),
        site_path: format!("/{dir}/{name}"),
    }
}

/// Lowercased extension of the URL's last path segment, if it looks like one.
fn url_extension(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

fn is_safe_stem(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn hash_prefix(s: &str) -> String {
    sha256_hex(s.as_bytes())[..HASH_PREFIX_LEN].to_string()
}
