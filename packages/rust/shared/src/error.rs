//! Error types for docmirror.
//!
//! Library crates use [`MirrorError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docmirror operations.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Configuration loading or validation error. Fatal for the run.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient remote failure (rate limiting, 5xx, transport) that
    /// survived every retry.
    #[error("remote unavailable: {message}")]
    RemoteUnavailable { message: String },

    /// Credentials rejected by the remote store. Fatal for the run.
    #[error("remote rejected credentials: {0}")]
    RemoteAuth(String),

    /// Non-retryable remote response (404, 400, ...).
    #[error("remote returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// Remote payload could not be interpreted.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An output document could not be written.
    #[error("failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A single media asset could not be fetched.
    #[error("media download failed for {key}: {message}")]
    MediaDownload { key: String, message: String },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Work was abandoned because the run was cancelled.
    #[error("cancelled before completion")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a remote-unavailable error from any displayable message.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a `std::io::Error` raised while writing an output document.
    pub fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Whether this error invalidates the whole run rather than one document.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::RemoteAuth(_))
    }

    /// Short machine-friendly name of the failure class, carried into run
    /// summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::RemoteUnavailable { .. } => "remote_unavailable",
            Self::RemoteAuth(_) => "remote_auth",
            Self::Remote { .. } => "remote",
            Self::Parse { .. } => "parse",
            Self::Io { .. } => "io",
            Self::WriteFailed { .. } => "write_failed",
            Self::MediaDownload { .. } => "media_download_failed",
            Self::Validation { .. } => "validation",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = MirrorError::config("NOTION_TOKEN is not set");
        assert_eq!(err.to_string(), "config error: NOTION_TOKEN is not set");

        let err = MirrorError::Remote {
            status: 404,
            message: "object_not_found".into(),
        };
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[test]
    fn only_auth_and_config_are_fatal() {
        assert!(MirrorError::RemoteAuth("unauthorized".into()).is_fatal());
        assert!(MirrorError::config("bad").is_fatal());
        assert!(!MirrorError::unavailable("429").is_fatal());
        assert!(
            !MirrorError::MediaDownload {
                key: "url:https://x".into(),
                message: "404".into()
            }
            .is_fatal()
        );
        assert!(!MirrorError::write_failed("/tmp/x", std::io::Error::other("disk")).is_fatal());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(MirrorError::Cancelled.kind(), "cancelled");
        assert_eq!(
            MirrorError::unavailable("rate limited").kind(),
            "remote_unavailable"
        );
    }
}
