//! Application configuration for docmirror.
//!
//! User config lives at `~/.docmirror/docmirror.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MirrorError, Result};
use crate::types::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docmirror.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docmirror";

// ---------------------------------------------------------------------------
// Config structs (matching docmirror.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote document store access.
    #[serde(default)]
    pub remote: RemoteSection,

    /// Local output layout and concurrency.
    #[serde(default)]
    pub sync: SyncSection,

    /// Names of the remote properties the engine reads.
    #[serde(default)]
    pub properties: PropertyNames,
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    /// API root, without trailing slash.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Value sent in the `Notion-Version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Name of the env var holding the API token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Database to mirror. Falls back to `database_id_env` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,

    /// Name of the env var holding the database id.
    #[serde(default = "default_database_id_env")]
    pub database_id_env: String,

    /// Page size for list and block-children requests (max 100 upstream).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Upper bound for a single backoff sleep.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_version: default_api_version(),
            token_env: default_token_env(),
            database_id: None,
            database_id_env: default_database_id_env(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.notion.com/v1".into()
}
fn default_api_version() -> String {
    "2022-06-28".into()
}
fn default_token_env() -> String {
    "NOTION_TOKEN".into()
}
fn default_database_id_env() -> String {
    "NOTION_DATABASE_ID".into()
}
fn default_page_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    30_000
}

/// `[sync]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Root of the static-site content tree.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    /// Content section that receives one file per document.
    #[serde(default = "default_section")]
    pub section: String,

    /// Static asset root that receives downloaded media.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Location of the persisted sync state.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Documents processed at the same time.
    #[serde(default = "default_concurrency")]
    pub document_concurrency: u32,

    /// Media downloads in flight at the same time, across all documents.
    #[serde(default = "default_concurrency")]
    pub download_concurrency: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            section: default_section(),
            static_dir: default_static_dir(),
            state_file: default_state_file(),
            document_concurrency: default_concurrency(),
            download_concurrency: default_concurrency(),
        }
    }
}

fn default_content_dir() -> String {
    "./content".into()
}
fn default_section() -> String {
    "posts".into()
}
fn default_static_dir() -> String {
    "./static".into()
}
fn default_state_file() -> String {
    ".docmirror-state.json".into()
}
fn default_concurrency() -> u32 {
    4
}

/// `[properties]` section: names of the remote document properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyNames {
    #[serde(default = "default_title_property")]
    pub title: String,
    #[serde(default = "default_published_property")]
    pub published: String,
    #[serde(default = "default_date_property")]
    pub date: String,
    #[serde(default = "default_slug_property")]
    pub slug: String,
    #[serde(default = "default_tags_property")]
    pub tags: String,
}

impl Default for PropertyNames {
    fn default() -> Self {
        Self {
            title: default_title_property(),
            published: default_published_property(),
            date: default_date_property(),
            slug: default_slug_property(),
            tags: default_tags_property(),
        }
    }
}

fn default_title_property() -> String {
    "Title".into()
}
fn default_published_property() -> String {
    "Published".into()
}
fn default_date_property() -> String {
    "Date".into()
}
fn default_slug_property() -> String {
    "Slug".into()
}
fn default_tags_property() -> String {
    "Tags".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime remote-client configuration with credentials resolved.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_base: String,
    pub api_version: String,
    pub token: String,
    pub database_id: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub properties: PropertyNames,
}

impl RemoteConfig {
    /// Resolve credentials from the environment and build the runtime config.
    ///
    /// `database_override` (from a CLI flag) wins over the file and env.
    pub fn resolve(config: &AppConfig, database_override: Option<&str>) -> Result<Self> {
        let token = resolve_token(config)?;
        let database_id = match database_override {
            Some(id) => id.to_string(),
            None => resolve_database_id(config)?,
        };

        Ok(Self {
            api_base: config.remote.api_base.trim_end_matches('/').to_string(),
            api_version: config.remote.api_version.clone(),
            token,
            database_id,
            page_size: config.remote.page_size.clamp(1, 100),
            timeout: Duration::from_secs(config.remote.timeout_secs),
            retry: RetryPolicy::from(&config.remote),
            properties: config.properties.clone(),
        })
    }
}

impl From<&RemoteSection> for RetryPolicy {
    fn from(section: &RemoteSection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.retry_base_ms),
            max_delay: Duration::from_millis(section.retry_max_ms),
        }
    }
}

/// Runtime sync configuration: local layout and concurrency limits.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub content_dir: PathBuf,
    pub section: String,
    pub static_dir: PathBuf,
    pub state_file: PathBuf,
    pub document_concurrency: usize,
    pub download_concurrency: usize,
}

impl From<&AppConfig> for SyncConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            content_dir: PathBuf::from(&config.sync.content_dir),
            section: config.sync.section.clone(),
            static_dir: PathBuf::from(&config.sync.static_dir),
            state_file: PathBuf::from(&config.sync.state_file),
            document_concurrency: config.sync.document_concurrency.max(1) as usize,
            download_concurrency: config.sync.download_concurrency.max(1) as usize,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docmirror/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| MirrorError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docmirror/docmirror.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MirrorError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| MirrorError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MirrorError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| MirrorError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| MirrorError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API token from the env var named in the config.
pub fn resolve_token(config: &AppConfig) -> Result<String> {
    let var_name = &config.remote.token_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(MirrorError::config(format!(
            "API token not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Database id from the config file, or the env var named there.
pub fn resolve_database_id(config: &AppConfig) -> Result<String> {
    if let Some(id) = config.remote.database_id.as_deref().filter(|s| !s.is_empty()) {
        return Ok(id.to_string());
    }
    let var_name = &config.remote.database_id_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(MirrorError::config(format!(
            "database id not configured. Set [remote].database_id or the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("content_dir"));
        assert!(toml_str.contains("NOTION_TOKEN"));
        assert!(!toml_str.contains("database_id ="));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.remote.max_retries, 3);
        assert_eq!(parsed.sync.section, "posts");
        assert_eq!(parsed.properties.slug, "Slug");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[remote]
database_id = "abc123"
retry_base_ms = 10

[sync]
content_dir = "/srv/site/content"

[properties]
tags = "Labels"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.remote.database_id.as_deref(), Some("abc123"));
        assert_eq!(config.remote.page_size, 100);
        assert_eq!(config.sync.content_dir, "/srv/site/content");
        assert_eq!(config.sync.static_dir, "./static");
        assert_eq!(config.properties.tags, "Labels");
        assert_eq!(config.properties.title, "Title");
    }

    #[test]
    fn sync_config_from_app_config() {
        let mut app = AppConfig::default();
        app.sync.document_concurrency = 0;
        let sync = SyncConfig::from(&app);
        assert_eq!(sync.document_concurrency, 1);
        assert_eq!(sync.download_concurrency, 4);
        assert_eq!(sync.section, "posts");
    }

    #[test]
    fn retry_policy_from_section() {
        let section = RemoteSection::default();
        let policy = RetryPolicy::from(&section);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn token_resolution_requires_env() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.remote.token_env = "DM_TEST_NONEXISTENT_TOKEN_12345".into();
        let result = resolve_token(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API token not found"));
    }

    #[test]
    fn database_id_prefers_config_file() {
        let mut config = AppConfig::default();
        config.remote.database_id = Some("db-from-file".into());
        config.remote.database_id_env = "DM_TEST_NONEXISTENT_DB_12345".into();
        assert_eq!(resolve_database_id(&config).unwrap(), "db-from-file");

        config.remote.database_id = None;
        assert!(resolve_database_id(&config).is_err());
    }
}
