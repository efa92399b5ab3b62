//! Sync State Store: the persisted record of what was last synced.
//!
//! One JSON file maps document id to a [`SyncStateEntry`]. The store is
//! loaded once at run start, mutated only through [`SyncState::commit`] and
//! [`SyncState::remove`], and written back atomically by
//! [`SyncState::persist`] when something changed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docmirror_shared::{DocumentProperties, MirrorError, Result};

/// Version written to new state files.
pub const SCHEMA_VERSION: u32 = 1;

/// Last fully successful sync of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateEntry {
    /// Revision marker seen at sync time.
    pub revision: DateTime<Utc>,
    pub properties_fingerprint: String,
    /// SHA-256 of the rendered output file.
    pub output_fingerprint: String,
    pub output_path: PathBuf,
    /// Dedup keys of every media asset the document references.
    #[serde(default)]
    pub media_keys: BTreeSet<String>,
    pub synced_at: DateTime<Utc>,
}

impl SyncStateEntry {
    /// Whether `properties` describe the same revision this entry recorded.
    pub fn matches(&self, properties: &DocumentProperties) -> bool {
        self.revision == properties.last_edited
            && self.properties_fingerprint == properties.fingerprint()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateFile {
    schema_version: u32,
    #[serde(default)]
    last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    documents: BTreeMap<String, SyncStateEntry>,
}

/// In-memory sync state with an explicit load/commit/persist lifecycle.
#[derive(Debug)]
pub struct SyncState {
    path: Option<PathBuf>,
    file: StateFile,
    dirty: bool,
}

impl SyncState {
    /// Load the state file at `path`.
    ///
    /// A missing file yields an empty store. A file that cannot be parsed,
    /// or that was written by a newer schema, is logged and ignored so the
    /// run degrades to a full resync instead of failing.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no sync state yet");
                return Ok(Self::empty_at(path));
            }
            Err(e) => return Err(MirrorError::io(path, e)),
        };

        let file: StateFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "sync state unreadable, starting fresh");
                return Ok(Self::empty_at(path));
            }
        };

        if file.schema_version > SCHEMA_VERSION {
            warn!(
                path = %path.display(),
                found = file.schema_version,
                supported = SCHEMA_VERSION,
                "sync state written by a newer version, starting fresh"
            );
            return Ok(Self::empty_at(path));
        }

        info!(
            path = %path.display(),
            documents = file.documents.len(),
            "loaded sync state"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            file,
            dirty: false,
        })
    }

    /// An empty store that persists to `path`, ignoring any existing file.
    pub fn empty_at(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            file: StateFile {
                schema_version: SCHEMA_VERSION,
                ..StateFile::default()
            },
            dirty: false,
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: StateFile {
                schema_version: SCHEMA_VERSION,
                ..StateFile::default()
            },
            dirty: false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SyncStateEntry> {
        self.file.documents.get(id)
    }

    /// A document can be skipped only when its revision marker and property
    /// fingerprint match the stored entry and the output file still exists.
    pub fn is_current(&self, id: &str, properties: &DocumentProperties) -> bool {
        self.get(id)
            .is_some_and(|entry| entry.matches(properties) && entry.output_path.is_file())
    }

    /// Record a fully successful sync, replacing any previous entry.
    pub fn commit(&mut self, id: &str, entry: SyncStateEntry) {
        if self.file.documents.get(id) == Some(&entry) {
            return;
        }
        debug!(document_id = id, "committing sync state entry");
        self.file.documents.insert(id.to_string(), entry);
        self.dirty = true;
    }

    pub fn remove(&mut self, id: &str) -> Option<SyncStateEntry> {
        let removed = self.file.documents.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop every entry (full resync).
    pub fn clear(&mut self) {
        if !self.file.documents.is_empty() {
            self.file.documents.clear();
            self.dirty = true;
        }
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.file.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.file.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.documents.is_empty()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.file.last_sync
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the state durably if anything changed since load.
    ///
    /// Writes go to a sibling temp file that is renamed over the original.
    /// Returns whether a write happened.
    pub async fn persist(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(false);
        };

        self.file.last_sync = Some(Utc::now());
        let json = serde_json::to_string_pretty(&self.file)
            .map_err(|e| MirrorError::parse(format!("failed to serialize sync state: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| MirrorError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(MirrorError::io(&path, e));
        }

        self.dirty = false;
        info!(
            path = %path.display(),
            documents = self.file.documents.len(),
            "persisted sync state"
        );
        Ok(true)
    }
}
