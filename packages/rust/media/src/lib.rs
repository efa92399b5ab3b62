//! Media Manager: resolves media descriptors to local files.
//!
//! Assets are addressed by dedup key: a file already present at the key's
//! path is reused without a network call, otherwise it is downloaded with
//! bounded concurrency. Concurrent requests for the same key within a run
//! share one download.

pub mod naming;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use docmirror_remote::send_with_retry;
use docmirror_shared::{MediaDescriptor, MirrorError, Result, RetryPolicy};

pub use naming::{AssetLocation, file_name, locate};

/// Outcome of resolving one document's media.
#[derive(Debug, Default, Clone)]
pub struct MediaResolution {
    /// Dedup key to site path.
    pub resolved: HashMap<String, String>,
    /// Dedup key and reason, for assets that could not be fetched.
    pub failed: Vec<(String, String)>,
    pub downloaded: usize,
    pub reused: usize,
}

impl MediaResolution {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How a single key was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetched {
    Downloaded,
    Reused,
}

type Slot = Arc<OnceCell<String>>;

/// Downloads and deduplicates media under a static asset root.
///
/// Cheap to clone; clones share the download pool and in-flight table.
#[derive(Clone)]
pub struct MediaManager {
    client: Client,
    static_dir: PathBuf,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MediaManager {
    pub fn new(
        client: Client,
        static_dir: impl Into<PathBuf>,
        download_concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            static_dir: static_dir.into(),
            retry,
            permits: Arc::new(Semaphore::new(download_concurrency.max(1))),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// Resolve every descriptor, downloading what is not on disk yet.
    ///
    /// Descriptors sharing a dedup key are fetched once. A failed asset is
    /// recorded in [`MediaResolution::failed`] and never aborts its siblings.
    #[instrument(skip_all, fields(count = descriptors.len()))]
    pub async fn resolve_all(&self, descriptors: &[MediaDescriptor]) -> MediaResolution {
        let mut resolution = MediaResolution::default();
        let mut tasks = JoinSet::new();
        let mut scheduled = std::collections::HashSet::new();

        for descriptor in descriptors {
            let key = descriptor.dedup_key();
            if !scheduled.insert(key.clone()) {
                continue;
            }
            let manager = self.clone();
            let descriptor = descriptor.clone();
            tasks.spawn(async move {
                let outcome = manager.resolve_one(&descriptor).await;
                (key, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok((site_path, fetched)))) => {
                    match fetched {
                        Fetched::Downloaded => resolution.downloaded += 1,
                        Fetched::Reused => resolution.reused += 1,
                    }
                    resolution.resolved.insert(key, site_path);
                }
                Ok((key, Err(e))) => {
                    warn!(key = %key, error = %e, "media unavailable");
                    resolution.failed.push((key, e.to_string()));
                }
                Err(e) => {
                    warn!(error = %e, "media task failed");
                    resolution.failed.push(("task".into(), e.to_string()));
                }
            }
        }

        resolution.failed.sort();
        debug!(
            resolved = resolution.resolved.len(),
            downloaded = resolution.downloaded,
            reused = resolution.reused,
            failed = resolution.failed.len(),
            "media resolved"
        );
        resolution
    }

    /// Resolve one descriptor to its site path.
    pub async fn resolve(&self, descriptor: &MediaDescriptor) -> Result<String> {
        self.resolve_one(descriptor).await.map(|(path, _)| path)
    }

    async fn resolve_one(&self, descriptor: &MediaDescriptor) -> Result<(String, Fetched)> {
        let key = descriptor.dedup_key();
        let slot = self.slot(&key);

        // Whoever initializes the cell did the work; everyone else reuses it.
        let mut fetched = Fetched::Reused;
        let outcome = &mut fetched;
        let site_path = slot
            .get_or_try_init(|| async move {
                let (path, how) = self.fetch(&key, descriptor).await?;
                *outcome = how;
                Ok::<_, MirrorError>(path)
            })
            .await?
            .clone();
        Ok((site_path, fetched))
    }

    fn slot(&self, key: &str) -> Slot {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    #[instrument(skip(self, descriptor), fields(kind = ?descriptor.kind))]
    async fn fetch(&self, key: &str, descriptor: &MediaDescriptor) -> Result<(String, Fetched)> {
        let location = locate(&self.static_dir, descriptor);

        if tokio::fs::try_exists(&location.path)
            .await
            .map_err(|e| MirrorError::io(&location.path, e))?
        {
            debug!(path = %location.path.display(), "asset already on disk");
            return Ok((location.site_path, Fetched::Reused));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MirrorError::Cancelled)?;

        let bytes = self.download(key, descriptor.url()).await?;
        write_atomic(&location.path, &bytes).await?;

        info!(
            path = %location.path.display(),
            bytes = bytes.len(),
            "downloaded asset"
        );
        Ok((location.site_path, Fetched::Downloaded))
    }

    async fn download(&self, key: &str, url: &str) -> Result<Vec<u8>> {
        let failed = |message: String| MirrorError::MediaDownload {
            key: key.to_string(),
            message,
        };

        let response = send_with_retry(&self.retry, "media download", || self.client.get(url))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| failed(format!("reading body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Write to a sibling temp file and rename into place, so a partial
/// download never looks like a cached asset.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MirrorError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.part"));

    tokio::fs::write(&temp, bytes)
        .await
        .map_err(|e| MirrorError::io(&temp, e))?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(MirrorError::io(path, e));
    }
    Ok(())
}
