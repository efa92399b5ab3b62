//! Sync Orchestrator: list, decide, convert, resolve media, write, commit.
//!
//! Each document moves through
//! `Pending -> Fetching -> Converting -> ResolvingMedia -> Writing -> Committed`
//! or stops in `Failed`. Documents run concurrently on a bounded pool and
//! never wait on each other; only the run loop touches the [`SyncState`],
//! so commits are serialized.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use docmirror_markdown::{ConvertContext, convert};
use docmirror_media::MediaManager;
use docmirror_remote::{DocumentFilter, DocumentPager, DocumentSource};
use docmirror_shared::{
    DocumentSummary, MediaDescriptor, MediaKind, MirrorError, Result, SyncConfig, compact_id,
};
use docmirror_storage::{SyncState, SyncStateEntry};

use crate::frontmatter::FrontMatter;
use crate::progress::ProgressReporter;
use crate::writer::{DocumentWriter, WriteResult};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Skip documents whose revision and properties match the stored state.
    #[default]
    Incremental,
    /// Ignore prior state. `remove_outputs` also deletes the section's
    /// documents before running. Downloaded media is kept either way.
    Full { remove_outputs: bool },
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Remove output and state of documents no longer listed upstream.
    pub prune: bool,
    /// Cancel the run once this much time has passed.
    pub deadline: Option<Duration>,
    pub filter: DocumentFilter,
}

/// Where a document was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentPhase {
    Pending,
    Fetching,
    Converting,
    ResolvingMedia,
    Writing,
    Committed,
}

impl fmt::Display for DocumentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Converting => "converting",
            Self::ResolvingMedia => "resolving media",
            Self::Writing => "writing",
            Self::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// Terminal state of one document in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Committed { result: WriteResult },
    /// Unchanged since the last successful sync.
    Skipped,
    Failed {
        phase: DocumentPhase,
        /// Failure class, as named by [`MirrorError::kind`].
        kind: &'static str,
        reason: String,
    },
    /// Never started because the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: String,
    pub title: String,
    pub phase: DocumentPhase,
    pub kind: &'static str,
    pub reason: String,
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) failed while {} [{}]: {}",
            self.title, self.id, self.phase, self.kind, self.reason
        )
    }
}

/// Aggregate result of one sync run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub listed: usize,
    /// Documents whose state entry was committed this run.
    pub committed: usize,
    /// Committed documents whose file content actually changed.
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pruned: usize,
    pub failures: Vec<DocumentFailure>,
    /// Non-fatal findings such as unsupported blocks.
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            listed: 0,
            committed: 0,
            written: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
            pruned: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// No document failed or was left unprocessed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    fn record(&mut self, id: &str, title: &str, outcome: &DocumentOutcome) {
        match outcome {
            DocumentOutcome::Committed { result } => {
                self.committed += 1;
                if *result == WriteResult::Written {
                    self.written += 1;
                }
            }
            DocumentOutcome::Skipped => self.skipped += 1,
            DocumentOutcome::Cancelled => self.cancelled += 1,
            DocumentOutcome::Failed {
                phase,
                kind,
                reason,
            } => {
                self.failed += 1;
                self.failures.push(DocumentFailure {
                    id: id.to_string(),
                    title: title.to_string(),
                    phase: *phase,
                    kind: *kind,
                    reason: reason.clone(),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives a full sync run against a [`DocumentSource`].
pub struct SyncEngine<S> {
    source: Arc<S>,
    media: MediaManager,
    writer: Arc<DocumentWriter>,
    section: String,
    document_concurrency: usize,
}

impl<S: DocumentSource + 'static> SyncEngine<S> {
    pub fn new(source: Arc<S>, media: MediaManager, config: &SyncConfig) -> Self {
        Self {
            source,
            media,
            writer: Arc::new(DocumentWriter::new(&config.content_dir, &config.section)),
            section: config.section.clone(),
            document_concurrency: config.document_concurrency.max(1),
        }
    }

    /// Run one sync pass, committing into `state` and persisting it at the end.
    ///
    /// Per-document failures are reported in the summary. Only fatal errors
    /// (rejected credentials, configuration) and a failed listing return
    /// `Err`; state committed before a fatal error is still persisted.
    #[instrument(skip_all, fields(mode = ?options.mode, prune = options.prune))]
    pub async fn run(
        &self,
        state: &mut SyncState,
        options: &SyncOptions,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new();
        let cancel = cancel.child_token();
        let _deadline = options.deadline.map(|limit| arm_deadline(limit, cancel.clone()));

        info!(run_id = %summary.run_id, "starting sync run");

        // --- Listing ---
        progress.phase("Listing documents");
        let pager = DocumentPager::new(self.source.as_ref(), options.filter);
        let listed = tokio::select! {
            biased;
            listed = pager.collect_all() => listed?,
            _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
        };
        summary.listed = listed.len();
        let listed_ids: HashSet<String> = listed.iter().map(|d| d.id.clone()).collect();

        // --- Full resync ---
        let previous_outputs: HashMap<String, PathBuf> = state
            .document_ids()
            .filter_map(|id| state.get(id).map(|e| (id.to_string(), e.output_path.clone())))
            .collect();
        if let SyncMode::Full { remove_outputs } = options.mode {
            state.clear();
            if remove_outputs {
                progress.phase("Removing previous output");
                self.writer.clean_section().await?;
            }
        }

        // --- Plan ---
        let mut slugs = HashMap::new();
        let mut slug_owners: HashMap<String, String> = HashMap::new();
        let mut pending = Vec::new();
        let mut skipped = Vec::new();

        for doc in listed {
            if let Some(owner) = slug_owners.get(&doc.properties.slug) {
                let err = MirrorError::validation(format!(
                    "slug `{}` is already used by {owner}",
                    doc.properties.slug
                ));
                let outcome = DocumentOutcome::Failed {
                    phase: DocumentPhase::Pending,
                    kind: err.kind(),
                    reason: err.to_string(),
                };
                warn!(document_id = %doc.id, slug = %doc.properties.slug, "duplicate slug");
                summary.record(&doc.id, &doc.properties.title, &outcome);
                continue;
            }
            slug_owners.insert(doc.properties.slug.clone(), doc.id.clone());
            slugs.insert(compact_id(&doc.id), doc.properties.slug.clone());

            if state.is_current(&doc.id, &doc.properties) {
                skipped.push(doc);
            } else {
                pending.push(doc);
            }
        }

        let live_outputs: HashSet<PathBuf> = slug_owners
            .keys()
            .map(|slug| self.writer.output_path(slug))
            .collect();

        let total = pending.len() + skipped.len();
        progress.documents_listed(summary.listed, pending.len());
        info!(
            listed = summary.listed,
            to_sync = pending.len(),
            unchanged = skipped.len(),
            "planned sync"
        );

        let mut settled = 0;
        for doc in &skipped {
            settled += 1;
            summary.record(&doc.id, &doc.properties.title, &DocumentOutcome::Skipped);
            progress.document_done(
                &doc.properties.title,
                &DocumentOutcome::Skipped,
                settled,
                total,
            );
        }

        // --- Documents ---
        progress.phase("Syncing documents");
        let job = DocumentJob {
            source: Arc::clone(&self.source),
            media: self.media.clone(),
            writer: Arc::clone(&self.writer),
            ctx: Arc::new(ConvertContext::new(self.section.clone(), slugs)),
            permits: Arc::new(Semaphore::new(self.document_concurrency)),
            cancel: cancel.clone(),
        };
        let mut tasks = JoinSet::new();
        for doc in pending {
            let span = info_span!("document", document_id = %doc.id);
            tasks.spawn(job.clone().run(doc).instrument(span));
        }

        let mut fatal: Option<MirrorError> = None;
        let mut stale_outputs: Vec<(String, PathBuf)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            settled += 1;
            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "document task failed");
                    let outcome = DocumentOutcome::Failed {
                        phase: DocumentPhase::Pending,
                        kind: "task_aborted",
                        reason: e.to_string(),
                    };
                    summary.record("unknown", "unknown", &outcome);
                    continue;
                }
            };

            let DocumentReport {
                document,
                outcome,
                warnings,
                entry,
                error,
            } = report;
            summary.warnings.extend(warnings);

            if let Some(entry) = entry {
                let moved = previous_outputs
                    .get(&document.id)
                    .filter(|old| **old != entry.output_path);
                if let Some(old) = moved {
                    stale_outputs.push((document.id.clone(), old.clone()));
                }
                state.commit(&document.id, entry);
            }

            if let Some(e) = error.filter(MirrorError::is_fatal) {
                error!(document_id = %document.id, error = %e, "fatal error, cancelling run");
                cancel.cancel();
                fatal.get_or_insert(e);
            }

            summary.record(&document.id, &document.properties.title, &outcome);
            progress.document_done(&document.properties.title, &outcome, settled, total);
        }

        // --- Prune ---
        if options.prune && fatal.is_none() {
            let gone: Vec<String> = state
                .document_ids()
                .filter(|id| !listed_ids.contains(*id))
                .map(str::to_string)
                .collect();
            for id in gone {
                if let Some(entry) = state.remove(&id) {
                    stale_outputs.push((id, entry.output_path));
                    summary.pruned += 1;
                }
            }
        }

        // --- Stale outputs ---
        // A path vacated by one document may already belong to another
        // listed document, whatever order the commits arrived in.
        for (id, path) in stale_outputs {
            if live_outputs.contains(&path) {
                debug!(
                    document_id = %id,
                    path = %path.display(),
                    "previous output reused by another document"
                );
                continue;
            }
            if let Err(e) = self.writer.remove(&path).await {
                warn!(document_id = %id, error = %e, "could not remove stale output");
            }
        }

        state.persist().await?;
        summary.elapsed = started.elapsed();

        info!(
            run_id = %summary.run_id,
            committed = summary.committed,
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            pruned = summary.pruned,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "sync run complete"
        );
        progress.done(&summary);

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

/// Cancels `token` after `limit`; the timer stops when the guard drops.
fn arm_deadline(limit: Duration, token: CancellationToken) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        warn!(limit_secs = limit.as_secs(), "deadline reached, cancelling run");
        token.cancel();
    }))
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ---------------------------------------------------------------------------
// Per-document work
// ---------------------------------------------------------------------------

struct DocumentReport {
    document: DocumentSummary,
    outcome: DocumentOutcome,
    warnings: Vec<String>,
    /// Present only when every step succeeded.
    entry: Option<SyncStateEntry>,
    error: Option<MirrorError>,
}

/// Everything a document task needs; cloned into each task.
struct DocumentJob<S> {
    source: Arc<S>,
    media: MediaManager,
    writer: Arc<DocumentWriter>,
    ctx: Arc<ConvertContext>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<S> Clone for DocumentJob<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            media: self.media.clone(),
            writer: Arc::clone(&self.writer),
            ctx: Arc::clone(&self.ctx),
            permits: Arc::clone(&self.permits),
            cancel: self.cancel.clone(),
        }
    }
}

/// A document that reached the writer.
struct Processed {
    result: WriteResult,
    entry: SyncStateEntry,
    media_failures: Vec<(String, String)>,
}

impl<S: DocumentSource + 'static> DocumentJob<S> {
    async fn run(self, document: DocumentSummary) -> DocumentReport {
        let cancelled = |document| DocumentReport {
            document,
            outcome: DocumentOutcome::Cancelled,
            warnings: Vec::new(),
            entry: None,
            error: None,
        };

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return cancelled(document),
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return cancelled(document),
            },
        };
        if self.cancel.is_cancelled() {
            return cancelled(document);
        }

        let mut warnings = Vec::new();
        match self.process(&document, &mut warnings).await {
            Ok(processed) if processed.media_failures.is_empty() => {
                debug!(result = ?processed.result, "document committed");
                DocumentReport {
                    document,
                    outcome: DocumentOutcome::Committed {
                        result: processed.result,
                    },
                    warnings,
                    entry: Some(processed.entry),
                    error: None,
                }
            }
            Ok(processed) => {
                let reason = processed
                    .media_failures
                    .iter()
                    .map(|(key, message)| format!("{key}: {message}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(
                    unavailable = processed.media_failures.len(),
                    "written with unresolved media, not committed"
                );
                DocumentReport {
                    document,
                    outcome: DocumentOutcome::Failed {
                        phase: DocumentPhase::ResolvingMedia,
                        kind: "media_download_failed",
                        reason,
                    },
                    warnings,
                    entry: None,
                    error: None,
                }
            }
            Err((phase, e)) => {
                warn!(%phase, error = %e, "document failed");
                if e.is_fatal() {
                    // Before the permit is released, so waiting documents see it.
                    self.cancel.cancel();
                }
                DocumentReport {
                    document,
                    outcome: DocumentOutcome::Failed {
                        phase,
                        kind: e.kind(),
                        reason: e.to_string(),
                    },
                    warnings,
                    entry: None,
                    error: Some(e),
                }
            }
        }
    }

    async fn process(
        &self,
        listed: &DocumentSummary,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<Processed, (DocumentPhase, MirrorError)> {
        let at = |phase: DocumentPhase| move |e: MirrorError| (phase, e);

        // Fetching: a fresh property snapshot pairs the committed revision
        // with the blocks actually fetched.
        let properties = self
            .source
            .fetch_properties(&listed.id)
            .await
            .map_err(at(DocumentPhase::Fetching))?;
        let blocks = self
            .source
            .fetch_block_tree(&listed.id)
            .await
            .map_err(at(DocumentPhase::Fetching))?;

        // Converting
        let mut converted = convert(&blocks, &self.ctx);
        for diagnostic in &converted.diagnostics {
            warn!(%diagnostic, "conversion warning");
            warnings.push(format!("{}: {diagnostic}", properties.title));
        }

        // ResolvingMedia
        let mut descriptors = converted.media();
        let cover = properties
            .cover
            .clone()
            .map(|source| MediaDescriptor::new(MediaKind::Image, source));
        if let Some(cover) = &cover {
            if !descriptors.iter().any(|d| d.dedup_key() == cover.dedup_key()) {
                descriptors.push(cover.clone());
            }
        }
        let resolution = self.media.resolve_all(&descriptors).await;
        let unresolved = converted.body.resolve(&resolution.resolved);
        if unresolved > 0 {
            debug!(unresolved, "placeholders left unresolved");
        }
        let cover_path = cover.and_then(|c| resolution.resolved.get(&c.dedup_key()).cloned());

        // Writing
        let front_matter = FrontMatter::new(
            &properties,
            converted.has_math,
            converted.has_mermaid,
            cover_path,
        );
        let outcome = self
            .writer
            .write(&properties.slug, &front_matter, &converted.body.render())
            .await
            .map_err(at(DocumentPhase::Writing))?;

        let entry = SyncStateEntry {
            revision: properties.last_edited,
            properties_fingerprint: properties.fingerprint(),
            output_fingerprint: outcome.fingerprint,
            output_path: outcome.path,
            media_keys: descriptors
                .iter()
                .map(MediaDescriptor::dedup_key)
                .collect::<BTreeSet<_>>(),
            synced_at: Utc::now(),
        };

        Ok(Processed {
            result: outcome.result,
            entry,
            media_failures: resolution.failed,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
