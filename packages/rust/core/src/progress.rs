//! Progress callbacks for long-running sync runs.

use crate::sync::{DocumentOutcome, RunSummary};

/// Progress callback for reporting sync status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the listing is complete.
    fn documents_listed(&self, total: usize, to_sync: usize);
    /// Called as each document settles.
    fn document_done(
        &self,
        title: &str,
        outcome: &DocumentOutcome,
        current: usize,
        total: usize,
    );
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn documents_listed(&self, _total: usize, _to_sync: usize) {}
    fn document_done(
        &self,
        _title: &str,
        _outcome: &DocumentOutcome,
        _current: usize,
        _total: usize,
    ) {
    }
    fn done(&self, _summary: &RunSummary) {}
}
