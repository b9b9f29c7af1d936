//! Instrumentation around each stage of a reconciliation pass.
//!
//! The engine owns no logger. It calls a [`ReconcileHooks`] implementation
//! at each stage; [`LogHooks`] forwards to the `log` facade and is the
//! default, [`NoopHooks`] stays silent.

use serde::Serialize;

use crate::error::{BatchKind, StoreError};
use crate::model::DiffResults;
use crate::record::Record;
use crate::store::BatchSummary;

/// Counts gathered once classification is complete, before any write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Fresh records received, duplicates included.
    pub fresh: usize,
    /// Former records fetched from the store.
    pub former: usize,
    pub added: usize,
    pub changed: usize,
    /// Refreshed records whose fields did not change (timestamp-only refresh).
    pub unchanged: usize,
    /// Unseen former records past the retention period.
    pub stale: usize,
    /// Unseen former records still inside the retention period.
    pub retained: usize,
    /// Fresh records dropped because a later record had the same identity.
    pub duplicates: usize,
}

pub trait ReconcileHooks {
    fn fetched(&self, _former: usize) {}

    /// `record` (at `position`) was superseded by the later record at `kept`.
    fn duplicate_dropped(&self, _record: &Record, _position: usize, _kept: usize) {}

    fn classified(&self, _stats: &PassStats) {}

    fn batch_submitted(&self, _kind: BatchKind, _ops: usize) {}

    fn batch_completed(&self, _kind: BatchKind, _outcome: &Result<BatchSummary, StoreError>) {}

    fn finished(&self, _results: &DiffResults) {}
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ReconcileHooks for NoopHooks {}

/// Emits one log line per stage under the given target.
#[derive(Debug, Clone)]
pub struct LogHooks {
    target: String,
}

impl LogHooks {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for LogHooks {
    fn default() -> Self {
        Self::new(module_path!())
    }
}

impl ReconcileHooks for LogHooks {
    fn fetched(&self, former: usize) {
        log::debug!(target: self.target.as_str(), "fetched {former} former record(s)");
    }

    fn duplicate_dropped(&self, record: &Record, position: usize, kept: usize) {
        let identity = record
            .identity_filter()
            .map(|f| f.canonical_key())
            .unwrap_or_default();
        log::warn!(
            target: self.target.as_str(),
            "fresh record #{position} {identity} superseded by duplicate #{kept}"
        );
    }

    fn classified(&self, stats: &PassStats) {
        log::info!(
            target: self.target.as_str(),
            "classified {} fresh against {} former: {} added, {} changed, {} unchanged, {} stale, {} retained",
            stats.fresh,
            stats.former,
            stats.added,
            stats.changed,
            stats.unchanged,
            stats.stale,
            stats.retained,
        );
    }

    fn batch_submitted(&self, kind: BatchKind, ops: usize) {
        log::debug!(target: self.target.as_str(), "submitting {kind} batch of {ops} op(s)");
    }

    fn batch_completed(&self, kind: BatchKind, outcome: &Result<BatchSummary, StoreError>) {
        match outcome {
            Ok(summary) => log::debug!(
                target: self.target.as_str(),
                "{kind} batch done: {} inserted, {} replaced, {} deleted, {} unmatched",
                summary.inserted,
                summary.replaced,
                summary.deleted,
                summary.unmatched,
            ),
            Err(e) => log::warn!(target: self.target.as_str(), "{kind} batch failed: {e}"),
        }
    }

    fn finished(&self, results: &DiffResults) {
        log::info!(target: self.target.as_str(), "pass finished: {}", results.summary());
    }
}
