use chrono::{DateTime, Duration, Utc};

use crate::diff::diff_fields;
use crate::error::{BatchFailure, BatchKind, ReconcileError};
use crate::hooks::{LogHooks, PassStats, ReconcileHooks};
use crate::model::{ChangedRecord, DiffResults};
use crate::record::{IdentityIndex, Record};
use crate::retention::RetentionPolicy;
use crate::store::{StateStore, WriteOp};

/// Run one pass against `store`, evaluating retention at the current instant.
pub fn reconcile<S: StateStore + ?Sized>(
    fresh_records: Vec<Record>,
    store: &mut S,
    retention_period: Duration,
) -> Result<DiffResults, ReconcileError> {
    Reconciler::new()
        .retention(retention_period)
        .reconcile(fresh_records, store)
}

/// Reconciliation engine: retention policy plus instrumentation hooks.
///
/// Passes over the same record set must be serialized by the caller; the
/// engine works from one snapshot of the former state per pass and never
/// re-reads after writing.
pub struct Reconciler {
    retention: RetentionPolicy,
    hooks: Box<dyn ReconcileHooks>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            hooks: Box::new(LogHooks::default()),
        }
    }

    #[must_use]
    pub fn retention(mut self, period: Duration) -> Self {
        self.retention = RetentionPolicy::new(period);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl ReconcileHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn reconcile<S: StateStore + ?Sized>(
        &self,
        fresh_records: Vec<Record>,
        store: &mut S,
    ) -> Result<DiffResults, ReconcileError> {
        self.reconcile_at(fresh_records, store, Utc::now())
    }

    /// Run one pass with `now` as the reference instant for retention.
    ///
    /// Order of work: validate fresh identities, fetch, partition, classify,
    /// submit the upsert batch, submit the delete batch. Both batches are
    /// attempted even if the first fails; failures are returned together.
    pub fn reconcile_at<S: StateStore + ?Sized>(
        &self,
        fresh_records: Vec<Record>,
        store: &mut S,
        now: DateTime<Utc>,
    ) -> Result<DiffResults, ReconcileError> {
        // Malformed fresh records abort before any I/O.
        let filters = fresh_records
            .iter()
            .map(Record::identity_filter)
            .collect::<Result<Vec<_>, _>>()?;

        let former = store.fetch_all().map_err(ReconcileError::Fetch)?;
        self.hooks.fetched(former.len());

        let mut stats = PassStats {
            fresh: fresh_records.len(),
            former: former.len(),
            ..PassStats::default()
        };

        let keep = self.dedupe(&fresh_records, &mut stats);

        // Partition once. Every former row identity-equal to some fresh
        // record is refreshed, duplicates included; only the first one is the
        // diff counterpart and the target of the replace.
        let former_index = IdentityIndex::build(&former);
        let mut refreshed = vec![false; former.len()];
        let counterparts: Vec<Option<usize>> = fresh_records
            .iter()
            .zip(&keep)
            .map(|(record, &kept)| {
                let hits = former_index.find_all(record);
                for &pos in &hits {
                    refreshed[pos] = true;
                }
                if kept {
                    hits.first().copied()
                } else {
                    None
                }
            })
            .collect();

        let mut results = DiffResults::default();
        let mut upserts = Vec::new();

        for (((record, filter), counterpart), kept) in fresh_records
            .into_iter()
            .zip(filters)
            .zip(counterparts)
            .zip(keep)
        {
            if !kept {
                continue;
            }
            match counterpart {
                None => {
                    upserts.push(WriteOp::Insert(record.clone()));
                    results.added.push(record);
                }
                Some(pos) => {
                    // Always replace, so an unchanged record still gets its
                    // timestamp refreshed and is not later evicted as stale.
                    upserts.push(WriteOp::Replace {
                        filter,
                        row: record.clone(),
                    });
                    let diff = diff_fields(&former[pos].data, &record.data);
                    match ChangedRecord::from_diff(record, diff) {
                        Some(changed) => results.changed.push(changed),
                        None => stats.unchanged += 1,
                    }
                }
            }
        }

        let mut deletes = Vec::new();
        for (record, _) in former.iter().zip(&refreshed).filter(|&(_, &seen)| !seen) {
            if !self.retention.is_stale(record, now) {
                stats.retained += 1;
                continue;
            }
            deletes.push(WriteOp::Delete {
                filter: record.identity_filter()?,
            });
            results.removed.push(record.clone());
        }

        stats.added = results.added.len();
        stats.changed = results.changed.len();
        stats.stale = results.removed.len();
        self.hooks.classified(&stats);

        let mut failures = Vec::new();
        self.submit(store, BatchKind::Upsert, upserts, &mut failures);
        self.submit(store, BatchKind::Delete, deletes, &mut failures);

        if !failures.is_empty() {
            return Err(ReconcileError::Write { failures });
        }

        self.hooks.finished(&results);
        Ok(results)
    }

    /// Last occurrence wins: `keep[i]` is false when a later fresh record
    /// has the same identity.
    fn dedupe(&self, fresh: &[Record], stats: &mut PassStats) -> Vec<bool> {
        let index = IdentityIndex::build(fresh);
        fresh
            .iter()
            .enumerate()
            .map(|(pos, record)| match index.find_last(record) {
                Some(last) if last > pos => {
                    stats.duplicates += 1;
                    self.hooks.duplicate_dropped(record, pos, last);
                    false
                }
                _ => true,
            })
            .collect()
    }

    fn submit<S: StateStore + ?Sized>(
        &self,
        store: &mut S,
        kind: BatchKind,
        ops: Vec<WriteOp>,
        failures: &mut Vec<BatchFailure>,
    ) {
        if ops.is_empty() {
            return;
        }
        self.hooks.batch_submitted(kind, ops.len());
        let outcome = store.batch_write(ops);
        self.hooks.batch_completed(kind, &outcome);
        if let Err(error) = outcome {
            failures.push(BatchFailure { kind, error });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
