//! Persistence adapter contract and an in-process implementation.
//!
//! The engine only ever needs a full scan and an unordered batch of
//! insert / replace-one / delete-one operations keyed by identity filters.

use serde::Serialize;

use crate::error::{OpFailure, StoreError};
use crate::record::{IdentityFilter, Record};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One mutation inside a batch. Execution order across a batch is unspecified.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(Record),
    /// Replace the first row matching `filter` with `row`.
    Replace { filter: IdentityFilter, row: Record },
    /// Delete the first row matching `filter`.
    Delete { filter: IdentityFilter },
}

impl WriteOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Replace { .. } => "replace",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Counts reported by a batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub deleted: usize,
    /// Replaces and deletes whose filter matched no row.
    pub unmatched: usize,
}

impl BatchSummary {
    /// Operations that completed without error, matched or not.
    pub fn applied(&self) -> usize {
        self.inserted + self.replaced + self.deleted + self.unmatched
    }
}

/// Narrow storage contract consumed by the reconciliation engine.
///
/// Implementations own transport concerns (retries, timeouts). A batch must
/// attempt every operation; per-operation failures are reported together as
/// [`StoreError::Partial`] once the batch is done.
pub trait StateStore {
    /// Every persisted record. No incremental query.
    fn fetch_all(&mut self) -> Result<Vec<Record>, StoreError>;

    /// Apply `ops` without ordering guarantees between them.
    fn batch_write(&mut self, ops: Vec<WriteOp>) -> Result<BatchSummary, StoreError>;
}

impl<S: StateStore + ?Sized> StateStore for &mut S {
    fn fetch_all(&mut self) -> Result<Vec<Record>, StoreError> {
        (**self).fetch_all()
    }

    fn batch_write(&mut self, ops: Vec<WriteOp>) -> Result<BatchSummary, StoreError> {
        (**self).batch_write(ops)
    }
}

impl<S: StateStore + ?Sized> StateStore for Box<S> {
    fn fetch_all(&mut self) -> Result<Vec<Record>, StoreError> {
        (**self).fetch_all()
    }

    fn batch_write(&mut self, ops: Vec<WriteOp>) -> Result<BatchSummary, StoreError> {
        (**self).batch_write(ops)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Rows kept in a `Vec`, matched by filter against each row's data.
///
/// Also records how many batch calls it received and can be told to fail,
/// which is what the engine's tests lean on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<Record>,
    batch_calls: Vec<usize>,
    fail_fetch: Option<String>,
    reject: Vec<IdentityFilter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Record>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Number of ops in each `batch_write` call received so far.
    pub fn batch_calls(&self) -> &[usize] {
        &self.batch_calls
    }

    /// Make the next `fetch_all` calls fail.
    pub fn fail_fetch(&mut self, message: impl Into<String>) {
        self.fail_fetch = Some(message.into());
    }

    /// Fail any op whose target (inserted row or filter) matches `filter`.
    pub fn reject_matching(&mut self, filter: IdentityFilter) {
        self.reject.push(filter);
    }

    fn rejects(&self, op: &WriteOp) -> bool {
        self.reject.iter().any(|r| match op {
            WriteOp::Insert(row) | WriteOp::Replace { row, .. } => r.matches(&row.data),
            WriteOp::Delete { filter } => r.matches(filter.fields()),
        })
    }

    fn position(&self, filter: &IdentityFilter) -> Option<usize> {
        self.rows.iter().position(|row| filter.matches(&row.data))
    }
}

impl StateStore for MemoryStore {
    fn fetch_all(&mut self) -> Result<Vec<Record>, StoreError> {
        if let Some(ref message) = self.fail_fetch {
            return Err(StoreError::Unavailable(message.clone()));
        }
        Ok(self.rows.clone())
    }

    fn batch_write(&mut self, ops: Vec<WriteOp>) -> Result<BatchSummary, StoreError> {
        self.batch_calls.push(ops.len());

        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();

        for (index, op) in ops.into_iter().enumerate() {
            if self.rejects(&op) {
                failures.push(OpFailure {
                    index,
                    message: format!("{} rejected", op.kind()),
                });
                continue;
            }
            match op {
                WriteOp::Insert(row) => {
                    self.rows.push(row);
                    summary.inserted += 1;
                }
                WriteOp::Replace { filter, row } => match self.position(&filter) {
                    Some(pos) => {
                        self.rows[pos] = row;
                        summary.replaced += 1;
                    }
                    None => summary.unmatched += 1,
                },
                WriteOp::Delete { filter } => match self.position(&filter) {
                    Some(pos) => {
                        self.rows.remove(pos);
                        summary.deleted += 1;
                    }
                    None => summary.unmatched += 1,
                },
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(StoreError::Partial { failures, summary })
        }
    }
}
