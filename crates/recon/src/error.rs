use std::fmt;

use thiserror::Error;

use crate::store::BatchSummary;

/// Data-integrity errors raised while working with a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// A declared identifying field is absent from the record's data.
    #[error("identifying field '{field}' is missing from record data")]
    MissingIdentityField { field: String },
}

/// Errors reported by a persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A persisted row could not be decoded, or a record could not be encoded.
    #[error("store codec error: {0}")]
    Codec(String),
    /// Some operations of a batch failed. Every operation was attempted.
    #[error(
        "{} batch operation(s) failed, {} applied (first: {})",
        .failures.len(),
        .summary.applied(),
        first_failure(.failures)
    )]
    Partial {
        failures: Vec<OpFailure>,
        summary: BatchSummary,
    },
}

/// One failed operation inside a batch, identified by its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    pub index: usize,
    pub message: String,
}

impl fmt::Display for OpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op #{}: {}", self.index, self.message)
    }
}

fn first_failure(failures: &[OpFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".into())
}

/// Which of the two per-pass batches a write failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// Inserts of added records and replaces of refreshed records.
    Upsert,
    /// Deletes of stale records.
    Delete,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert => write!(f, "upsert"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A batch write that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub kind: BatchKind,
    pub error: StoreError,
}

/// Errors surfaced by a reconciliation pass. Nothing is retried or swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A record is malformed; raised before any store I/O for fresh records.
    #[error("malformed record: {0}")]
    Record(#[from] RecordError),
    /// Fetching the former state failed; nothing was written.
    #[error("fetching former state failed: {0}")]
    Fetch(#[source] StoreError),
    /// One or both batch writes failed. Both batches were attempted.
    #[error("batch write failed: {}", describe_failures(.failures))]
    Write { failures: Vec<BatchFailure> },
}

fn describe_failures(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.kind, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while loading or validating a pass config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config validation error (blank name, bad table, negative retention, ...).
    #[error("config validation error: {0}")]
    Validation(String),
}
