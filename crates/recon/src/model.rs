use std::collections::BTreeMap;

use serde::Serialize;

use crate::diff::{FieldDiff, ValueChange};
use crate::record::{FieldMap, Record};

// ---------------------------------------------------------------------------
// Changed record
// ---------------------------------------------------------------------------

/// A refreshed record whose fields differ from the former version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedRecord {
    /// The fresh record, as persisted by this pass.
    pub record: Record,
    pub added: FieldMap,
    pub changed: BTreeMap<String, ValueChange>,
    /// Former values of fields that disappeared.
    pub removed: FieldMap,
}

impl ChangedRecord {
    /// `None` when the diff is empty: an unchanged record is not a change.
    pub fn from_diff(record: Record, diff: FieldDiff) -> Option<Self> {
        if diff.is_empty() {
            return None;
        }
        let FieldDiff {
            added,
            changed,
            removed,
        } = diff;
        Some(Self {
            record,
            added,
            changed,
            removed,
        })
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one reconciliation pass, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResults {
    pub added: Vec<Record>,
    pub changed: Vec<ChangedRecord>,
    /// Records deleted because they were unseen for longer than the retention period.
    pub removed: Vec<Record>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

impl DiffResults {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            changed: self.changed.len(),
            removed: self.removed.len(),
        }
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} changed, {} removed",
            self.added, self.changed, self.removed
        )
    }
}
