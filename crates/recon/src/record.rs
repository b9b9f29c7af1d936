use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;

/// Field name -> value. Values compare structurally.
///
/// JSON numbers compare by representation, so `1` and `1.0` are different
/// values as far as identity and field diffs are concerned.
pub type FieldMap = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One observation of an external entity, or its persisted last-known state.
///
/// `PartialEq` is full structural equality. Identity equality, which is what
/// reconciliation uses, is [`identical`] / [`Record::same_identity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: FieldMap,
    pub identifying_fields: BTreeSet<String>,
    #[serde(with = "epoch_seconds")]
    pub last_updated: DateTime<Utc>,
}

impl Record {
    pub fn new<I, S>(data: FieldMap, identifying_fields: I, last_updated: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data,
            identifying_fields: identifying_fields.into_iter().map(Into::into).collect(),
            last_updated,
        }
    }

    /// A record observed right now.
    pub fn observed<I, S>(data: FieldMap, identifying_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(data, identifying_fields, Utc::now())
    }

    /// Same record, stamped with a different last-seen instant.
    #[must_use]
    pub fn seen_at(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }

    pub fn same_identity(&self, other: &Record) -> bool {
        identical(self, other)
    }

    /// Identity field -> current value, for querying and mutating a store.
    pub fn identity_filter(&self) -> Result<IdentityFilter, RecordError> {
        let mut fields = BTreeMap::new();
        for field in &self.identifying_fields {
            let value = self
                .data
                .get(field)
                .ok_or_else(|| RecordError::MissingIdentityField { field: field.clone() })?;
            fields.insert(field.clone(), value.clone());
        }
        Ok(IdentityFilter(fields))
    }
}

/// True iff, for every field in the union of both identity sets, both
/// records carry the field and the values are equal.
///
/// Non-identifying fields and `last_updated` never take part. Two records
/// that both declare no identifying fields are identical to each other (and
/// to everything else that declares none): an empty identity set is a
/// degenerate configuration, not something this function guards against.
pub fn identical(a: &Record, b: &Record) -> bool {
    a.identifying_fields
        .union(&b.identifying_fields)
        .all(|field| match (a.data.get(field), b.data.get(field)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
}

// ---------------------------------------------------------------------------
// Identity filter
// ---------------------------------------------------------------------------

/// Exact-match conjunction over identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityFilter(BTreeMap<String, Value>);

impl IdentityFilter {
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn matches(&self, data: &FieldMap) -> bool {
        self.0.iter().all(|(k, v)| data.get(k) == Some(v))
    }

    /// Deterministic encoding: equal filters always produce equal keys.
    pub fn canonical_key(&self) -> String {
        let mut out = String::new();
        out.push('{');
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_canonical_str(k, &mut out);
            out.push(':');
            write_canonical(v, &mut out);
        }
        out.push('}');
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort explicitly; the map may be insertion-ordered.
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_str(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::String(s) => write_canonical_str(s, out),
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_canonical_str(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::String(s.to_owned()));
}

// ---------------------------------------------------------------------------
// Identity index
// ---------------------------------------------------------------------------

/// Positions of records grouped by identifying-field set, then by the
/// canonical key of their identity values.
///
/// Built once per pass. Every candidate found through the index is confirmed
/// with [`identical`], so lookups agree exactly with identity equality even
/// when records declare different identity sets.
pub struct IdentityIndex<'a> {
    records: &'a [Record],
    groups: Vec<IndexGroup>,
}

struct IndexGroup {
    fields: BTreeSet<String>,
    buckets: HashMap<String, Vec<usize>>,
}

impl<'a> IdentityIndex<'a> {
    pub fn build(records: &'a [Record]) -> Self {
        let mut groups: Vec<IndexGroup> = Vec::new();
        for (pos, record) in records.iter().enumerate() {
            // A record missing one of its own identity fields matches nothing.
            let Ok(filter) = record.identity_filter() else {
                continue;
            };
            let existing = groups
                .iter()
                .position(|g| g.fields == record.identifying_fields);
            let slot = match existing {
                Some(i) => i,
                None => {
                    groups.push(IndexGroup {
                        fields: record.identifying_fields.clone(),
                        buckets: HashMap::new(),
                    });
                    groups.len() - 1
                }
            };
            groups[slot]
                .buckets
                .entry(filter.canonical_key())
                .or_default()
                .push(pos);
        }
        Self { records, groups }
    }

    pub fn records(&self) -> &'a [Record] {
        self.records
    }

    /// All positions identical to `wanted`, ascending.
    pub fn find_all(&self, wanted: &Record) -> Vec<usize> {
        let mut hits = Vec::new();
        for group in &self.groups {
            let Some(key) = project_key(wanted, &group.fields) else {
                continue;
            };
            if let Some(bucket) = group.buckets.get(&key) {
                hits.extend(
                    bucket
                        .iter()
                        .copied()
                        .filter(|&pos| identical(&self.records[pos], wanted)),
                );
            }
        }
        hits.sort_unstable();
        hits
    }

    /// Lowest position identical to `wanted`.
    pub fn find_first(&self, wanted: &Record) -> Option<usize> {
        self.find_all(wanted).first().copied()
    }

    /// Highest position identical to `wanted`.
    pub fn find_last(&self, wanted: &Record) -> Option<usize> {
        self.find_all(wanted).last().copied()
    }
}

/// Canonical key of `wanted`'s values for `fields`, or `None` if `wanted`
/// lacks any of them (in which case it cannot be identical to the group).
fn project_key(wanted: &Record, fields: &BTreeSet<String>) -> Option<String> {
    let mut projected = BTreeMap::new();
    for field in fields {
        projected.insert(field.clone(), wanted.data.get(field)?.clone());
    }
    Some(IdentityFilter(projected).canonical_key())
}

// ---------------------------------------------------------------------------
// Serde: floating-point seconds since the Unix epoch
// ---------------------------------------------------------------------------

pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(ts.timestamp_micros() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() {
            return Err(de::Error::custom("last_updated must be a finite number"));
        }
        DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {secs}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
