//! SQLite state store.
//!
//! One table per record set. Each row keeps the canonical key of its
//! identity filter in an indexed column, so replace-one and delete-one are
//! single indexed statements.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use gatherstate_recon::config::is_sql_identifier;
use gatherstate_recon::{
    BatchSummary, FieldMap, IdentityFilter, OpFailure, Record, StateStore, StoreError, WriteOp,
};

pub struct SqliteStore {
    conn: Connection,
    table: String,
}

enum Applied {
    Inserted,
    Replaced,
    Deleted,
    Unmatched,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure `table` exists.
    pub fn open(path: &Path, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(unavailable)?;
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn, table)
    }

    pub fn with_connection(conn: Connection, table: &str) -> Result<Self, StoreError> {
        if !is_sql_identifier(table) {
            return Err(StoreError::Unavailable(format!("invalid table name '{table}'")));
        }
        conn.execute_batch(&format!(
            r#"
CREATE TABLE IF NOT EXISTS "{table}" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key TEXT NOT NULL,
    data TEXT NOT NULL,               -- JSON object
    identifying_fields TEXT NOT NULL, -- JSON array of field names
    last_updated_us INTEGER NOT NULL  -- microseconds since the Unix epoch
);
CREATE INDEX IF NOT EXISTS "{table}_identity" ON "{table}" (identity_key);
"#
        ))
        .map_err(unavailable)?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row(&format!(r#"SELECT COUNT(*) FROM "{}""#, self.table), [], |row| row.get(0))
            .map_err(unavailable)?;
        Ok(n as usize)
    }

    fn apply(tx: &Transaction<'_>, table: &str, op: &WriteOp) -> Result<Applied, String> {
        match op {
            WriteOp::Insert(row) => {
                let encoded = encode(row)?;
                tx.execute(
                    &format!(
                        r#"INSERT INTO "{table}" (identity_key, data, identifying_fields, last_updated_us)
                           VALUES (?1, ?2, ?3, ?4)"#
                    ),
                    params![
                        encoded.identity_key,
                        encoded.data,
                        encoded.fields,
                        encoded.last_updated_us
                    ],
                )
                .map_err(|e| e.to_string())?;
                Ok(Applied::Inserted)
            }
            WriteOp::Replace { filter, row } => {
                let Some(id) = first_match(tx, table, filter)? else {
                    return Ok(Applied::Unmatched);
                };
                let encoded = encode(row)?;
                tx.execute(
                    &format!(
                        r#"UPDATE "{table}"
                           SET identity_key = ?1, data = ?2, identifying_fields = ?3, last_updated_us = ?4
                           WHERE id = ?5"#
                    ),
                    params![
                        encoded.identity_key,
                        encoded.data,
                        encoded.fields,
                        encoded.last_updated_us,
                        id
                    ],
                )
                .map_err(|e| e.to_string())?;
                Ok(Applied::Replaced)
            }
            WriteOp::Delete { filter } => {
                let Some(id) = first_match(tx, table, filter)? else {
                    return Ok(Applied::Unmatched);
                };
                tx.execute(&format!(r#"DELETE FROM "{table}" WHERE id = ?1"#), params![id])
                    .map_err(|e| e.to_string())?;
                Ok(Applied::Deleted)
            }
        }
    }
}

impl StateStore for SqliteStore {
    fn fetch_all(&mut self) -> Result<Vec<Record>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                r#"SELECT data, identifying_fields, last_updated_us FROM "{}" ORDER BY id"#,
                self.table
            ))
            .map_err(unavailable)?;

        let rows = stmt
            .query_map([], |row| {
                let data: String = row.get(0)?;
                let fields: String = row.get(1)?;
                let last_updated_us: i64 = row.get(2)?;
                Ok((data, fields, last_updated_us))
            })
            .map_err(unavailable)?;

        let mut records = Vec::new();
        for row in rows {
            let (data, fields, last_updated_us) = row.map_err(unavailable)?;
            records.push(decode(&data, &fields, last_updated_us)?);
        }
        log::debug!("fetched {} row(s) from {}", records.len(), self.table);
        Ok(records)
    }

    fn batch_write(&mut self, ops: Vec<WriteOp>) -> Result<BatchSummary, StoreError> {
        let tx = self.conn.transaction().map_err(unavailable)?;
        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();

        for (index, op) in ops.iter().enumerate() {
            match Self::apply(&tx, &self.table, op) {
                Ok(Applied::Inserted) => summary.inserted += 1,
                Ok(Applied::Replaced) => summary.replaced += 1,
                Ok(Applied::Deleted) => summary.deleted += 1,
                Ok(Applied::Unmatched) => summary.unmatched += 1,
                Err(message) => {
                    log::warn!("{} op #{index} on {} failed: {message}", op.kind(), self.table);
                    failures.push(OpFailure { index, message });
                }
            }
        }

        tx.commit().map_err(unavailable)?;

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(StoreError::Partial { failures, summary })
        }
    }
}

// ---------------------------------------------------------------------------
// Row codec
// ---------------------------------------------------------------------------

struct EncodedRow {
    identity_key: String,
    data: String,
    fields: String,
    last_updated_us: i64,
}

fn encode(record: &Record) -> Result<EncodedRow, String> {
    let identity_key = record
        .identity_filter()
        .map_err(|e| e.to_string())?
        .canonical_key();
    Ok(EncodedRow {
        identity_key,
        data: serde_json::to_string(&record.data).map_err(|e| e.to_string())?,
        fields: serde_json::to_string(&record.identifying_fields).map_err(|e| e.to_string())?,
        last_updated_us: record.last_updated.timestamp_micros(),
    })
}

fn decode(data: &str, fields: &str, last_updated_us: i64) -> Result<Record, StoreError> {
    let data: FieldMap =
        serde_json::from_str(data).map_err(|e| StoreError::Codec(format!("data: {e}")))?;
    let fields: BTreeSet<String> = serde_json::from_str(fields)
        .map_err(|e| StoreError::Codec(format!("identifying_fields: {e}")))?;
    let last_updated = DateTime::from_timestamp_micros(last_updated_us).ok_or_else(|| {
        StoreError::Codec(format!("last_updated_us out of range: {last_updated_us}"))
    })?;
    Ok(Record::new(data, fields, last_updated))
}

fn first_match(
    tx: &Transaction<'_>,
    table: &str,
    filter: &IdentityFilter,
) -> Result<Option<i64>, String> {
    tx.query_row(
        &format!(r#"SELECT id FROM "{table}" WHERE identity_key = ?1 ORDER BY id LIMIT 1"#),
        params![filter.canonical_key()],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| e.to_string())
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        let data: FieldMap = serde_json::from_value(v).unwrap();
        Record::new(data, ["id"], Utc.timestamp_opt(1_750_000_000, 123_456_000).unwrap())
    }

    fn filter(v: serde_json::Value) -> IdentityFilter {
        rec(v).identity_filter().unwrap()
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let mut store = SqliteStore::open_in_memory("records").unwrap();
        let r = rec(json!({"id": 1, "name": "a", "nested": {"k": [1, 2]}}));
        store.batch_write(vec![WriteOp::Insert(r.clone())]).unwrap();

        let rows = store.fetch_all().unwrap();
        assert_eq!(rows, vec![r]);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn replace_and_delete_by_identity() {
        let mut store = SqliteStore::open_in_memory("records").unwrap();
        store
            .batch_write(vec![
                WriteOp::Insert(rec(json!({"id": 1, "name": "a"}))),
                WriteOp::Insert(rec(json!({"id": 2, "name": "b"}))),
            ])
            .unwrap();

        let summary = store
            .batch_write(vec![
                WriteOp::Replace {
                    filter: filter(json!({"id": 1})),
                    row: rec(json!({"id": 1, "name": "z"})),
                },
                WriteOp::Delete {
                    filter: filter(json!({"id": 2})),
                },
                WriteOp::Delete {
                    filter: filter(json!({"id": 3})),
                },
            ])
            .unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.unmatched, 1);

        let rows = store.fetch_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["name"], json!("z"));
    }

    #[test]
    fn identity_key_distinguishes_types() {
        let mut store = SqliteStore::open_in_memory("records").unwrap();
        store
            .batch_write(vec![WriteOp::Insert(rec(json!({"id": 1})))])
            .unwrap();
        let summary = store
            .batch_write(vec![WriteOp::Delete {
                filter: filter(json!({"id": "1"})),
            }])
            .unwrap();
        assert_eq!(summary.unmatched, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn malformed_op_does_not_abort_batch() {
        let mut store = SqliteStore::open_in_memory("records").unwrap();
        let err = store
            .batch_write(vec![
                WriteOp::Insert(rec(json!({"id": 1}))),
                WriteOp::Insert(rec(json!({"name": "no id"}))),
                WriteOp::Insert(rec(json!({"id": 3}))),
            ])
            .unwrap_err();

        match err {
            StoreError::Partial { failures, summary } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert!(failures[0].message.contains("'id'"));
                assert_eq!(summary.inserted, 2);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn rejects_bad_table_name() {
        assert!(SqliteStore::open_in_memory("x; DROP TABLE y").is_err());
    }

    #[test]
    fn corrupt_row_is_a_codec_error() {
        let mut store = SqliteStore::open_in_memory("records").unwrap();
        store
            .conn
            .execute(
                r#"INSERT INTO "records" (identity_key, data, identifying_fields, last_updated_us)
                   VALUES ('k', 'not json', '["id"]', 0)"#,
                [],
            )
            .unwrap();
        assert!(matches!(store.fetch_all(), Err(StoreError::Codec(_))));
    }
}
