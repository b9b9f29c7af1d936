// Loading fresh records for a pass.
// Text in, records out: the caller reads files and picks the format.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use gatherstate_recon::config::InputFormat;
use gatherstate_recon::{FieldMap, Record};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: invalid JSON: {source}")]
    JsonLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected a JSON array of objects at the top level")]
    NotAnArray,
    #[error("record #{position} is not a JSON object")]
    NotAnObject { position: usize },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Guess the format from a file extension; `None` if it says nothing.
pub fn format_from_extension(path: &Path) -> Option<InputFormat> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "json" => Some(InputFormat::Json),
        "ndjson" | "jsonl" => Some(InputFormat::Ndjson),
        "csv" => Some(InputFormat::Csv),
        _ => None,
    }
}

/// Parse `text` into records carrying `identifying_fields`, all seen at `seen_at`.
pub fn load_records(
    text: &str,
    format: InputFormat,
    identifying_fields: &[String],
    seen_at: DateTime<Utc>,
) -> Result<Vec<Record>, InputError> {
    let rows = match format {
        InputFormat::Json => parse_json(text)?,
        InputFormat::Ndjson => parse_ndjson(text)?,
        InputFormat::Csv => parse_csv(text)?,
    };
    Ok(rows
        .into_iter()
        .map(|data| Record::new(data, identifying_fields.iter().cloned(), seen_at))
        .collect())
}

fn parse_json(text: &str) -> Result<Vec<FieldMap>, InputError> {
    let Value::Array(items) = serde_json::from_str::<Value>(text)? else {
        return Err(InputError::NotAnArray);
    };
    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| into_fields(item, position))
        .collect()
}

fn parse_ndjson(text: &str) -> Result<Vec<FieldMap>, InputError> {
    let mut rows = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|source| InputError::JsonLine { line: i + 1, source })?;
        rows.push(into_fields(value, rows.len())?);
    }
    Ok(rows)
}

/// Every CSV cell becomes a JSON string; typing is left to the gatherer.
fn parse_csv(text: &str) -> Result<Vec<FieldMap>, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut data = FieldMap::new();
        for (i, h) in headers.iter().enumerate() {
            if let Some(val) = record.get(i) {
                data.insert(h.clone(), Value::String(val.to_string()));
            }
        }
        rows.push(data);
    }
    Ok(rows)
}

fn into_fields(value: Value, position: usize) -> Result<FieldMap, InputError> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(InputError::NotAnObject { position }),
    }
}
