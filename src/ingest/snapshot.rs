/// Generic JSON snapshot fetcher
///
/// Captures an arbitrary JSON endpoint (an object, or an array of objects)
/// as a flat table, one row per record. Used for the `[[snapshots]]` entries
/// in the configuration.

use reqwest::blocking::Client;
use serde_json::{Map, Value};

use crate::config::{Fetch, SnapshotSource};
use crate::ingest::http::get_json;
use crate::model::{HarvestError, Result};

/// A JSON payload flattened to a header plus string rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Fetch one configured snapshot and flatten it
pub fn fetch_snapshot(client: &Client, fetch: &Fetch, source: &SnapshotSource) -> Result<SnapshotTable> {
    let body: Value = get_json(client, &source.url, fetch)?;
    flatten(&body).map_err(|e| match e {
        HarvestError::NoData(_) => HarvestError::NoData(format!("{}/{}", source.category, source.id)),
        other => other,
    })
}

/// Flatten a JSON object or array of objects.
///
/// Columns are the sorted keys of the first record. String values are
/// written as-is, anything else as compact JSON; keys absent from a record
/// are left empty and keys not in the first record are dropped.
pub fn flatten(body: &Value) -> Result<SnapshotTable> {
    let records: Vec<&Map<String, Value>> = match body {
        Value::Object(map) => vec![map],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| HarvestError::Parse("snapshot array holds a non-object".into()))
            })
            .collect::<Result<_>>()?,
        _ => return Err(HarvestError::Parse("snapshot body is not an object or array".into())),
    };

    let first = records
        .first()
        .ok_or_else(|| HarvestError::NoData("empty snapshot".into()))?;
    let mut header: Vec<String> = first.keys().cloned().collect();
    header.sort();

    let rows = records
        .iter()
        .map(|record| {
            header
                .iter()
                .map(|key| record.get(key).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(SnapshotTable { header, rows })
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_object_becomes_one_row() {
        let table = flatten(&json!({"stage": 12.5, "lid": "PEOI2", "flood": true})).unwrap();
        assert_eq!(table.header, vec!["flood", "lid", "stage"]);
        assert_eq!(table.rows, vec![vec!["true", "PEOI2", "12.5"]]);
    }

    #[test]
    fn test_array_uses_first_record_columns() {
        let table = flatten(&json!([
            {"b": 1, "a": "x"},
            {"a": "y", "c": 3},
            {"a": null, "b": {"nested": [1, 2]}}
        ]))
        .unwrap();
        assert_eq!(table.header, vec!["a", "b"]);
        assert_eq!(table.rows[1], vec!["y", ""]);
        assert_eq!(table.rows[2], vec!["", r#"{"nested":[1,2]}"#]);
    }

    #[test]
    fn test_empty_array_is_no_data() {
        assert!(matches!(flatten(&json!([])), Err(HarvestError::NoData(_))));
    }

    #[test]
    fn test_scalar_body_is_parse_error() {
        assert!(matches!(flatten(&json!(42)), Err(HarvestError::Parse(_))));
        assert!(matches!(flatten(&json!([1, 2])), Err(HarvestError::Parse(_))));
    }
}
