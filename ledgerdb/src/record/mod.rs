//! Record helpers: ids, timestamps and value keys shared by indexes, validation and queries.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A stored record: field name -> JSON value.
pub type Record = serde_json::Map<String, Value>;

/// All records of one model class, keyed by id.
pub type ModelData = BTreeMap<String, Record>;

/// Every model class's records, keyed by model class name.
pub type DataCache = BTreeMap<String, ModelData>;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const INCLUDES: &str = "includes";

/// Keys the store owns; callers cannot set them through create/update.
pub const RESERVED_KEYS: [&str; 4] = [ID, CREATED_AT, UPDATED_AT, INCLUDES];

pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID).and_then(Value::as_str)
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Remove store-owned keys from caller-supplied params.
pub fn strip_reserved(mut params: Record) -> Record {
    for key in RESERVED_KEYS {
        params.remove(key);
    }
    params
}

/// Render a value as an index key. Null and absent render as the empty string,
/// arrays as their element keys joined with `,`.
pub fn value_key(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| value_key(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other @ Value::Object(_)) => other.to_string(),
    }
}

/// Null, absent, empty string or empty array.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Flatten a scalar or array value into its non-empty element keys.
pub fn flatten_keys(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| !is_empty_value(Some(*item)))
            .map(|item| value_key(Some(item)))
            .collect(),
        other if is_empty_value(other) => Vec::new(),
        other => vec![value_key(other)],
    }
}

pub fn parse_id(id: &str) -> Option<u64> {
    id.parse().ok()
}

/// Order ids numerically, falling back to string order for non-numeric ids.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (parse_id(a), parse_id(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Largest numeric id in a model's records.
pub fn max_id(data: &ModelData) -> u64 {
    data.keys().filter_map(|id| parse_id(id)).max().unwrap_or(0)
}

/// Convert a JSON value into a record, rejecting non-objects.
pub fn into_record(value: Value) -> crate::Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(crate::LedgerDbError::Other(format!(
            "Expected a JSON object for record params, got {other}"
        ))),
    }
}
