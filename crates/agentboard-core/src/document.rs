//! Field helpers over schemaless JSON documents.

use chrono::{DateTime, Utc};
use serde_json::Value;

pub const AGENT_NAME_FIELDS: &[&str] = &["agentName", "agent_name"];
pub const SESSION_ID_FIELDS: &[&str] = &["sessionId", "session_id"];

/// Document id: `id`, falling back to the Cosmos `_rid`.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("id")
        .and_then(Value::as_str)
        .or_else(|| doc.get("_rid").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// `_ts` in whole seconds. Accepts integer or float values.
pub fn doc_ts(doc: &Value) -> Option<i64> {
    let ts = doc.get("_ts")?;
    ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))
}

/// First non-empty string among `names`.
pub fn str_field<'a>(doc: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| doc.get(*name).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

pub fn agent_name(doc: &Value) -> Option<&str> {
    str_field(doc, AGENT_NAME_FIELDS)
}

pub fn session_id(doc: &Value) -> Option<&str> {
    str_field(doc, SESSION_ID_FIELDS)
}

pub fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

/// RFC 3339 rendering of a `_ts` value.
pub fn ts_to_iso(ts: i64) -> Option<String> {
    ts_to_datetime(ts).map(|dt| dt.to_rfc3339())
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Truncate to `max` characters, appending `...` when something was cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Text for a field that may hold a string or any other JSON value.
pub fn field_text(doc: &Value, name: &str) -> Option<String> {
    match doc.get(name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
