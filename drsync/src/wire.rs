//! Decoding of loosely-typed provider listings into strict nodes
//!
//! Listings come from external scripts and are trusted only as far as this
//! module. Accepted shapes:
//! - a JSON array of node records, or a single record
//! - camelCase or snake_case keys (`relativePath` / `relative_path`)
//! - `size` as a number of bytes or a label such as `"4KB"`
//! - `lastModified` as RFC 3339, a naive ISO timestamp (UTC assumed),
//!   PowerShell's `/Date(<ms>)/` form, or epoch milliseconds
//!
//! A record without a relative path is kept with an empty one so that the
//! indexer skips it. A non-array `children` value is treated as empty.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Result;
use crate::node::{file_name, normalize_relative, Node, NodeKind, NodeSize, SyncStatus};

/// Decode a provider body. Fails only when the body is not JSON at all.
pub fn decode_nodes(body: &str) -> Result<Vec<Node>> {
    let value: Value = serde_json::from_str(body.trim())?;
    Ok(nodes_from_value(&value))
}

/// Convert an already parsed JSON value into nodes
pub fn nodes_from_value(value: &Value) -> Vec<Node> {
    match value {
        Value::Array(items) => items.iter().filter_map(node_from_value).collect(),
        Value::Object(_) => node_from_value(value).into_iter().collect(),
        Value::Null => Vec::new(),
        other => {
            warn!("Ignoring provider listing of unexpected shape: {}", other);
            Vec::new()
        }
    }
}

fn node_from_value(value: &Value) -> Option<Node> {
    let Some(record) = value.as_object() else {
        warn!("Ignoring non-object node record: {}", value);
        return None;
    };

    let relative_path = string_field(record, &["relativePath", "relative_path"])
        .map(|p| normalize_relative(&p))
        .unwrap_or_default();
    if relative_path.is_empty() {
        warn!("Node record without relative path: {}", value);
    }

    let children = match record.get("children") {
        Some(Value::Array(items)) => items.iter().filter_map(node_from_value).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!("Ignoring non-array children for '{}': {}", relative_path, other);
            Vec::new()
        }
    };

    let kind = match string_field(record, &["type", "kind"])
        .map(|k| k.to_ascii_lowercase())
        .as_deref()
    {
        Some("directory") | Some("dir") | Some("folder") => NodeKind::Directory,
        Some(_) => NodeKind::File,
        None if !children.is_empty() => NodeKind::Directory,
        None => NodeKind::File,
    };

    let path = string_field(record, &["path", "fullPath", "full_path"])
        .unwrap_or_else(|| relative_path.clone());
    let name = string_field(record, &["name"])
        .unwrap_or_else(|| file_name(&relative_path).to_string());
    let id = string_field(record, &["id"]).unwrap_or_else(|| path.clone());

    let modified = ["lastModified", "last_modified", "modified"]
        .iter()
        .find_map(|key| record.get(*key))
        .and_then(parse_timestamp)
        .unwrap_or_default();

    let size = match record.get("size") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .map(NodeSize::Bytes)
            .unwrap_or_default(),
        Some(Value::String(label)) => NodeSize::Label(label.clone()),
        _ => NodeSize::default(),
    };

    let status = record
        .get("status")
        .and_then(|s| serde_json::from_value::<SyncStatus>(s.clone()).ok())
        .unwrap_or_default();

    Some(Node {
        id,
        name,
        kind,
        path,
        relative_path,
        modified,
        size,
        status,
        content: string_field(record, &["content"]),
        children,
    })
}

fn string_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse the timestamp forms listed in the module docs
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(inner) = raw
        .trim_matches('/')
        .strip_prefix("Date(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        // `/Date(1700000000000)/` or `/Date(1700000000000+0100)/`
        let digits_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(inner.len());
        let ms: i64 = inner[..digits_end].parse().ok()?;
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
