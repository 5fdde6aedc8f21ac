use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::Value;

use crate::error::StoreError;

/// One result row, detached from the connection that produced it.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn text(&self, column: &str) -> Result<String, StoreError> {
        self.opt_text(column).ok_or_else(|| StoreError::Decode {
            column: column.to_string(),
            message: "expected text, found NULL or missing column".to_string(),
        })
    }

    pub fn opt_text(&self, column: &str) -> Option<String> {
        match self.value(column)? {
            Value::Text(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Null => None,
        }
    }

    pub fn i64(&self, column: &str) -> Result<i64, StoreError> {
        self.opt_i64(column).ok_or_else(|| StoreError::Decode {
            column: column.to_string(),
            message: "expected integer, found NULL or missing column".to_string(),
        })
    }

    pub fn opt_i64(&self, column: &str) -> Option<i64> {
        match self.value(column)? {
            Value::Integer(i) => Some(*i),
            Value::Real(r) => Some(*r as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Blob(_) | Value::Null => None,
        }
    }

    /// JSON column. Text that is not valid JSON comes back as a JSON string
    /// so hand-written rows stay readable.
    pub fn opt_json(&self, column: &str) -> Option<serde_json::Value> {
        let raw = self.opt_text(column)?;
        if raw.is_empty() {
            return None;
        }
        Some(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
    }
}

pub(crate) fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_i64(v: Option<i64>) -> Value {
    match v {
        Some(v) => Value::Integer(v),
        None => Value::Null,
    }
}

/// Compact JSON at the storage boundary; `None` and JSON `null` both store NULL.
pub(crate) fn json_text(v: Option<&serde_json::Value>) -> Result<Value, StoreError> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(Value::Null),
        Some(v) => Ok(Value::Text(serde_json::to_string(v)?)),
    }
}

/// RFC 3339 with millisecond precision.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn opt_ts(dt: Option<&DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(fmt_ts(dt)),
        None => Value::Null,
    }
}
