//! Core types for nanostore

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Column names reserved for the document record itself. Dimension
/// names and reference fields may not collide with these.
pub const RESERVED_COLUMNS: &[&str] = &[
    "uuid",
    "simple_id",
    "title",
    "body",
    "position",
    "created_at",
    "updated_at",
];

/// SQL keywords retained as reserved names for safety.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "from", "where", "and", "or", "not", "null", "order",
    "group", "by", "limit", "offset", "table", "index", "join", "like", "is",
];

/// Reserved prefix for free-form data fields.
pub const DATA_PREFIX: &str = "_data.";

/// Input-side keys consumed by `add`/`update` to control body content
/// and storage policy. Never persisted in the dimensions map.
pub const BODY_KEY: &str = "_body";
pub const BODY_FORMAT_KEY: &str = "_body.format";
pub const BODY_EMBED_KEY: &str = "_body.embed";

/// Dynamic dimension value.
///
/// The first six variants are the *simple types* allowed on configured
/// dimensions; `Json` is legal only under `_data.`-prefixed keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Json(serde_json::Value),
}

impl Value {
    /// True for the simple types accepted on configured dimensions.
    pub fn is_simple(&self) -> bool {
        !matches!(self, Value::Json(_))
    }

    /// True when the value denotes "no value" for reference purposes:
    /// null or the empty string.
    pub fn is_empty_ref(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Canonical textual form used for all filtering and ordering
    /// comparisons. Timestamps render at nanosecond precision so rapid
    /// bursts stay distinguishable.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Timestamp(t) => canonical_timestamp(t),
            Value::String(s) => s.clone(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Variant name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Timestamp(_) => "timestamp",
            Value::String(_) => "string",
            Value::Json(_) => "json",
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Nanosecond-precision ISO-8601 rendering shared by comparisons and
/// the persisted file format.
pub fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Serde adapter persisting timestamps in canonical nanosecond form.
pub mod ts_nanos {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::canonical_timestamp(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Body content format tag.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Txt,
    Md,
    Html,
}

impl BodyFormat {
    pub fn extension(self) -> &'static str {
        match self {
            BodyFormat::Txt => "txt",
            BodyFormat::Md => "md",
            BodyFormat::Html => "html",
        }
    }
}

impl FromStr for BodyFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(BodyFormat::Txt),
            "md" => Ok(BodyFormat::Md),
            "html" => Ok(BodyFormat::Html),
            other => Err(Error::parse(format!("unknown body format: {other}"))),
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Where a document body lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BodyStorageKind {
    Embedded,
    File,
}

/// Storage descriptor for a document body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyMeta {
    #[serde(rename = "type")]
    pub kind: BodyStorageKind,
    #[serde(default)]
    pub format: BodyFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl BodyMeta {
    pub fn embedded(format: BodyFormat, size: u64) -> Self {
        Self {
            kind: BodyStorageKind::Embedded,
            format,
            filename: None,
            size: Some(size),
        }
    }

    pub fn file(format: BodyFormat, filename: String, size: u64) -> Self {
        Self {
            kind: BodyStorageKind::File,
            format,
            filename: Some(filename),
            size: Some(size),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == BodyStorageKind::File
    }
}

/// A single record in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub uuid: Uuid,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_meta: Option<BodyMeta>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, Value>,
    /// Sequence within the document's partition, assigned once at
    /// creation (or when an update moves the document to a different
    /// partition key). 0 means not yet assigned.
    #[serde(default, skip_serializing_if = "position_unassigned")]
    pub position: u64,
    #[serde(with = "ts_nanos")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_nanos")]
    pub updated_at: DateTime<Utc>,
    /// Derived short-form ID attached by listing. Never persisted.
    #[serde(skip)]
    pub simple_id: Option<String>,
}

fn position_unassigned(position: &u64) -> bool {
    *position == 0
}

impl Document {
    pub fn new(uuid: Uuid, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            uuid,
            title: title.into(),
            body: String::new(),
            body_meta: None,
            dimensions: BTreeMap::new(),
            position: 0,
            created_at: now,
            updated_at: now,
            simple_id: None,
        }
    }

    pub fn dimension(&self, key: &str) -> Option<&Value> {
        self.dimensions.get(key)
    }

    /// The dimension value under `key` as a canonical string; empty
    /// when absent or null.
    pub fn dimension_string(&self, key: &str) -> String {
        self.dimensions
            .get(key)
            .map(Value::canonical_string)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_untagged_roundtrip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(2.5),
            Value::String("pending".to_string()),
            Value::Json(serde_json::json!({"nested": [1, 2, 3]})),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_timestamp_deserializes_from_rfc3339() {
        let value: Value = serde_json::from_str("\"2024-06-01T12:00:00.000000001Z\"").unwrap();
        assert!(matches!(value, Value::Timestamp(_)));
        assert_eq!(value.canonical_string(), "2024-06-01T12:00:00.000000001Z");
    }

    #[test]
    fn test_plain_string_stays_string() {
        let value: Value = serde_json::from_str("\"done\"").unwrap();
        assert_eq!(value, Value::String("done".to_string()));
    }

    #[test]
    fn test_canonical_strings() {
        assert_eq!(Value::Bool(false).canonical_string(), "false");
        assert_eq!(Value::Int(-3).canonical_string(), "-3");
        assert_eq!(Value::Null.canonical_string(), "");
    }

    #[test]
    fn test_body_format_parsing() {
        assert_eq!("md".parse::<BodyFormat>().unwrap(), BodyFormat::Md);
        assert_eq!("HTML".parse::<BodyFormat>().unwrap(), BodyFormat::Html);
        assert!("pdf".parse::<BodyFormat>().is_err());
    }

    #[test]
    fn test_document_position_omitted_when_unassigned() {
        let doc = Document::new(Uuid::new_v4(), "untitled", Utc::now());
        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("\"position\""));
    }
}
