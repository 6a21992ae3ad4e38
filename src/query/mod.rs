//! Query engine
//!
//! Listing options, field resolution, and the two evaluators: the
//! filter/order/paginate processor and the restricted WHERE-clause
//! predicate.

pub mod processor;
pub mod where_clause;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dimension::DimensionSet;
use crate::types::{Document, Value, DATA_PREFIX};

pub use processor::QueryProcessor;
pub use where_clause::WherePredicate;

/// Listing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Key → value (equality) or list of values (any-of). Keys may be
    /// dimension names, hierarchical reference fields, `uuid`,
    /// `created_at`/`updated_at`, or `_data.*` fields.
    pub filters: BTreeMap<String, FilterValue>,
    /// Case-insensitive substring search over title and body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by_search: Option<String>,
    pub order_by: Vec<OrderClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl ListOptions {
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.filter_by_search = Some(text.into());
        self
    }

    pub fn ordered_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderClause {
            column: column.into(),
            descending,
        });
        self
    }
}

/// Scalar (equality) or list (any-of) filter value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    One(Value),
    Many(Vec<Value>),
}

impl FilterValue {
    pub fn candidates(&self) -> &[Value] {
        match self {
            FilterValue::One(value) => std::slice::from_ref(value),
            FilterValue::Many(values) => values,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::One(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::One(value.into())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::One(value.into())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::One(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::One(value.into())
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::Many(values)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderClause {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// Resolve a queryable field on a document: reserved columns first,
/// then configured dimensions (enumerated names fall back to their
/// default), then free-form `_data.*` keys. `None` means the document
/// has no value for the key.
pub(crate) fn resolve_field(doc: &Document, key: &str, dims: &DimensionSet) -> Option<Value> {
    match key {
        "uuid" => return Some(Value::String(doc.uuid.to_string())),
        "title" => return Some(Value::String(doc.title.clone())),
        "body" => return Some(Value::String(doc.body.clone())),
        "created_at" => return Some(Value::Timestamp(doc.created_at)),
        "updated_at" => return Some(Value::Timestamp(doc.updated_at)),
        _ => {}
    }
    if key.starts_with(DATA_PREFIX) {
        return doc.dimensions.get(key).cloned();
    }
    if let Some(dimension) = dims.by_storage_key(key) {
        if let Some(value) = doc.dimensions.get(key) {
            return Some(value.clone());
        }
        if !dimension.is_hierarchical() {
            if let Some(default) = &dimension.default_value {
                return Some(Value::String(default.clone()));
            }
        }
        return None;
    }
    doc.dimensions.get(key).cloned()
}
