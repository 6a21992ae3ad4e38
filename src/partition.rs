//! Partition model
//!
//! A partition is the ordered tuple of a document's dimension values
//! plus a position integer. The tuple without the position is the
//! partition *key*: two documents share a partition iff their keys
//! are equal. The textual form is `dim1:v1,dim2:v2|position`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::types::Document;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionValue {
    pub dimension: String,
    pub value: String,
}

impl DimensionValue {
    pub fn new(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Partition {
    pub values: Vec<DimensionValue>,
    pub position: u64,
}

impl Partition {
    pub fn new(values: Vec<DimensionValue>, position: u64) -> Self {
        Self { values, position }
    }

    /// The partition key: dimension values in dimension order,
    /// excluding the position. Empty values contribute nothing.
    pub fn key(&self) -> String {
        let parts: Vec<String> = self
            .values
            .iter()
            .filter(|v| !v.value.is_empty())
            .map(|v| format!("{}:{}", v.dimension, v.value))
            .collect();
        parts.join(",")
    }

    pub fn value_of(&self, dimension: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.dimension == dimension)
            .map(|v| v.value.as_str())
    }

    pub fn set_value(&mut self, dimension: &str, value: impl Into<String>) {
        let value = value.into();
        match self.values.iter_mut().find(|v| v.dimension == dimension) {
            Some(existing) => existing.value = value,
            None => self.values.push(DimensionValue::new(dimension, value)),
        }
    }

    /// Parse the textual form. Values containing `|` or `,` are
    /// rejected rather than escaped.
    pub fn parse(text: &str) -> Result<Self> {
        let (key, position) = match text.rsplit_once('|') {
            Some(parts) => parts,
            None => return Err(Error::parse(format!("partition '{text}' has no position"))),
        };
        let position: u64 = position
            .parse()
            .map_err(|_| Error::parse(format!("invalid partition position '{position}'")))?;

        let mut values = Vec::new();
        for pair in key.split(',').filter(|p| !p.is_empty()) {
            let (dimension, value) = pair
                .split_once(':')
                .ok_or_else(|| Error::parse(format!("invalid partition pair '{pair}'")))?;
            if dimension.is_empty() || value.is_empty() {
                return Err(Error::parse(format!("invalid partition pair '{pair}'")));
            }
            if value.contains('|') {
                return Err(Error::parse(format!(
                    "partition value '{value}' contains a reserved separator"
                )));
            }
            values.push(DimensionValue::new(dimension, value));
        }
        Ok(Self { values, position })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.key(), self.position)
    }
}

/// Derive a document's partition from its stored dimension values.
///
/// Enumerated dimensions read their own name (falling back to the
/// dimension default); hierarchical dimensions read their reference
/// field. Dimensions resolving to an empty value are omitted. The
/// position is left at zero for the generator to fill.
pub fn build_partition(doc: &Document, dims: &DimensionSet) -> Partition {
    let mut values = Vec::new();
    for dimension in dims.iter() {
        let mut value = doc.dimension_string(dimension.storage_key());
        if value.is_empty() {
            if let Some(default) = &dimension.default_value {
                value = default.clone();
            }
        }
        if !value.is_empty() {
            values.push(DimensionValue::new(&dimension.name, value));
        }
    }
    Partition::new(values, 0)
}

/// Documents grouped by partition key.
///
/// Each group is ordered historically: `created_at` ascending with
/// `uuid` as the tie-breaker. This is the ordering position
/// assignment and ID generation work from.
pub struct PartitionMap<'a> {
    groups: std::collections::BTreeMap<String, Vec<&'a Document>>,
}

impl<'a> PartitionMap<'a> {
    pub fn build(docs: &'a [Document], dims: &DimensionSet) -> Self {
        let mut groups: std::collections::BTreeMap<String, Vec<&'a Document>> =
            std::collections::BTreeMap::new();
        for doc in docs {
            let key = build_partition(doc, dims).key();
            groups.entry(key).or_default().push(doc);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| (a.created_at, a.uuid).cmp(&(b.created_at, b.uuid)));
        }
        Self { groups }
    }

    /// The historically-ordered documents of one partition.
    pub fn get(&self, key: &str) -> &[&'a Document] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[&'a Document])> {
        self.groups
            .iter()
            .map(|(key, group)| (key.as_str(), group.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
