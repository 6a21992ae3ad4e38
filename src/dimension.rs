//! Dimension model
//!
//! A dimension is a named axis along which documents partition:
//! either an enumerated set of allowed values (optionally mapped to
//! short-form prefixes) or a hierarchical parent-child link stored
//! under a reference field.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::types::{DATA_PREFIX, RESERVED_COLUMNS, RESERVED_KEYWORDS};

/// Upper bound on configured dimensions per store.
pub const MAX_DIMENSIONS: usize = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Enumerated,
    Hierarchical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    /// Position in the partition tuple.
    #[serde(default)]
    pub order: usize,
    /// Allowed values, in order (enumerated only).
    #[serde(default)]
    pub values: Vec<String>,
    /// Value → short-form prefix (enumerated only).
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Document key under which the parent UUID is stored
    /// (hierarchical only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_field: Option<String>,
}

impl Dimension {
    pub fn enumerated(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Enumerated,
            order: 0,
            values: values.iter().map(|v| v.to_string()).collect(),
            prefixes: BTreeMap::new(),
            default_value: None,
            ref_field: None,
        }
    }

    pub fn hierarchical(name: impl Into<String>, ref_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Hierarchical,
            order: 0,
            values: Vec::new(),
            prefixes: BTreeMap::new(),
            default_value: None,
            ref_field: Some(ref_field.into()),
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_prefix(mut self, value: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.prefixes.insert(value.into(), prefix.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn is_hierarchical(&self) -> bool {
        self.kind == DimensionKind::Hierarchical
    }

    /// The document-dimension key this dimension reads from: the
    /// dimension name for enumerated, the reference field for
    /// hierarchical.
    pub fn storage_key(&self) -> &str {
        match self.kind {
            DimensionKind::Enumerated => &self.name,
            DimensionKind::Hierarchical => self.ref_field.as_deref().unwrap_or(&self.name),
        }
    }

    pub fn prefix_for(&self, value: &str) -> Option<&str> {
        self.prefixes.get(value).map(String::as_str)
    }

    pub fn value_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, p)| p.as_str() == prefix)
            .map(|(v, _)| v.as_str())
    }

    pub fn allows_value(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    fn validate(&self) -> Result<()> {
        validate_field_name(&self.name)?;
        match self.kind {
            DimensionKind::Enumerated => {
                if self.values.is_empty() {
                    return Err(Error::invalid_config(format!(
                        "enumerated dimension '{}' has no values",
                        self.name
                    )));
                }
                if let Some(default) = &self.default_value {
                    if !self.allows_value(default) {
                        return Err(Error::invalid_config(format!(
                            "default value '{}' of dimension '{}' is not in its value list",
                            default, self.name
                        )));
                    }
                }
                for (value, prefix) in &self.prefixes {
                    if !self.allows_value(value) {
                        return Err(Error::invalid_config(format!(
                            "prefix '{}' maps unknown value '{}' of dimension '{}'",
                            prefix, value, self.name
                        )));
                    }
                    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase()) {
                        return Err(Error::invalid_config(format!(
                            "prefix '{}' of dimension '{}' must be a non-empty lowercase string",
                            prefix, self.name
                        )));
                    }
                }
            }
            DimensionKind::Hierarchical => {
                match self.ref_field.as_deref() {
                    None | Some("") => {
                        return Err(Error::invalid_config(format!(
                            "hierarchical dimension '{}' is missing a ref field",
                            self.name
                        )));
                    }
                    Some(ref_field) => validate_field_name(ref_field)?,
                }
                if !self.values.is_empty() || !self.prefixes.is_empty() {
                    return Err(Error::invalid_config(format!(
                        "hierarchical dimension '{}' may not declare values or prefixes",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_config("dimension name must be non-empty"));
    }
    if name.starts_with(DATA_PREFIX) || name.starts_with('_') {
        return Err(Error::invalid_config(format!(
            "dimension name '{name}' uses a reserved prefix"
        )));
    }
    let lowered = name.to_ascii_lowercase();
    if RESERVED_COLUMNS.contains(&lowered.as_str()) || RESERVED_KEYWORDS.contains(&lowered.as_str())
    {
        return Err(Error::invalid_config(format!(
            "dimension name '{name}' collides with a reserved name"
        )));
    }
    Ok(())
}

/// Ordered, validated collection of dimensions.
#[derive(Debug, Clone)]
pub struct DimensionSet {
    dimensions: Vec<Dimension>,
}

impl DimensionSet {
    /// Build and validate a set. Dimensions are ordered by their
    /// `order` field (declaration order breaking ties).
    pub fn new(mut dimensions: Vec<Dimension>) -> Result<Self> {
        if dimensions.len() > MAX_DIMENSIONS {
            return Err(Error::invalid_config(format!(
                "too many dimensions: {} (max {})",
                dimensions.len(),
                MAX_DIMENSIONS
            )));
        }
        dimensions.sort_by_key(|d| d.order);

        let mut names = BTreeSet::new();
        let mut prefixes: BTreeMap<&str, &str> = BTreeMap::new();
        for dimension in &dimensions {
            dimension.validate()?;
            if !names.insert(dimension.name.as_str()) {
                return Err(Error::invalid_config(format!(
                    "duplicate dimension name '{}'",
                    dimension.name
                )));
            }
            if let Some(ref_field) = dimension.ref_field.as_deref() {
                if !names.insert(ref_field) {
                    return Err(Error::invalid_config(format!(
                        "ref field '{ref_field}' collides with another dimension"
                    )));
                }
            }
            for (value, prefix) in &dimension.prefixes {
                if let Some(holder) = prefixes.insert(prefix.as_str(), dimension.name.as_str()) {
                    return Err(Error::invalid_config(format!(
                        "prefix '{}' of dimension '{}' (value '{}') already used by '{}'",
                        prefix, dimension.name, value, holder
                    )));
                }
            }
        }

        Ok(Self { dimensions })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn enumerated(&self) -> impl Iterator<Item = &Dimension> {
        self.iter().filter(|d| !d.is_hierarchical())
    }

    pub fn hierarchical(&self) -> impl Iterator<Item = &Dimension> {
        self.iter().filter(|d| d.is_hierarchical())
    }

    /// True when `key` is a hierarchical reference field.
    pub fn is_ref_field(&self, key: &str) -> bool {
        self.hierarchical()
            .any(|d| d.ref_field.as_deref() == Some(key))
    }

    pub fn by_ref_field(&self, key: &str) -> Option<&Dimension> {
        self.hierarchical()
            .find(|d| d.ref_field.as_deref() == Some(key))
    }

    /// True when `key` is a configured document-dimension key: an
    /// enumerated dimension name or a hierarchical reference field.
    pub fn is_configured_key(&self, key: &str) -> bool {
        self.iter().any(|d| d.storage_key() == key)
    }

    pub fn by_storage_key(&self, key: &str) -> Option<&Dimension> {
        self.iter().find(|d| d.storage_key() == key)
    }

    /// Longest prefix of `text` registered by any dimension, as
    /// `(dimension name, value, prefix length)`.
    pub fn match_prefix(&self, text: &str) -> Option<(&str, &str, usize)> {
        let mut best: Option<(&str, &str, usize)> = None;
        for dimension in self.enumerated() {
            for (value, prefix) in &dimension.prefixes {
                if text.starts_with(prefix.as_str())
                    && best.map_or(true, |(_, _, len)| prefix.len() > len)
                {
                    best = Some((dimension.name.as_str(), value.as_str(), prefix.len()));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> Dimension {
        Dimension::enumerated("status", &["pending", "active", "done"])
            .with_default("pending")
            .with_prefix("active", "a")
            .with_prefix("done", "d")
    }

    #[test]
    fn test_valid_set() {
        let set = DimensionSet::new(vec![
            status().with_order(1),
            Dimension::hierarchical("parent", "parent_uuid").with_order(2),
        ])
        .unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.is_ref_field("parent_uuid"));
        assert!(set.is_configured_key("status"));
        assert!(!set.is_configured_key("parent"));
    }

    #[test]
    fn test_too_many_dimensions() {
        let dims = (0..8)
            .map(|i| Dimension::enumerated(format!("d{i}"), &["x"]))
            .collect();
        assert!(matches!(
            DimensionSet::new(dims),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = DimensionSet::new(vec![status(), status()]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_reserved_name_rejected() {
        let result = DimensionSet::new(vec![Dimension::enumerated("uuid", &["x"])]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        let result = DimensionSet::new(vec![Dimension::hierarchical("parent", "created_at")]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_data_prefix_rejected() {
        let result = DimensionSet::new(vec![Dimension::enumerated("_data.x", &["x"])]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_prefix_conflicts_across_dimensions() {
        let result = DimensionSet::new(vec![
            status(),
            Dimension::enumerated("priority", &["low", "high"]).with_prefix("low", "a"),
        ]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_default_must_be_listed() {
        let result = DimensionSet::new(vec![
            Dimension::enumerated("status", &["pending"]).with_default("archived"),
        ]);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_hierarchical_requires_ref_field() {
        let mut dim = Dimension::hierarchical("parent", "parent_uuid");
        dim.ref_field = None;
        assert!(matches!(
            DimensionSet::new(vec![dim]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_match_prefix_prefers_longest() {
        let set = DimensionSet::new(vec![
            Dimension::enumerated("status", &["done", "deferred"])
                .with_prefix("done", "d")
                .with_prefix("deferred", "df"),
        ])
        .unwrap();
        let (dim, value, len) = set.match_prefix("df1").unwrap();
        assert_eq!((dim, value, len), ("status", "deferred", 2));
        let (_, value, len) = set.match_prefix("d1").unwrap();
        assert_eq!((value, len), ("done", 1));
    }
}
