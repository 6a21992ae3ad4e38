//! Canonical view
//!
//! The canonical view is the store's default partition slice: an
//! ordered list of `(dimension, value)` filters. A dimension whose
//! value matches its filter is *canonical* and is elided from
//! short-form IDs.

use serde::{Deserialize, Serialize};

/// Filter value matching any dimension value.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalFilter {
    pub dimension: String,
    pub value: String,
}

impl CanonicalFilter {
    pub fn new(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalView {
    filters: Vec<CanonicalFilter>,
}

impl CanonicalView {
    pub fn new(filters: Vec<CanonicalFilter>) -> Self {
        Self { filters }
    }

    pub fn filters(&self) -> &[CanonicalFilter] {
        &self.filters
    }

    pub fn has_filter(&self, dimension: &str) -> bool {
        self.filters.iter().any(|f| f.dimension == dimension)
    }

    pub fn filter_value(&self, dimension: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.dimension == dimension)
            .map(|f| f.value.as_str())
    }

    /// True when `value` matches the filter for `dimension`: equal to
    /// the filter value, or the filter is the `*` wildcard. Dimensions
    /// without a filter are never canonical.
    pub fn is_canonical(&self, dimension: &str, value: &str) -> bool {
        match self.filter_value(dimension) {
            Some(WILDCARD) => true,
            Some(filter) => filter == value,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> CanonicalView {
        CanonicalView::new(vec![
            CanonicalFilter::new("status", "pending"),
            CanonicalFilter::new("parent", WILDCARD),
        ])
    }

    #[test]
    fn test_filter_value() {
        let view = view();
        assert_eq!(view.filter_value("status"), Some("pending"));
        assert_eq!(view.filter_value("priority"), None);
        assert!(view.has_filter("parent"));
    }

    #[test]
    fn test_is_canonical() {
        let view = view();
        assert!(view.is_canonical("status", "pending"));
        assert!(!view.is_canonical("status", "done"));
        assert!(view.is_canonical("parent", "any-value-at-all"));
        assert!(!view.is_canonical("priority", "medium"));
    }
}
