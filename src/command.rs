//! Command preprocessing
//!
//! User-facing SimpleIDs are accepted anywhere a UUID is accepted.
//! Before a mutation is applied, its payload is walked and every ID
//! field is resolved to a UUID. Resolution failure leaves the
//! original value intact: callers may intentionally pass
//! yet-unknown references (bulk imports), and callers that require
//! existence verify it themselves.
//!
//! Without runtime reflection the walk is a visitor: every mutation
//! payload type implements [`ResolveIds`] over its ID-bearing fields,
//! and the generic helpers below cover nested records, sequences, and
//! dimension maps.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::types::Value;

/// Resolves SimpleIDs against a live document set and knows which
/// dimension keys hold parent references.
pub trait IdResolver {
    /// The UUID for `id`, or `None` when it does not resolve.
    fn resolve_id(&self, id: &str) -> Option<String>;

    /// True when `key` is a hierarchical reference field.
    fn is_ref_field(&self, key: &str) -> bool;
}

/// A mutation payload whose ID fields can be resolved in place.
pub trait ResolveIds {
    fn resolve_ids(&mut self, resolver: &dyn IdResolver);
}

impl<T: ResolveIds> ResolveIds for Option<T> {
    fn resolve_ids(&mut self, resolver: &dyn IdResolver) {
        if let Some(inner) = self {
            inner.resolve_ids(resolver);
        }
    }
}

impl<T: ResolveIds> ResolveIds for Vec<T> {
    fn resolve_ids(&mut self, resolver: &dyn IdResolver) {
        for item in self {
            item.resolve_ids(resolver);
        }
    }
}

impl<T: ResolveIds> ResolveIds for Box<T> {
    fn resolve_ids(&mut self, resolver: &dyn IdResolver) {
        self.as_mut().resolve_ids(resolver);
    }
}

/// Resolve a string ID field in place. Empty strings and values that
/// already are UUIDs pass through; unresolved values are kept.
pub fn resolve_id_field(field: &mut String, resolver: &dyn IdResolver) {
    if field.is_empty() || Uuid::parse_str(field).is_ok() {
        return;
    }
    if let Some(uuid) = resolver.resolve_id(field) {
        *field = uuid;
    }
}

pub fn resolve_optional_id_field(field: &mut Option<String>, resolver: &dyn IdResolver) {
    if let Some(field) = field {
        resolve_id_field(field, resolver);
    }
}

/// Resolve every string entry of a dimension map stored under a known
/// hierarchical reference field. Non-string values are left
/// untouched.
pub fn resolve_dimension_map(map: &mut BTreeMap<String, Value>, resolver: &dyn IdResolver) {
    for (key, value) in map.iter_mut() {
        if !resolver.is_ref_field(key) {
            continue;
        }
        if let Value::String(id) = value {
            resolve_id_field(id, resolver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResolver;

    impl IdResolver for FakeResolver {
        fn resolve_id(&self, id: &str) -> Option<String> {
            match id {
                "1" => Some("ae4f1a3e-0000-4000-8000-000000000001".to_string()),
                "1.d1" => Some("ae4f1a3e-0000-4000-8000-000000000002".to_string()),
                _ => None,
            }
        }

        fn is_ref_field(&self, key: &str) -> bool {
            key == "parent_uuid"
        }
    }

    #[test]
    fn test_resolves_known_simple_id() {
        let mut field = "1".to_string();
        resolve_id_field(&mut field, &FakeResolver);
        assert_eq!(field, "ae4f1a3e-0000-4000-8000-000000000001");
    }

    #[test]
    fn test_uuid_and_empty_pass_through() {
        let mut field = "ae4f1a3e-0000-4000-8000-00000000000f".to_string();
        resolve_id_field(&mut field, &FakeResolver);
        assert_eq!(field, "ae4f1a3e-0000-4000-8000-00000000000f");

        let mut empty = String::new();
        resolve_id_field(&mut empty, &FakeResolver);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_unresolved_value_is_kept() {
        let mut field = "not-yet-imported".to_string();
        resolve_id_field(&mut field, &FakeResolver);
        assert_eq!(field, "not-yet-imported");
    }

    #[test]
    fn test_dimension_map_resolution() {
        let mut map = BTreeMap::new();
        map.insert("parent_uuid".to_string(), Value::String("1.d1".to_string()));
        map.insert("status".to_string(), Value::String("1".to_string()));
        map.insert("_data.meta".to_string(), Value::Int(1));

        resolve_dimension_map(&mut map, &FakeResolver);
        // Only the reference field resolves.
        assert_eq!(
            map["parent_uuid"],
            Value::String("ae4f1a3e-0000-4000-8000-000000000002".to_string())
        );
        assert_eq!(map["status"], Value::String("1".to_string()));
        assert_eq!(map["_data.meta"], Value::Int(1));
    }
}
