//! Filter, order, and paginate a document set
//!
//! SimpleIDs are computed over the *entire* live set before any
//! filtering so hidden ancestors still yield valid IDs for visible
//! descendants.

use std::cmp::Ordering;

use crate::canonical::CanonicalView;
use crate::dimension::DimensionSet;
use crate::error::Result;
use crate::ids::IdGenerator;
use crate::query::{resolve_field, FilterValue, ListOptions};
use crate::types::Document;

/// Reads the content of a file-backed body for search matching.
/// `None` when the content is unavailable.
pub type BodyHydrator<'h> = &'h dyn Fn(&Document) -> Option<String>;

pub struct QueryProcessor<'a> {
    dims: &'a DimensionSet,
    view: &'a CanonicalView,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(dims: &'a DimensionSet, view: &'a CanonicalView) -> Self {
        Self { dims, view }
    }

    /// Run a listing over the live set: filter, search, order, attach
    /// SimpleIDs, then paginate. Returned documents are value copies.
    pub fn list(
        &self,
        docs: &[Document],
        opts: &ListOptions,
        hydrate: Option<BodyHydrator<'_>>,
    ) -> Result<Vec<Document>> {
        let generator = IdGenerator::new(self.dims, self.view);
        let id_map = generator.generate(docs);

        let mut selected: Vec<&Document> = docs
            .iter()
            .filter(|doc| self.matches_filters(doc, opts))
            .collect();

        if let Some(search) = opts.filter_by_search.as_deref() {
            let needle = search.to_lowercase();
            selected.retain(|doc| {
                if doc.title.to_lowercase().contains(&needle)
                    || doc.body.to_lowercase().contains(&needle)
                {
                    return true;
                }
                match (&doc.body_meta, hydrate) {
                    (Some(meta), Some(hydrate)) if meta.is_file() => hydrate(doc)
                        .map(|content| content.to_lowercase().contains(&needle))
                        .unwrap_or(false),
                    _ => false,
                }
            });
        }

        if !opts.order_by.is_empty() {
            selected.sort_by(|a, b| {
                for clause in &opts.order_by {
                    let left = self.order_key(a, &clause.column, &id_map);
                    let right = self.order_key(b, &clause.column, &id_map);
                    let ordering = if clause.descending {
                        right.cmp(&left)
                    } else {
                        left.cmp(&right)
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = opts.offset.unwrap_or(0);
        let limited: Vec<Document> = selected
            .into_iter()
            .skip(offset)
            .take(opts.limit.unwrap_or(usize::MAX))
            .map(|doc| {
                let mut doc = doc.clone();
                doc.simple_id = id_map.simple_for(doc.uuid).map(str::to_string);
                doc
            })
            .collect();

        Ok(limited)
    }

    fn matches_filters(&self, doc: &Document, opts: &ListOptions) -> bool {
        for (key, filter) in &opts.filters {
            if !self.matches_filter(doc, key, filter) {
                return false;
            }
        }
        true
    }

    fn matches_filter(&self, doc: &Document, key: &str, filter: &FilterValue) -> bool {
        let resolved = resolve_field(doc, key, self.dims);
        let is_ref = self.dims.is_ref_field(key);
        for candidate in filter.candidates() {
            match &resolved {
                Some(value) => {
                    if value.canonical_string() == candidate.canonical_string() {
                        return true;
                    }
                }
                None => {
                    // A hierarchical reference's absence means "no
                    // parent", which an empty filter value matches.
                    if is_ref && candidate.is_empty_ref() {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn order_key(&self, doc: &Document, column: &str, id_map: &crate::ids::IdMap) -> String {
        if column == "simple_id" {
            return id_map.simple_for(doc.uuid).unwrap_or("").to_string();
        }
        resolve_field(doc, column, self.dims)
            .map(|value| value.canonical_string())
            .unwrap_or_default()
    }
}
