//! SimpleID assignment over a live document set
//!
//! Positions are a stable function of creation order within a
//! partition: they are assigned once (next integer after the current
//! maximum) and persist on the document, so deleting an earlier
//! sibling leaves a gap instead of renumbering. Short forms are
//! assembled in repeated passes so a child's ID embeds its parent's
//! already-rendered form.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;
use uuid::Uuid;

use crate::canonical::CanonicalView;
use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::ids::transformer::IdTransformer;
use crate::partition::{build_partition, Partition, PartitionMap};
use crate::types::Document;

/// Passes before giving up on documents with unresolvable ancestor
/// chains.
const MAX_PASSES: usize = 10;

/// Bidirectional SimpleID ↔ UUID mapping for one document set.
#[derive(Debug, Default)]
pub struct IdMap {
    by_simple: BTreeMap<String, Uuid>,
    by_uuid: HashMap<Uuid, String>,
}

impl IdMap {
    pub fn uuid_for(&self, simple_id: &str) -> Option<Uuid> {
        self.by_simple.get(simple_id).copied()
    }

    pub fn simple_for(&self, uuid: Uuid) -> Option<&str> {
        self.by_uuid.get(&uuid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_simple.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_simple.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Uuid)> {
        self.by_simple.iter().map(|(s, u)| (s.as_str(), *u))
    }

    fn insert(&mut self, simple_id: String, uuid: Uuid) -> bool {
        if self.by_simple.contains_key(&simple_id) {
            return false;
        }
        self.by_simple.insert(simple_id.clone(), uuid);
        self.by_uuid.insert(uuid, simple_id);
        true
    }
}

pub struct IdGenerator<'a> {
    dims: &'a DimensionSet,
    transformer: IdTransformer<'a>,
}

impl<'a> IdGenerator<'a> {
    pub fn new(dims: &'a DimensionSet, view: &'a CanonicalView) -> Self {
        Self {
            dims,
            transformer: IdTransformer::new(dims, view),
        }
    }

    /// Compute the SimpleID ↔ UUID mapping over the entire set.
    pub fn generate(&self, docs: &[Document]) -> IdMap {
        let positions = effective_positions(docs, self.dims);
        let mut partitions: HashMap<Uuid, Partition> = HashMap::new();
        for doc in docs {
            let mut partition = build_partition(doc, self.dims);
            partition.position = positions.get(&doc.uuid).copied().unwrap_or(0);
            partitions.insert(doc.uuid, partition);
        }

        // Deterministic visit order so ID collisions (possible only
        // when a non-canonical value has no prefix) resolve the same
        // way every time.
        let mut ordered: Vec<&Document> = docs.iter().collect();
        ordered.sort_by(|a, b| (a.created_at, a.uuid).cmp(&(b.created_at, b.uuid)));

        let live: HashSet<Uuid> = docs.iter().map(|d| d.uuid).collect();
        let mut map = IdMap::default();
        let mut rendered: HashMap<Uuid, String> = HashMap::new();
        let mut remaining: Vec<&Document> = ordered;

        for _pass in 0..MAX_PASSES {
            if remaining.is_empty() {
                break;
            }
            let mut next_round = Vec::new();
            let mut progressed = false;

            for doc in remaining {
                match self.render(doc, &partitions[&doc.uuid], &rendered, &live) {
                    RenderOutcome::Ready(short) => {
                        if map.insert(short.clone(), doc.uuid) {
                            rendered.insert(doc.uuid, short);
                        } else {
                            debug!(uuid = %doc.uuid, short = %short, "simple id collision; document stays uuid-only");
                        }
                        progressed = true;
                    }
                    RenderOutcome::WaitingOnParent => next_round.push(doc),
                    RenderOutcome::Unresolvable => {
                        debug!(uuid = %doc.uuid, "ancestor chain broken; document stays uuid-only");
                        progressed = true;
                    }
                }
            }

            remaining = next_round;
            if !progressed {
                break;
            }
        }

        map
    }

    fn render(
        &self,
        doc: &Document,
        partition: &Partition,
        rendered: &HashMap<Uuid, String>,
        live: &HashSet<Uuid>,
    ) -> RenderOutcome {
        let mut resolved = partition.clone();
        for dimension in self.dims.hierarchical() {
            let value = doc.dimension_string(dimension.storage_key());
            if value.is_empty() {
                continue;
            }
            let parent = match Uuid::parse_str(&value) {
                Ok(parent) => parent,
                Err(_) => return RenderOutcome::Unresolvable,
            };
            if !live.contains(&parent) {
                return RenderOutcome::Unresolvable;
            }
            match rendered.get(&parent) {
                Some(short) => resolved.set_value(&dimension.name, short.clone()),
                None => return RenderOutcome::WaitingOnParent,
            }
        }
        RenderOutcome::Ready(self.transformer.to_short(&resolved))
    }

    /// Resolve a single SimpleID against the live set. UUID strings
    /// pass through unchanged; prefix runs may arrive in any order.
    pub fn resolve(&self, simple_id: &str, docs: &[Document]) -> Result<Uuid> {
        if let Ok(uuid) = Uuid::parse_str(simple_id) {
            return Ok(uuid);
        }
        let canonical = self.canonicalize(simple_id)?;
        self.generate(docs)
            .uuid_for(&canonical)
            .ok_or_else(|| Error::not_found(format!("no document with id '{simple_id}'")))
    }

    /// Re-render every segment of a short form in canonical prefix
    /// order.
    fn canonicalize(&self, simple_id: &str) -> Result<String> {
        let segments: Vec<String> = simple_id
            .split('.')
            .map(|segment| self.transformer.canonicalize_segment(segment))
            .collect::<Result<_>>()?;
        Ok(segments.join("."))
    }

    /// Partition including every dimension with a non-empty value
    /// (parent reference included), for diagnostics and logging.
    pub fn fully_qualified_partition(&self, doc: &Document, position: u64) -> Partition {
        let mut partition = build_partition(doc, self.dims);
        partition.position = position;
        partition
    }
}

enum RenderOutcome {
    Ready(String),
    WaitingOnParent,
    Unresolvable,
}

/// Effective position of every document: persisted positions are
/// kept; unassigned (0) or duplicated positions get the next integer
/// after the partition's current maximum, visiting documents in
/// historical order. On a set with no positions at all this
/// degenerates to plain historical numbering.
pub fn effective_positions(docs: &[Document], dims: &DimensionSet) -> HashMap<Uuid, u64> {
    let map = PartitionMap::build(docs, dims);

    let mut out = HashMap::new();
    for (_key, group) in map.iter() {
        let mut used = HashSet::new();
        let mut max = 0u64;
        for doc in group {
            if doc.position > 0 && used.insert(doc.position) {
                max = max.max(doc.position);
                out.insert(doc.uuid, doc.position);
            }
        }
        for doc in group {
            if !out.contains_key(&doc.uuid) {
                max += 1;
                out.insert(doc.uuid, max);
            }
        }
    }
    out
}

/// Write effective positions back onto the documents. The store runs
/// this after load (legacy files carry no positions) and after adds.
pub fn assign_positions(docs: &mut [Document], dims: &DimensionSet) {
    let positions = effective_positions(docs, dims);
    for doc in docs {
        if let Some(position) = positions.get(&doc.uuid) {
            doc.position = *position;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CanonicalFilter, WILDCARD};
    use crate::dimension::Dimension;
    use chrono::{Duration, Utc};

    fn dims() -> DimensionSet {
        DimensionSet::new(vec![
            Dimension::enumerated("status", &["pending", "active", "done"])
                .with_default("pending")
                .with_prefix("active", "a")
                .with_prefix("done", "d")
                .with_order(1),
            Dimension::enumerated("priority", &["low", "medium", "high"])
                .with_default("medium")
                .with_prefix("low", "l")
                .with_prefix("high", "h")
                .with_order(2),
            Dimension::hierarchical("parent", "parent_uuid").with_order(3),
        ])
        .unwrap()
    }

    fn view() -> CanonicalView {
        CanonicalView::new(vec![
            CanonicalFilter::new("status", "pending"),
            CanonicalFilter::new("priority", "medium"),
            CanonicalFilter::new("parent", WILDCARD),
        ])
    }

    fn doc(title: &str, offset_us: i64, entries: &[(&str, &str)]) -> Document {
        let created = Utc::now() + Duration::microseconds(offset_us);
        let mut doc = Document::new(Uuid::new_v4(), title, created);
        for (key, value) in entries {
            doc.dimensions.insert(key.to_string(), (*value).into());
        }
        doc
    }

    #[test]
    fn test_basic_canonical_and_prefixed_ids() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);
        let mut docs = vec![
            doc("a", 0, &[("status", "pending"), ("priority", "medium")]),
            doc("b", 1, &[("status", "done"), ("priority", "medium")]),
            doc("c", 2, &[("status", "pending"), ("priority", "high")]),
        ];
        assign_positions(&mut docs, &dims);

        let map = generator.generate(&docs);
        assert_eq!(map.uuid_for("1"), Some(docs[0].uuid));
        assert_eq!(map.uuid_for("d1"), Some(docs[1].uuid));
        assert_eq!(map.uuid_for("h1"), Some(docs[2].uuid));
        assert_eq!(generator.resolve("h1", &docs).unwrap(), docs[2].uuid);
    }

    #[test]
    fn test_hierarchy_and_gap_stability() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);

        let root = doc("r", 0, &[]);
        let root_uuid = root.uuid.to_string();
        let mut docs = vec![
            root,
            doc("x", 1, &[("parent_uuid", root_uuid.as_str())]),
            doc("y", 2, &[("parent_uuid", root_uuid.as_str())]),
            doc(
                "z",
                3,
                &[("parent_uuid", root_uuid.as_str()), ("status", "done")],
            ),
        ];
        assign_positions(&mut docs, &dims);

        let map = generator.generate(&docs);
        assert_eq!(map.simple_for(docs[1].uuid), Some("1.1"));
        assert_eq!(map.simple_for(docs[2].uuid), Some("1.2"));
        assert_eq!(map.simple_for(docs[3].uuid), Some("1.d1"));

        // Deleting the earlier sibling leaves Y's position untouched.
        let y = docs[2].uuid;
        let z = docs[3].uuid;
        docs.remove(1);
        let map = generator.generate(&docs);
        assert_eq!(map.simple_for(y), Some("1.2"));
        assert_eq!(map.simple_for(z), Some("1.d1"));
    }

    #[test]
    fn test_new_document_takes_next_after_max() {
        let dims = dims();
        let mut docs = vec![doc("a", 0, &[]), doc("b", 1, &[])];
        assign_positions(&mut docs, &dims);
        assert_eq!(docs[1].position, 2);

        docs.remove(0);
        docs.push(doc("c", 2, &[]));
        assign_positions(&mut docs, &dims);
        // b keeps 2; c slots in after the live maximum.
        assert_eq!(docs[0].position, 2);
        assert_eq!(docs[1].position, 3);
    }

    #[test]
    fn test_generate_is_bijective() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);
        let mut docs: Vec<Document> = (0..20)
            .map(|i| {
                doc(
                    "t",
                    i,
                    &[
                        ("status", ["pending", "active", "done"][i as usize % 3]),
                        ("priority", ["low", "medium", "high"][i as usize % 2]),
                    ],
                )
            })
            .collect();
        assign_positions(&mut docs, &dims);

        let map = generator.generate(&docs);
        assert_eq!(map.len(), docs.len());
        let uuids: HashSet<Uuid> = map.iter().map(|(_, u)| u).collect();
        assert_eq!(uuids.len(), docs.len());
        for (simple, uuid) in map.iter() {
            assert_eq!(generator.resolve(simple, &docs).unwrap(), uuid);
        }
    }

    #[test]
    fn test_broken_ancestor_chain_yields_no_id() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);
        let missing = Uuid::new_v4().to_string();
        let mut docs = vec![doc("orphan", 0, &[("parent_uuid", missing.as_str())])];
        assign_positions(&mut docs, &dims);

        let map = generator.generate(&docs);
        assert_eq!(map.simple_for(docs[0].uuid), None);
    }

    #[test]
    fn test_resolve_accepts_uuid_and_unordered_prefixes() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);
        let mut docs = vec![doc("a", 0, &[("status", "done"), ("priority", "high")])];
        assign_positions(&mut docs, &dims);

        let uuid = docs[0].uuid;
        assert_eq!(generator.resolve(&uuid.to_string(), &docs).unwrap(), uuid);
        assert_eq!(generator.resolve("dh1", &docs).unwrap(), uuid);
        assert_eq!(generator.resolve("hd1", &docs).unwrap(), uuid);
        assert!(generator.resolve("dh9", &docs).unwrap_err().is_not_found());
        assert!(matches!(
            generator.resolve("zz1", &docs),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_unrelated_mutation_keeps_ids_stable() {
        let dims = dims();
        let view = view();
        let generator = IdGenerator::new(&dims, &view);
        let mut docs = vec![
            doc("a", 0, &[("status", "done")]),
            doc("b", 1, &[("priority", "high")]),
        ];
        assign_positions(&mut docs, &dims);
        let before = generator.generate(&docs);
        let a_id = before.simple_for(docs[0].uuid).unwrap().to_string();

        // Mutating b's partition does not disturb a.
        docs[1]
            .dimensions
            .insert("priority".to_string(), "low".into());
        assign_positions(&mut docs, &dims);
        let after = generator.generate(&docs);
        assert_eq!(after.simple_for(docs[0].uuid), Some(a_id.as_str()));
    }
}
