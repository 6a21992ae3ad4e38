//! Store orchestrator
//!
//! Owns the in-memory document set and ties together persistence,
//! locking, validation, body storage, and the ID engine. Every write
//! operation acquires the cross-process lock, re-reads the on-disk
//! state, mutates a working copy, and atomically saves, so the
//! serialized order on disk is the lock-acquisition order. Read
//! operations serve from the in-memory snapshot. IDs are accepted as
//! UUIDs or SimpleIDs everywhere.

pub mod persist;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::BodyStorage;
use crate::canonical::CanonicalView;
use crate::clock::{Clock, SystemClock};
use crate::command::{self, IdResolver, ResolveIds};
use crate::config::{BodySection, StoreConfig};
use crate::dimension::DimensionSet;
use crate::error::{Error, Result};
use crate::ids::generator::assign_positions;
use crate::ids::IdGenerator;
use crate::lock::{lock_path, StoreLock};
use crate::partition::build_partition;
use crate::query::{ListOptions, QueryProcessor, WherePredicate};
use crate::types::{
    BodyFormat, Document, Value, BODY_EMBED_KEY, BODY_FORMAT_KEY, BODY_KEY, DATA_PREFIX,
};

use persist::{StoreFile, StoreMetadata};

/// Mutation payload for `update` and the bulk update variants. A
/// `Value::Null` dimension entry deletes the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub dimensions: BTreeMap<String, Value>,
}

impl UpdateRequest {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }
}

impl ResolveIds for UpdateRequest {
    fn resolve_ids(&mut self, resolver: &dyn IdResolver) {
        command::resolve_dimension_map(&mut self.dimensions, resolver);
    }
}

#[derive(Clone)]
struct Inner {
    documents: Vec<Document>,
    metadata: StoreMetadata,
}

pub struct Store {
    path: PathBuf,
    lock_file: PathBuf,
    dims: DimensionSet,
    view: CanonicalView,
    body: BodyStorage,
    body_section: BodySection,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    max_depth: usize,
    inner: RwLock<Inner>,
}

struct SetResolver<'a> {
    dims: &'a DimensionSet,
    view: &'a CanonicalView,
    docs: &'a [Document],
}

impl IdResolver for SetResolver<'_> {
    fn resolve_id(&self, id: &str) -> Option<String> {
        IdGenerator::new(self.dims, self.view)
            .resolve(id, self.docs)
            .ok()
            .map(|uuid| uuid.to_string())
    }

    fn is_ref_field(&self, key: &str) -> bool {
        self.dims.is_ref_field(key)
    }
}

/// Reserved `_body.*` keys pulled out of a dimensions map.
struct BodySpec {
    content: Option<String>,
    format: Option<BodyFormat>,
    force_embed: bool,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        path: impl Into<PathBuf>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.into();
        let (dims, view) = config.runtime()?;
        let body = BodyStorage::new(&path, &config.body);
        let lock_file = lock_path(&path);
        let now = clock.now();

        let store = Self {
            lock_file,
            dims,
            view,
            body,
            body_section: config.body.clone(),
            clock,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms()),
            max_depth: config.max_hierarchy_depth(),
            inner: RwLock::new(Inner {
                documents: Vec::new(),
                metadata: StoreMetadata::fresh(now, &config.body),
            }),
            path,
        };

        // The initial load takes the shared lock; snapshot reads
        // afterwards do not need the file lock.
        let _guard = StoreLock::shared(&store.lock_file, store.deadline())?;
        let state = store.load_state()?;
        info!(
            path = %store.path.display(),
            documents = state.documents.len(),
            "store opened"
        );
        *store.write_inner() = state;
        Ok(store)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn dimension_set(&self) -> &DimensionSet {
        &self.dims
    }

    pub fn canonical_view(&self) -> &CanonicalView {
        &self.view
    }

    pub(crate) fn body_storage(&self) -> &BodyStorage {
        &self.body
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.lock_timeout
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the on-disk state, self-healing missing body files and
    /// deriving positions legacy files lack.
    fn load_state(&self) -> Result<Inner> {
        match persist::load(&self.path)? {
            Some(mut file) => {
                for doc in &mut file.documents {
                    let missing = doc
                        .body_meta
                        .as_ref()
                        .is_some_and(|meta| meta.is_file() && self.body.validate(meta).is_err());
                    if missing {
                        warn!(uuid = %doc.uuid, "body file missing; clearing body meta");
                        doc.body_meta = None;
                        doc.body = String::new();
                    }
                }
                assign_positions(&mut file.documents, &self.dims);
                Ok(Inner {
                    documents: file.documents,
                    metadata: file.metadata,
                })
            }
            None => Ok(Inner {
                documents: Vec::new(),
                metadata: StoreMetadata::fresh(self.clock.now(), &self.body_section),
            }),
        }
    }

    /// Run one exclusive load-mutate-save cycle. The mutation runs on
    /// a working copy: a validation error leaves both memory and disk
    /// untouched, and a save error leaves memory at the pre-mutation
    /// on-disk state.
    pub(crate) fn with_write<T>(
        &self,
        f: impl FnOnce(&Store, &mut Vec<Document>) -> Result<T>,
    ) -> Result<T> {
        let _guard = StoreLock::exclusive(&self.lock_file, self.deadline())?;
        let fresh = self.load_state()?;
        let mut inner = self.write_inner();
        *inner = fresh;

        let mut working = inner.clone();
        let result = f(self, &mut working.documents)?;
        working.metadata.touch(self.clock.now(), &self.body_section);
        persist::save(
            &self.path,
            &StoreFile {
                documents: working.documents.clone(),
                metadata: working.metadata.clone(),
            },
        )?;
        debug!(documents = working.documents.len(), "store saved");
        *inner = working;
        Ok(result)
    }

    /// Resolve an ID (UUID or SimpleID) against a document slice,
    /// requiring the document to exist.
    pub(crate) fn resolve_in(&self, docs: &[Document], id: &str) -> Result<Uuid> {
        let uuid = IdGenerator::new(&self.dims, &self.view).resolve(id, docs)?;
        if docs.iter().any(|d| d.uuid == uuid) {
            Ok(uuid)
        } else {
            Err(Error::not_found(format!("no document with id '{id}'")))
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// List documents with filtering, search, ordering, SimpleID
    /// attachment, and pagination. Returned documents are value
    /// copies.
    pub fn list(&self, opts: &ListOptions) -> Result<Vec<Document>> {
        let inner = self.read_inner();
        let processor = QueryProcessor::new(&self.dims, &self.view);
        let hydrate = |doc: &Document| self.body.read(doc.body_meta.as_ref(), &doc.body).ok();
        processor.list(&inner.documents, opts, Some(&hydrate))
    }

    /// Resolve a SimpleID (or UUID string) to a UUID.
    pub fn resolve_uuid(&self, simple_id: &str) -> Result<Uuid> {
        let inner = self.read_inner();
        self.resolve_in(&inner.documents, simple_id)
    }

    /// Fetch one document by UUID with its body hydrated and SimpleID
    /// attached.
    pub fn get_by_id(&self, uuid: Uuid) -> Result<Option<Document>> {
        let inner = self.read_inner();
        let Some(doc) = inner.documents.iter().find(|d| d.uuid == uuid) else {
            return Ok(None);
        };
        let mut doc = doc.clone();
        doc.body = self.body.read(doc.body_meta.as_ref(), &doc.body)?;
        let map = IdGenerator::new(&self.dims, &self.view).generate(&inner.documents);
        doc.simple_id = map.simple_for(uuid).map(str::to_string);
        Ok(Some(doc))
    }

    /// Orphaned files in the bodies directory.
    pub fn list_body_orphans(&self) -> Result<Vec<String>> {
        let inner = self.read_inner();
        self.body
            .list_orphans(inner.documents.iter().filter_map(|d| d.body_meta.as_ref()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create a document. `dimensions` may carry the reserved `_body`,
    /// `_body.format`, and `_body.embed` keys; hierarchical reference
    /// values may be SimpleIDs.
    pub fn add(&self, title: &str, dimensions: BTreeMap<String, Value>) -> Result<Uuid> {
        self.with_write(|store, docs| {
            let mut dimensions = dimensions.clone();
            dimensions.retain(|_, value| !matches!(value, Value::Null));
            let spec = extract_body_spec(&mut dimensions)?;
            {
                let resolver = SetResolver {
                    dims: &store.dims,
                    view: &store.view,
                    docs,
                };
                command::resolve_dimension_map(&mut dimensions, &resolver);
            }
            store.validate_dimension_entries(&dimensions)?;

            let now = store.clock.now();
            let uuid = Uuid::new_v4();
            let mut doc = Document::new(uuid, title, now);
            doc.dimensions = dimensions;
            if let Some(content) = &spec.content {
                let format = spec.format.unwrap_or_default();
                let (meta, embedded) =
                    store.body.write(uuid, content, format, spec.force_embed)?;
                doc.body = embedded;
                doc.body_meta = retained_meta(meta);
            }
            docs.push(doc);
            assign_positions(docs, &store.dims);
            Ok(uuid)
        })
    }

    /// Update a document addressed by UUID or SimpleID.
    pub fn update(&self, id: &str, req: UpdateRequest) -> Result<()> {
        self.with_write(|store, docs| {
            let uuid = store.resolve_in(docs, id)?;
            let mut req = req;
            {
                let resolver = SetResolver {
                    dims: &store.dims,
                    view: &store.view,
                    docs,
                };
                req.resolve_ids(&resolver);
            }
            store.apply_update(docs, uuid, &req)
        })
    }

    /// Delete a document. Without `cascade`, a document with
    /// hierarchical children is refused; with it, the whole subtree
    /// goes.
    pub fn delete(&self, id: &str, cascade: bool) -> Result<()> {
        self.with_write(|store, docs| {
            let uuid = store.resolve_in(docs, id)?;
            let subtree = store.collect_subtree(docs, uuid);
            if !cascade && subtree.len() > 1 {
                return Err(Error::conflict(format!(
                    "document '{id}' has {} child document(s); delete with cascade",
                    subtree.len() - 1
                )));
            }
            store.remove_documents(docs, &subtree);
            Ok(())
        })
    }

    /// Delete all documents matching the dimension filters. Returns
    /// the number removed.
    pub fn delete_by_dimension(
        &self,
        filters: BTreeMap<String, crate::query::FilterValue>,
    ) -> Result<usize> {
        let opts = ListOptions {
            filters,
            ..ListOptions::default()
        };
        self.with_write(|store, docs| {
            let processor = QueryProcessor::new(&store.dims, &store.view);
            let matched: HashSet<Uuid> = processor
                .list(docs, &opts, None)?
                .into_iter()
                .map(|d| d.uuid)
                .collect();
            store.remove_documents(docs, &matched);
            Ok(matched.len())
        })
    }

    /// Apply an update to all documents matching the dimension
    /// filters. Returns the number updated.
    pub fn update_by_dimension(
        &self,
        filters: BTreeMap<String, crate::query::FilterValue>,
        req: UpdateRequest,
    ) -> Result<usize> {
        let opts = ListOptions {
            filters,
            ..ListOptions::default()
        };
        self.with_write(|store, docs| {
            let processor = QueryProcessor::new(&store.dims, &store.view);
            let matched: Vec<Uuid> = processor
                .list(docs, &opts, None)?
                .into_iter()
                .map(|d| d.uuid)
                .collect();
            let mut req = req;
            {
                let resolver = SetResolver {
                    dims: &store.dims,
                    view: &store.view,
                    docs,
                };
                req.resolve_ids(&resolver);
            }
            for uuid in &matched {
                store.apply_update(docs, *uuid, &req)?;
            }
            Ok(matched.len())
        })
    }

    /// Delete all documents matching a WHERE predicate. Returns the
    /// number removed.
    pub fn delete_where(&self, predicate: &str, params: Vec<Value>) -> Result<usize> {
        let bound = WherePredicate::parse(predicate)?.bind(params)?;
        self.with_write(|store, docs| {
            let matched: HashSet<Uuid> = docs
                .iter()
                .filter(|doc| bound.matches(doc, &store.dims))
                .map(|doc| doc.uuid)
                .collect();
            store.remove_documents(docs, &matched);
            Ok(matched.len())
        })
    }

    /// Apply an update to all documents matching a WHERE predicate.
    /// Returns the number updated.
    pub fn update_where(
        &self,
        predicate: &str,
        req: UpdateRequest,
        params: Vec<Value>,
    ) -> Result<usize> {
        let bound = WherePredicate::parse(predicate)?.bind(params)?;
        self.with_write(|store, docs| {
            let matched: Vec<Uuid> = docs
                .iter()
                .filter(|doc| bound.matches(doc, &store.dims))
                .map(|doc| doc.uuid)
                .collect();
            let mut req = req;
            {
                let resolver = SetResolver {
                    dims: &store.dims,
                    view: &store.view,
                    docs,
                };
                req.resolve_ids(&resolver);
            }
            for uuid in &matched {
                store.apply_update(docs, *uuid, &req)?;
            }
            Ok(matched.len())
        })
    }

    /// Apply an update to each resolvable ID in `ids`. Unresolvable
    /// entries are skipped; returns the number updated.
    pub fn update_by_uuids(&self, ids: &[String], req: UpdateRequest) -> Result<usize> {
        self.with_write(|store, docs| {
            let mut seen = HashSet::new();
            let matched: Vec<Uuid> = ids
                .iter()
                .filter_map(|id| store.resolve_in(docs, id).ok())
                .filter(|uuid| seen.insert(*uuid))
                .collect();
            let mut req = req;
            {
                let resolver = SetResolver {
                    dims: &store.dims,
                    view: &store.view,
                    docs,
                };
                req.resolve_ids(&resolver);
            }
            for uuid in &matched {
                store.apply_update(docs, *uuid, &req)?;
            }
            Ok(matched.len())
        })
    }

    /// Delete each resolvable ID in `ids`. Unresolvable entries are
    /// skipped; returns the number removed.
    pub fn delete_by_uuids(&self, ids: &[String]) -> Result<usize> {
        self.with_write(|store, docs| {
            let matched: HashSet<Uuid> = ids
                .iter()
                .filter_map(|id| store.resolve_in(docs, id).ok())
                .collect();
            store.remove_documents(docs, &matched);
            Ok(matched.len())
        })
    }

    // ------------------------------------------------------------------
    // Mutation internals
    // ------------------------------------------------------------------

    fn apply_update(&self, docs: &mut Vec<Document>, uuid: Uuid, req: &UpdateRequest) -> Result<()> {
        let index = docs
            .iter()
            .position(|d| d.uuid == uuid)
            .ok_or_else(|| Error::not_found(format!("no document with uuid '{uuid}'")))?;

        let mut dimensions = req.dimensions.clone();
        let spec = extract_body_spec(&mut dimensions)?;
        let mut deletions = Vec::new();
        dimensions.retain(|key, value| {
            if matches!(value, Value::Null) {
                deletions.push(key.clone());
                false
            } else {
                true
            }
        });
        self.validate_dimension_entries(&dimensions)?;

        // Hierarchy invariants hold before anything mutates.
        for (key, value) in &dimensions {
            if self.dims.is_ref_field(key) {
                let parent = value.canonical_string();
                if !parent.is_empty() {
                    self.check_hierarchy(docs, uuid, key, &parent)?;
                }
            }
        }

        let old_key = build_partition(&docs[index], &self.dims).key();
        let now = self.clock.now();
        let new_body = req.body.clone().or(spec.content);
        {
            let doc = &mut docs[index];
            if let Some(title) = &req.title {
                doc.title = title.clone();
            }
            for key in &deletions {
                doc.dimensions.remove(key);
            }
            for (key, value) in dimensions {
                doc.dimensions.insert(key, value);
            }
            if let Some(content) = new_body {
                let format = spec
                    .format
                    .or(doc.body_meta.as_ref().map(|m| m.format))
                    .unwrap_or_default();
                let old_meta = doc.body_meta.clone();
                let (meta, embedded) =
                    self.body.write(doc.uuid, &content, format, spec.force_embed)?;
                doc.body = embedded;
                doc.body_meta = retained_meta(meta);
                let superseded = old_meta.as_ref().is_some_and(|old| {
                    old.is_file()
                        && old.filename != doc.body_meta.as_ref().and_then(|m| m.filename.clone())
                });
                if superseded {
                    if let Err(e) = self.body.delete(old_meta.as_ref()) {
                        warn!(uuid = %doc.uuid, error = %e, "failed to delete superseded body file");
                    }
                }
            }
            doc.updated_at = now;
        }

        let new_key = build_partition(&docs[index], &self.dims).key();
        if new_key != old_key {
            // The document joins a new partition at the next free
            // position; siblings in the old one keep theirs.
            docs[index].position = 0;
            assign_positions(docs, &self.dims);
        }
        Ok(())
    }

    /// Refuse self-reference and cycles on reparent. The ancestor
    /// walk is capped; exceeding the cap counts as a conflict.
    fn check_hierarchy(
        &self,
        docs: &[Document],
        doc_uuid: Uuid,
        ref_field: &str,
        new_parent: &str,
    ) -> Result<()> {
        let Ok(parent) = Uuid::parse_str(new_parent) else {
            // Dangling references are permitted; they simply never
            // render a SimpleID.
            return Ok(());
        };
        if parent == doc_uuid {
            return Err(Error::conflict("a document cannot be its own parent"));
        }
        let mut current = parent;
        for _ in 0..self.max_depth {
            let Some(ancestor) = docs.iter().find(|d| d.uuid == current) else {
                return Ok(());
            };
            if ancestor.uuid == doc_uuid {
                return Err(Error::conflict(
                    "update would create a cycle in the hierarchy",
                ));
            }
            let next = ancestor.dimension_string(ref_field);
            match Uuid::parse_str(&next) {
                Ok(next) => current = next,
                Err(_) => return Ok(()),
            }
            if current == doc_uuid {
                return Err(Error::conflict(
                    "update would create a cycle in the hierarchy",
                ));
            }
        }
        Err(Error::conflict(format!(
            "ancestor chain exceeds the configured depth of {}",
            self.max_depth
        )))
    }

    /// A document and all its hierarchical descendants.
    fn collect_subtree(&self, docs: &[Document], root: Uuid) -> HashSet<Uuid> {
        let mut subtree = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for doc in docs {
                if subtree.contains(&doc.uuid) {
                    continue;
                }
                let is_child = self.dims.hierarchical().any(|dim| {
                    Uuid::parse_str(&doc.dimension_string(dim.storage_key()))
                        .is_ok_and(|parent| parent == current)
                });
                if is_child {
                    subtree.insert(doc.uuid);
                    queue.push_back(doc.uuid);
                }
            }
        }
        subtree
    }

    fn remove_documents(&self, docs: &mut Vec<Document>, uuids: &HashSet<Uuid>) {
        let mut removed = Vec::new();
        docs.retain(|doc| {
            if uuids.contains(&doc.uuid) {
                removed.push((doc.uuid, doc.body_meta.clone()));
                false
            } else {
                true
            }
        });
        for (uuid, meta) in removed {
            if let Err(e) = self.body.delete(meta.as_ref()) {
                warn!(%uuid, error = %e, "failed to delete body file");
            }
        }
    }

    fn validate_dimension_entries(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        for (key, value) in entries {
            if key.starts_with(DATA_PREFIX) {
                continue;
            }
            let Some(dimension) = self.dims.by_storage_key(key) else {
                return Err(Error::invalid_value(format!(
                    "unknown dimension key '{key}'"
                )));
            };
            if !value.is_simple() {
                return Err(Error::invalid_value(format!(
                    "dimension '{}' requires a simple value, got {}",
                    key,
                    value.type_name()
                )));
            }
            if !dimension.is_hierarchical() {
                let text = value.canonical_string();
                if !dimension.allows_value(&text) {
                    return Err(Error::invalid_value(format!(
                        "value '{}' is not allowed for dimension '{}'",
                        text, dimension.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn extract_body_spec(map: &mut BTreeMap<String, Value>) -> Result<BodySpec> {
    let content = match map.remove(BODY_KEY) {
        None => None,
        Some(Value::String(content)) => Some(content),
        Some(other) => {
            return Err(Error::invalid_value(format!(
                "{BODY_KEY} must be a string, got {}",
                other.type_name()
            )));
        }
    };
    let format = match map.remove(BODY_FORMAT_KEY) {
        None => None,
        Some(value) => Some(value.canonical_string().parse::<BodyFormat>()?),
    };
    let force_embed = match map.remove(BODY_EMBED_KEY) {
        None => false,
        Some(Value::Bool(flag)) => flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        Some(other) => {
            return Err(Error::invalid_value(format!(
                "{BODY_EMBED_KEY} must be a boolean, got {}",
                other.type_name()
            )));
        }
    };
    Ok(BodySpec {
        content,
        format,
        force_embed,
    })
}

/// Body meta worth persisting: file-backed bodies always, embedded
/// ones only when they carry a non-default format tag.
fn retained_meta(meta: crate::types::BodyMeta) -> Option<crate::types::BodyMeta> {
    if meta.is_file() || meta.format != BodyFormat::Txt {
        Some(meta)
    } else {
        None
    }
}
