//! Field migrations
//!
//! Store-level operations for evolving document fields: rename, add,
//! remove, transform, and a non-mutating validate. Every mutating
//! operation honors `dry_run`, processes what it can, and reports
//! per-document failures; a mixed result surfaces as
//! `Error::PartialFailure` carrying both the modified uuids and the
//! failures.

use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{Document, Value, DATA_PREFIX};

/// Which key namespace an operation touches: the configured dimension
/// key, its `_data.`-prefixed twin, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldScope {
    DimensionOnly,
    DataOnly,
    #[default]
    Both,
}

impl FieldScope {
    /// The concrete document keys a field name expands to under this
    /// scope. Names already carrying the data prefix stay as-is.
    fn keys(self, name: &str) -> Vec<String> {
        if name.starts_with(DATA_PREFIX) {
            return vec![name.to_string()];
        }
        match self {
            FieldScope::DimensionOnly => vec![name.to_string()],
            FieldScope::DataOnly => vec![format!("{DATA_PREFIX}{name}")],
            FieldScope::Both => vec![name.to_string(), format!("{DATA_PREFIX}{name}")],
        }
    }
}

/// Named value transformer for `transform-field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformer {
    Lowercase,
    Uppercase,
    Trim,
}

impl Transformer {
    fn apply(self, value: &Value) -> std::result::Result<Value, String> {
        let Value::String(text) = value else {
            return Err(format!("transformer requires a string, got {}", value.type_name()));
        };
        let out = match self {
            Transformer::Lowercase => text.to_lowercase(),
            Transformer::Uppercase => text.to_uppercase(),
            Transformer::Trim => text.trim().to_string(),
        };
        Ok(Value::String(out))
    }
}

impl FromStr for Transformer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lowercase" => Ok(Transformer::Lowercase),
            "uppercase" => Ok(Transformer::Uppercase),
            "trim" => Ok(Transformer::Trim),
            other => Err(Error::parse(format!("unknown transformer '{other}'"))),
        }
    }
}

/// What a migration touched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationOutcome {
    /// Documents the operation attempted (modified + failed).
    pub processed: usize,
    pub modified: Vec<Uuid>,
    pub errors: Vec<(Uuid, String)>,
}

impl MigrationOutcome {
    fn record_modified(&mut self, uuid: Uuid) {
        self.modified.push(uuid);
        self.processed += 1;
    }

    fn record_error(&mut self, uuid: Uuid, message: impl Into<String>) {
        self.errors.push((uuid, message.into()));
        self.processed += 1;
    }

    fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(Error::PartialFailure {
                processed: self.processed,
                modified: self.modified,
                errors: self.errors,
            })
        }
    }
}

/// One finding from `migrate_validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub uuid: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub documents: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, uuid: Option<Uuid>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            uuid,
            message: message.into(),
        });
    }
}

impl Store {
    /// Move values from `old` to `new` on every document carrying
    /// `old`. Documents where `new` already exists fail individually.
    pub fn migrate_rename_field(
        &self,
        old: &str,
        new: &str,
        scope: FieldScope,
        dry_run: bool,
    ) -> Result<MigrationOutcome> {
        let pairs: Vec<(String, String)> = scope
            .keys(old)
            .into_iter()
            .zip(scope.keys(new))
            .collect();
        self.run_migration(dry_run, move |store, docs| {
            let mut outcome = MigrationOutcome::default();
            for doc in docs.iter_mut() {
                let mut changed = false;
                let mut failed = false;
                for (old_key, new_key) in &pairs {
                    if !doc.dimensions.contains_key(old_key) {
                        continue;
                    }
                    if doc.dimensions.contains_key(new_key) {
                        outcome.record_error(
                            doc.uuid,
                            format!("target field '{new_key}' already exists"),
                        );
                        failed = true;
                        break;
                    }
                    if let Some(message) = store.check_configured_value(new_key, &doc.dimensions[old_key])
                    {
                        outcome.record_error(doc.uuid, message);
                        failed = true;
                        break;
                    }
                    if let Some(value) = doc.dimensions.remove(old_key) {
                        doc.dimensions.insert(new_key.clone(), value);
                        changed = true;
                    }
                }
                if changed && !failed {
                    outcome.record_modified(doc.uuid);
                }
            }
            outcome
        })
    }

    /// Set `default` on every document missing the field.
    pub fn migrate_add_field(
        &self,
        name: &str,
        default: Value,
        data_field: bool,
        dry_run: bool,
    ) -> Result<MigrationOutcome> {
        let key = if data_field && !name.starts_with(DATA_PREFIX) {
            format!("{DATA_PREFIX}{name}")
        } else {
            name.to_string()
        };
        if let Some(message) = self.check_configured_value(&key, &default) {
            return Err(Error::invalid_value(message));
        }
        self.run_migration(dry_run, move |_store, docs| {
            let mut outcome = MigrationOutcome::default();
            for doc in docs.iter_mut() {
                if doc.dimensions.contains_key(&key) {
                    continue;
                }
                doc.dimensions.insert(key.clone(), default.clone());
                outcome.record_modified(doc.uuid);
            }
            outcome
        })
    }

    /// Delete the field from every document carrying it.
    pub fn migrate_remove_field(
        &self,
        name: &str,
        scope: FieldScope,
        dry_run: bool,
    ) -> Result<MigrationOutcome> {
        let keys = scope.keys(name);
        self.run_migration(dry_run, move |_store, docs| {
            let mut outcome = MigrationOutcome::default();
            for doc in docs.iter_mut() {
                let mut changed = false;
                for key in &keys {
                    changed |= doc.dimensions.remove(key).is_some();
                }
                if changed {
                    outcome.record_modified(doc.uuid);
                }
            }
            outcome
        })
    }

    /// Apply a named transformer to the field on every document
    /// carrying it. Non-string values and results that violate a
    /// configured dimension fail individually.
    pub fn migrate_transform_field(
        &self,
        name: &str,
        transformer: Transformer,
        scope: FieldScope,
        dry_run: bool,
    ) -> Result<MigrationOutcome> {
        let keys = scope.keys(name);
        self.run_migration(dry_run, move |store, docs| {
            let mut outcome = MigrationOutcome::default();
            for doc in docs.iter_mut() {
                let mut changed = false;
                let mut failed = false;
                for key in &keys {
                    let Some(value) = doc.dimensions.get(key) else {
                        continue;
                    };
                    match transformer.apply(value) {
                        Ok(transformed) => {
                            if let Some(message) =
                                store.check_configured_value(key, &transformed)
                            {
                                outcome.record_error(doc.uuid, message);
                                failed = true;
                                break;
                            }
                            if *value != transformed {
                                doc.dimensions.insert(key.clone(), transformed);
                                changed = true;
                            }
                        }
                        Err(message) => {
                            outcome.record_error(doc.uuid, format!("field '{key}': {message}"));
                            failed = true;
                            break;
                        }
                    }
                }
                if changed && !failed {
                    outcome.record_modified(doc.uuid);
                }
            }
            outcome
        })
    }

    /// Report configuration violations, broken parent references,
    /// missing body files, and orphaned body files. Never mutates.
    pub fn migrate_validate(&self) -> Result<ValidationReport> {
        let docs = self.list(&crate::query::ListOptions::default())?;
        let dims = self.dimension_set();
        let mut report = ValidationReport {
            documents: docs.len(),
            ..ValidationReport::default()
        };

        for doc in &docs {
            for (key, value) in &doc.dimensions {
                if key.starts_with(DATA_PREFIX) {
                    continue;
                }
                let Some(dimension) = dims.by_storage_key(key) else {
                    report.push(Some(doc.uuid), format!("unknown dimension key '{key}'"));
                    continue;
                };
                if !value.is_simple() {
                    report.push(
                        Some(doc.uuid),
                        format!("non-simple value under dimension '{key}'"),
                    );
                    continue;
                }
                if dimension.is_hierarchical() {
                    let parent = value.canonical_string();
                    if parent.is_empty() {
                        continue;
                    }
                    let found = Uuid::parse_str(&parent)
                        .ok()
                        .is_some_and(|parent| docs.iter().any(|d| d.uuid == parent));
                    if !found {
                        report.push(
                            Some(doc.uuid),
                            format!("broken parent reference '{parent}' under '{key}'"),
                        );
                    }
                } else {
                    let text = value.canonical_string();
                    if !dimension.allows_value(&text) {
                        report.push(
                            Some(doc.uuid),
                            format!("value '{text}' is not allowed for dimension '{key}'"),
                        );
                    }
                }
            }
            if let Some(meta) = &doc.body_meta {
                if let Err(e) = self.body_storage().validate(meta) {
                    report.push(Some(doc.uuid), format!("body: {e}"));
                }
            }
        }

        for orphan in self.list_body_orphans()? {
            report.push(None, format!("orphaned body file '{orphan}'"));
        }
        Ok(report)
    }

    /// Value check against the configured dimension owning `key`, if
    /// any. `None` means acceptable.
    fn check_configured_value(&self, key: &str, value: &Value) -> Option<String> {
        if key.starts_with(DATA_PREFIX) {
            return None;
        }
        let dimension = self.dimension_set().by_storage_key(key)?;
        if !value.is_simple() {
            return Some(format!(
                "dimension '{key}' requires a simple value, got {}",
                value.type_name()
            ));
        }
        if !dimension.is_hierarchical() {
            let text = value.canonical_string();
            if !dimension.allows_value(&text) {
                return Some(format!(
                    "value '{text}' is not allowed for dimension '{key}'"
                ));
            }
        }
        None
    }

    fn run_migration(
        &self,
        dry_run: bool,
        f: impl FnOnce(&Store, &mut Vec<Document>) -> MigrationOutcome,
    ) -> Result<MigrationOutcome> {
        if dry_run {
            let mut docs = self.list(&crate::query::ListOptions::default())?;
            f(self, &mut docs).into_result()
        } else {
            self.with_write(|store, docs| Ok(f(store, docs)))?.into_result()
        }
    }
}
