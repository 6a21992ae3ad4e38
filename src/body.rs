//! Hybrid body storage
//!
//! Small bodies stay inline in the persisted document; bodies over
//! the embed limit are externalized to `<bodies_dir>/<uuid>.<fmt>`
//! next to the store file. Hidden files in the bodies directory are
//! ignored when computing orphans.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::config::BodySection;
use crate::error::{Error, Result};
use crate::types::{BodyFormat, BodyMeta, BodyStorageKind};

pub struct BodyStorage {
    bodies_dir: PathBuf,
    embed_size_limit: usize,
}

impl BodyStorage {
    /// Storage rooted next to the store file.
    pub fn new(store_path: &Path, section: &BodySection) -> Self {
        let parent = store_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            bodies_dir: parent.join(&section.bodies_dir),
            embed_size_limit: section.embed_size_limit,
        }
    }

    pub fn bodies_dir(&self) -> &Path {
        &self.bodies_dir
    }

    pub fn embed_size_limit(&self) -> usize {
        self.embed_size_limit
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.bodies_dir.join(filename)
    }

    fn filename(uuid: Uuid, format: BodyFormat) -> String {
        format!("{uuid}.{}", format.extension())
    }

    /// Store `content` for the document, embedded or externalized per
    /// policy. Returns the meta and the text to persist inline (empty
    /// when the body went to a file).
    pub fn write(
        &self,
        uuid: Uuid,
        content: &str,
        format: BodyFormat,
        force_embed: bool,
    ) -> Result<(BodyMeta, String)> {
        let size = content.len() as u64;
        if force_embed || content.len() <= self.embed_size_limit {
            return Ok((BodyMeta::embedded(format, size), content.to_string()));
        }

        fs::create_dir_all(&self.bodies_dir)?;
        let filename = Self::filename(uuid, format);
        fs::write(self.file_path(&filename), content)?;
        Ok((BodyMeta::file(format, filename, size), String::new()))
    }

    /// Materialize a body: the embedded text when inline, the file
    /// content otherwise.
    pub fn read(&self, meta: Option<&BodyMeta>, embedded: &str) -> Result<String> {
        match meta {
            Some(meta) if meta.is_file() => {
                let filename = meta
                    .filename
                    .as_deref()
                    .ok_or_else(|| Error::invalid_value("file body meta has no filename"))?;
                Ok(fs::read_to_string(self.file_path(filename))?)
            }
            _ => Ok(embedded.to_string()),
        }
    }

    /// Remove the backing file, if any. A no-op for inline bodies.
    pub fn delete(&self, meta: Option<&BodyMeta>) -> Result<()> {
        if let Some(meta) = meta {
            if let (BodyStorageKind::File, Some(filename)) = (meta.kind, meta.filename.as_deref()) {
                let path = self.file_path(filename);
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }

    /// Verify that a file-backed body's file exists.
    pub fn validate(&self, meta: &BodyMeta) -> Result<()> {
        if !meta.is_file() {
            return Ok(());
        }
        let filename = meta
            .filename
            .as_deref()
            .ok_or_else(|| Error::invalid_value("file body meta has no filename"))?;
        if !self.file_path(filename).exists() {
            return Err(Error::not_found(format!("body file '{filename}' is missing")));
        }
        Ok(())
    }

    /// Entries in the bodies directory referenced by no document and
    /// not hidden.
    pub fn list_orphans<'m>(
        &self,
        metas: impl Iterator<Item = &'m BodyMeta>,
    ) -> Result<Vec<String>> {
        if !self.bodies_dir.exists() {
            return Ok(Vec::new());
        }
        let referenced: HashSet<&str> = metas.filter_map(|m| m.filename.as_deref()).collect();

        let mut orphans = Vec::new();
        for entry in fs::read_dir(&self.bodies_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || referenced.contains(name) {
                continue;
            }
            orphans.push(name.to_string());
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Convert a body between embedded and file storage, deleting the
    /// superseded file when present.
    pub fn migrate(
        &self,
        meta: &BodyMeta,
        embedded: &str,
        target: BodyStorageKind,
        uuid: Uuid,
    ) -> Result<(BodyMeta, String)> {
        if meta.kind == target {
            return Ok((meta.clone(), embedded.to_string()));
        }
        let content = self.read(Some(meta), embedded)?;
        let result = match target {
            BodyStorageKind::Embedded => {
                (BodyMeta::embedded(meta.format, content.len() as u64), content.clone())
            }
            BodyStorageKind::File => {
                fs::create_dir_all(&self.bodies_dir)?;
                let filename = Self::filename(uuid, meta.format);
                fs::write(self.file_path(&filename), &content)?;
                (
                    BodyMeta::file(meta.format, filename, content.len() as u64),
                    String::new(),
                )
            }
        };
        if let Err(e) = self.delete(Some(meta)) {
            warn!(%uuid, error = %e, "failed to delete superseded body file");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir, limit: usize) -> BodyStorage {
        let section = BodySection {
            embed_size_limit: limit,
            ..BodySection::default()
        };
        BodyStorage::new(&dir.path().join("store.json"), &section)
    }

    #[test]
    fn test_small_body_embeds() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 20);
        let uuid = Uuid::new_v4();

        let (meta, embedded) = storage
            .write(uuid, "short", BodyFormat::Txt, false)
            .unwrap();
        assert_eq!(meta.kind, BodyStorageKind::Embedded);
        assert_eq!(embedded, "short");
        assert!(!storage.bodies_dir().exists());
        assert_eq!(storage.read(Some(&meta), &embedded).unwrap(), "short");
    }

    #[test]
    fn test_large_body_externalizes() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 20);
        let uuid = Uuid::new_v4();
        let content = "a very long body content that exceeds the limit";

        let (meta, embedded) = storage.write(uuid, content, BodyFormat::Md, false).unwrap();
        assert_eq!(meta.kind, BodyStorageKind::File);
        assert!(embedded.is_empty());
        assert_eq!(meta.filename.as_deref(), Some(format!("{uuid}.md").as_str()));
        assert_eq!(storage.read(Some(&meta), "").unwrap(), content);
        storage.validate(&meta).unwrap();

        storage.delete(Some(&meta)).unwrap();
        assert!(storage.validate(&meta).is_err());
    }

    #[test]
    fn test_force_embed_overrides_limit() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 4);
        let (meta, embedded) = storage
            .write(Uuid::new_v4(), "longer than four", BodyFormat::Txt, true)
            .unwrap();
        assert_eq!(meta.kind, BodyStorageKind::Embedded);
        assert_eq!(embedded, "longer than four");
    }

    #[test]
    fn test_orphans_skip_dotfiles_and_referenced() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 4);
        let uuid = Uuid::new_v4();
        let (meta, _) = storage
            .write(uuid, "externalized body", BodyFormat::Txt, false)
            .unwrap();

        fs::write(storage.bodies_dir().join("stray.txt"), "x").unwrap();
        fs::write(storage.bodies_dir().join(".hidden"), "x").unwrap();

        let orphans = storage.list_orphans(std::iter::once(&meta)).unwrap();
        assert_eq!(orphans, vec!["stray.txt".to_string()]);
    }

    #[test]
    fn test_migrate_between_kinds() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 4);
        let uuid = Uuid::new_v4();
        let (meta, embedded) = storage
            .write(uuid, "externalized body", BodyFormat::Txt, false)
            .unwrap();
        assert!(meta.is_file());

        let (meta, embedded) = storage
            .migrate(&meta, &embedded, BodyStorageKind::Embedded, uuid)
            .unwrap();
        assert_eq!(meta.kind, BodyStorageKind::Embedded);
        assert_eq!(embedded, "externalized body");
        // The superseded file is gone.
        assert!(storage
            .list_orphans(std::iter::empty())
            .unwrap()
            .is_empty());

        let (meta, embedded) = storage
            .migrate(&meta, &embedded, BodyStorageKind::File, uuid)
            .unwrap();
        assert!(meta.is_file());
        assert!(embedded.is_empty());
        assert_eq!(storage.read(Some(&meta), "").unwrap(), "externalized body");
    }
}
