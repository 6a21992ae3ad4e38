//! Store file format
//!
//! A single JSON document holding the document array and store
//! metadata. Saves go through a sibling temporary file promoted with
//! an atomic rename; a failed save cleans the temporary up and leaves
//! the previous on-disk state intact. Legacy files (no
//! `storage_version`, all bodies inline) load transparently and are
//! re-serialized in the hybrid format on the next write.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BodySection;
use crate::error::Result;
use crate::types::{ts_nanos, Document};

pub const STORE_VERSION: &str = "1.0";
pub const STORAGE_VERSION_HYBRID: &str = "hybrid_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    #[serde(default)]
    pub documents: Vec<Document>,
    pub metadata: StoreMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_version: Option<String>,
    #[serde(with = "ts_nanos")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "ts_nanos")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_storage: Option<BodyStorageMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyStorageMeta {
    pub embed_size_limit: usize,
    pub bodies_dir: String,
}

impl StoreMetadata {
    pub fn fresh(now: DateTime<Utc>, body: &BodySection) -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            storage_version: Some(STORAGE_VERSION_HYBRID.to_string()),
            created_at: now,
            updated_at: now,
            body_storage: Some(BodyStorageMeta {
                embed_size_limit: body.embed_size_limit,
                bodies_dir: body.bodies_dir.clone(),
            }),
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.storage_version.is_none()
    }

    /// Stamp the metadata for a hybrid-format write.
    pub fn touch(&mut self, now: DateTime<Utc>, body: &BodySection) {
        self.version = STORE_VERSION.to_string();
        self.storage_version = Some(STORAGE_VERSION_HYBRID.to_string());
        self.updated_at = now;
        self.body_storage = Some(BodyStorageMeta {
            embed_size_limit: body.embed_size_limit,
            bodies_dir: body.bodies_dir.clone(),
        });
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Load the store file. `None` when the file is missing or empty.
pub fn load(path: &Path) -> Result<Option<StoreFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Serialize to a temporary file and atomically rename over the
/// target.
pub fn save(path: &Path, file: &StoreFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(file)?;
    let temp = temp_path(path);
    if let Err(e) = fs::write(&temp, json).and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample(now: DateTime<Utc>) -> StoreFile {
        StoreFile {
            documents: vec![Document::new(Uuid::new_v4(), "first", now)],
            metadata: StoreMetadata::fresh(now, &BodySection::default()),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let now = Utc::now();
        let file = sample(now);

        save(&path, &file).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].title, "first");
        assert_eq!(
            loaded.metadata.storage_version.as_deref(),
            Some(STORAGE_VERSION_HYBRID)
        );
        assert!(!load(&path).unwrap().unwrap().metadata.is_legacy());
        // No temporary left behind.
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_missing_and_empty_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        assert!(load(&path).unwrap().is_none());
        fs::write(&path, "  \n").unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn test_legacy_format_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(
            &path,
            r#"{
  "documents": [
    {
      "uuid": "7f8de4c8-5f9a-4ab9-8d10-5b3c1a2b3c4d",
      "title": "legacy doc",
      "body": "inline body",
      "dimensions": {"status": "done"},
      "created_at": "2024-01-01T00:00:00.000000000Z",
      "updated_at": "2024-01-01T00:00:00.000000000Z"
    }
  ],
  "metadata": {
    "version": "1.0",
    "created_at": "2024-01-01T00:00:00.000000000Z",
    "updated_at": "2024-01-01T00:00:00.000000000Z"
  }
}"#,
        )
        .unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert!(loaded.metadata.is_legacy());
        assert_eq!(loaded.documents[0].body, "inline body");
        assert!(loaded.documents[0].body_meta.is_none());
        assert_eq!(loaded.documents[0].position, 0);
    }

    #[test]
    fn test_save_failure_leaves_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let now = Utc::now();
        save(&path, &sample(now)).unwrap();

        // A directory squatting on the temp path forces the write to
        // fail before the rename.
        fs::create_dir(temp_path(&path)).unwrap();
        let result = save(&path, &sample(now));
        assert!(result.is_err());

        fs::remove_dir(temp_path(&path)).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.documents.len(), 1);
    }
}
