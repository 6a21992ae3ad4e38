//! Store configuration
//!
//! A [`StoreConfig`] is constructible in code or loadable from a TOML
//! file layered with `NANOSTORE_*` environment overrides. The
//! dimension set and canonical view are built (and validated) from it
//! once at store open and stay immutable for the store's lifetime.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use serde::Deserialize;

use crate::canonical::{CanonicalFilter, CanonicalView};
use crate::dimension::{Dimension, DimensionSet};
use crate::error::{Error, Result};

const DEFAULT_EMBED_SIZE_LIMIT: usize = 1024; // 1 KiB
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 3000;
const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 10;

/// Top-level store configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub dimensions: Vec<Dimension>,
    pub canonical: Vec<CanonicalFilter>,
    pub body: BodySection,
    pub lock_timeout_ms: Option<u64>,
    pub max_hierarchy_depth: Option<usize>,
}

impl StoreConfig {
    /// Load configuration from disk and environment. The file path
    /// comes from `NANOSTORE_CONFIG` (default `nanostore.toml`); a
    /// missing file leaves only the environment layer.
    pub fn load() -> AnyResult<Self> {
        let config_path =
            env::var("NANOSTORE_CONFIG").unwrap_or_else(|_| "nanostore.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(path: &Path) -> AnyResult<Self> {
        let mut builder = config::Config::builder();

        if path.exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("NANOSTORE")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("building configuration")?;
        let config: Self = settings
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(config)
    }

    /// Validate and build the runtime dimension set and canonical
    /// view.
    pub fn runtime(&self) -> Result<(DimensionSet, CanonicalView)> {
        let dims = DimensionSet::new(self.dimensions.clone())?;
        for filter in &self.canonical {
            match dims.get(&filter.dimension) {
                None => {
                    return Err(Error::invalid_config(format!(
                        "canonical filter names unknown dimension '{}'",
                        filter.dimension
                    )));
                }
                Some(dimension) => {
                    if !dimension.is_hierarchical()
                        && filter.value != crate::canonical::WILDCARD
                        && !dimension.allows_value(&filter.value)
                    {
                        return Err(Error::invalid_config(format!(
                            "canonical filter value '{}' is not in dimension '{}'",
                            filter.value, filter.dimension
                        )));
                    }
                }
            }
        }
        let view = CanonicalView::new(self.canonical.clone());
        Ok((dims, view))
    }

    pub fn embed_size_limit(&self) -> usize {
        self.body.embed_size_limit
    }

    pub fn lock_timeout_ms(&self) -> u64 {
        self.lock_timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn max_hierarchy_depth(&self) -> usize {
        self.max_hierarchy_depth
            .unwrap_or(DEFAULT_MAX_HIERARCHY_DEPTH)
    }
}

/// Body storage policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BodySection {
    /// Bodies at or under this byte length stay inline.
    pub embed_size_limit: usize,
    /// Directory name next to the store file.
    pub bodies_dir: String,
}

impl Default for BodySection {
    fn default() -> Self {
        Self {
            embed_size_limit: DEFAULT_EMBED_SIZE_LIMIT,
            bodies_dir: "bodies".to_string(),
        }
    }
}
