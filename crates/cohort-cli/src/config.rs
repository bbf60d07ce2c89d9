//! `cohort.toml` loading.
//!
//! ```toml
//! catalog = "catalog.toml"
//! data_dir = "data"
//! store = "cohort-store.json"
//!
//! [query]
//! max_columns_per_query = 16
//!
//! [cache]
//! capacity = 10000
//! max_age_secs = 604800
//! ```
//!
//! Relative paths resolve against the directory holding the config file. The
//! suppression floor is fixed and has no key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cohort_core::{EngineOptions, EvictionPolicy};
use serde::Deserialize;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "COHORT_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "cohort.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub catalog: PathBuf,
    pub data_dir: PathBuf,
    /// Snapshot holding cohorts, caches and the id counter between runs.
    pub store: Option<PathBuf>,
    pub query: QueryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub id_allocation_attempts: usize,
    pub max_columns_per_query: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub capacity: Option<usize>,
    pub max_age_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("catalog.toml"),
            data_dir: PathBuf::from("data"),
            store: Some(PathBuf::from("cohort-store.json")),
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            id_allocation_attempts: options.id_allocation_attempts,
            max_columns_per_query: options.max_columns_per_query,
        }
    }
}

impl CacheConfig {
    pub fn eviction_policy(&self) -> EvictionPolicy {
        let mut policy = EvictionPolicy::unbounded();
        if let Some(capacity) = self.capacity {
            policy = policy.with_capacity(capacity);
        }
        if let Some(secs) = self.max_age_secs {
            policy = policy.with_max_age(Duration::from_secs(secs));
        }
        policy
    }
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("parse cohort config")
    }

    /// Read `path` and resolve its relative paths against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("load config {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.relative_to(base))
    }

    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        self.catalog = rebase(base, &self.catalog);
        self.data_dir = rebase(base, &self.data_dir);
        self.store = self.store.map(|store| rebase(base, &store));
        self
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default()
            .with_id_allocation_attempts(self.query.id_allocation_attempts)
            .with_max_columns_per_query(self.query.max_columns_per_query)
            .with_eviction(self.cache.eviction_policy())
    }
}

/// `--config`, then `COHORT_CONFIG`, then `./cohort.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
