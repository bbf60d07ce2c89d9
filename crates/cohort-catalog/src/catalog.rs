#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use cohort_model::{FeatureKind, Value};

use crate::error::CatalogError;
use crate::manifest::{CatalogFile, FeatureEntry, SCHEMA_VERSION, TableEntry};

/// Classification used when a feature does not declare one.
pub const DEFAULT_CLASSIFICATION: &str = "NamedThing";

/// Immutable catalog entry for one feature column.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub kind: FeatureKind,
    /// Ordered levels, or `None` when levels come from live data.
    pub domain: Option<Vec<Value>>,
    pub classification: String,
}

/// Catalog metadata for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableCatalog {
    pub name: String,
    pub primary_key: String,
    pub year_column: Option<String>,
    features: Vec<Feature>,
    by_name: BTreeMap<String, usize>,
}

impl TableCatalog {
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.by_name.get(name).map(|&idx| &self.features[idx])
    }
}

/// Per-table list of known features, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCatalog {
    tables: BTreeMap<String, TableCatalog>,
}

impl FeatureCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
        let file: CatalogFile = toml::from_str(&contents).map_err(|e| CatalogError::Toml {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_file(file)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(contents).map_err(|e| CatalogError::Toml {
            path: "<inline>".into(),
            source: e,
        })?;
        Self::from_file(file)
    }

    pub fn from_file(file: CatalogFile) -> Result<Self, CatalogError> {
        if file.catalog.schema_version != SCHEMA_VERSION {
            return Err(CatalogError::UnsupportedVersion {
                found: file.catalog.schema_version,
            });
        }
        let mut tables = BTreeMap::new();
        for (name, entry) in file.tables {
            let table = build_table(&name, entry)?;
            tables.insert(name, table);
        }
        Ok(Self { tables })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn table(&self, table: &str) -> Option<&TableCatalog> {
        self.tables.get(table)
    }

    /// All features of `table`, empty when the table is unknown.
    pub fn features(&self, table: &str) -> &[Feature] {
        self.tables
            .get(table)
            .map(TableCatalog::features)
            .unwrap_or(&[])
    }

    pub fn feature(&self, table: &str, feature: &str) -> Option<&Feature> {
        self.tables.get(table)?.feature(feature)
    }

    pub fn domain(&self, table: &str, feature: &str) -> Option<&[Value]> {
        self.feature(table, feature)?.domain.as_deref()
    }

    pub fn classification(&self, table: &str, feature: &str) -> Option<&str> {
        self.feature(table, feature)
            .map(|feature| feature.classification.as_str())
    }
}

fn build_table(name: &str, entry: TableEntry) -> Result<TableCatalog, CatalogError> {
    if entry.primary_key.trim().is_empty() {
        return Err(CatalogError::MissingPrimaryKey {
            table: name.to_string(),
        });
    }
    let mut features = Vec::with_capacity(entry.features.len());
    let mut by_name = BTreeMap::new();
    for feature in entry.features {
        let feature = build_feature(name, feature)?;
        if by_name.contains_key(&feature.name) {
            return Err(CatalogError::DuplicateFeature {
                table: name.to_string(),
                feature: feature.name,
            });
        }
        by_name.insert(feature.name.clone(), features.len());
        features.push(feature);
    }
    Ok(TableCatalog {
        name: name.to_string(),
        primary_key: entry.primary_key,
        year_column: entry.year_column,
        features,
        by_name,
    })
}

fn build_feature(table: &str, entry: FeatureEntry) -> Result<Feature, CatalogError> {
    if let Some(domain) = &entry.domain {
        for (idx, level) in domain.iter().enumerate() {
            if !level.fits(entry.kind) {
                return Err(CatalogError::InvalidLevel {
                    table: table.to_string(),
                    feature: entry.name.clone(),
                    level: level.to_string(),
                    kind: entry.kind.to_string(),
                });
            }
            if domain[..idx].contains(level) {
                return Err(CatalogError::DuplicateLevel {
                    table: table.to_string(),
                    feature: entry.name.clone(),
                    level: level.to_string(),
                });
            }
        }
    }
    Ok(Feature {
        name: entry.name,
        kind: entry.kind,
        domain: entry.domain,
        classification: entry
            .classification
            .unwrap_or_else(|| DEFAULT_CLASSIFICATION.to_string()),
    })
}
