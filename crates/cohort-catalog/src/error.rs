#![deny(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML catalog {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported catalog schema_version: {found}")]
    UnsupportedVersion { found: u32 },

    #[error("table {table} declares no primary key")]
    MissingPrimaryKey { table: String },

    #[error("duplicate feature {feature} in table {table}")]
    DuplicateFeature { table: String, feature: String },

    #[error("level {level} of {table}.{feature} does not fit kind {kind}")]
    InvalidLevel {
        table: String,
        feature: String,
        level: String,
        kind: String,
    },

    #[error("duplicate level {level} in {table}.{feature}")]
    DuplicateLevel {
        table: String,
        feature: String,
        level: String,
    },
}

impl CatalogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
