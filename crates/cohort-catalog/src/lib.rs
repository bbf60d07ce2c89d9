#![deny(unsafe_code)]

//! Feature catalog: the per-table list of known features, their semantic kind,
//! optional fixed domain of levels and classification tag.

pub mod catalog;
pub mod error;
pub mod manifest;

pub use crate::catalog::{DEFAULT_CLASSIFICATION, Feature, FeatureCatalog, TableCatalog};
pub use crate::error::CatalogError;
pub use crate::manifest::CatalogFile;
