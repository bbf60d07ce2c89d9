#![deny(unsafe_code)]

//! On-disk shape of the catalog file.
//!
//! ```toml
//! [catalog]
//! schema_version = 1
//!
//! [tables.patient]
//! primary_key = "PatientId"
//! year_column = "year"
//!
//! [[tables.patient.features]]
//! name = "AgeStudyStart"
//! kind = "string"
//! domain = ["0-2", "3-17", "18-34", "35-50", "51-69", "70-89"]
//! classification = "PhenotypicFeature"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cohort_model::{FeatureKind, Value};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub catalog: CatalogHeader,
    #[serde(default)]
    pub tables: BTreeMap<String, TableEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogHeader {
    pub schema_version: u32,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for CatalogHeader {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub primary_key: String,
    #[serde(default)]
    pub year_column: Option<String>,
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub name: String,
    pub kind: FeatureKind,
    #[serde(default)]
    pub domain: Option<Vec<Value>>,
    #[serde(default)]
    pub classification: Option<String>,
}
