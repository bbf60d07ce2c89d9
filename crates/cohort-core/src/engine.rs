use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use cohort_catalog::{Feature, FeatureCatalog, TableCatalog};
use cohort_model::{
    CohortId, FeatureBins, FeatureKind, FeaturePredicate, NormalizedPredicates, Qualifier,
};
use cohort_query::Warehouse;
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{EvictionPolicy, EvictionReport};
use crate::error::{EngineError, Result};
use crate::store::CohortStore;

/// Cohorts of this many individuals or fewer are never materialized or disclosed.
pub const SUPPRESSION_THRESHOLD: u64 = 10;

/// Tunables of an [`Engine`].
///
/// The suppression floor is not among them; see [`SUPPRESSION_THRESHOLD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Id allocation attempts before giving up on repeated collisions.
    pub id_allocation_attempts: usize,
    /// Widest grouped query issued when summarizing many features.
    pub max_columns_per_query: usize,
    /// Applied by [`Engine::evict_cache`].
    pub eviction: EvictionPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            id_allocation_attempts: 5,
            max_columns_per_query: 16,
            eviction: EvictionPolicy::default(),
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn with_id_allocation_attempts(mut self, attempts: usize) -> Self {
        self.id_allocation_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_max_columns_per_query(mut self, columns: usize) -> Self {
        self.max_columns_per_query = columns.max(1);
        self
    }

    #[must_use]
    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }
}

/// Shared handle to the catalog, reference tables and store.
///
/// All operations take `&self`; wrap the engine in an `Arc` to share it.
pub struct Engine {
    catalog: Arc<FeatureCatalog>,
    warehouse: Arc<Warehouse>,
    store: Arc<dyn CohortStore>,
    options: EngineOptions,
    unavailable: BTreeSet<(String, String)>,
}

impl Engine {
    /// Build an engine, checking every catalog feature against the loaded tables.
    ///
    /// Features without a backing column are reported once here and rejected
    /// at request time.
    pub fn new(
        catalog: Arc<FeatureCatalog>,
        warehouse: Arc<Warehouse>,
        store: Arc<dyn CohortStore>,
        options: EngineOptions,
    ) -> Self {
        let unavailable = reflect(&catalog, &warehouse);
        info!(
            tables = catalog.table_names().count(),
            unavailable = unavailable.len(),
            "engine ready"
        );
        Self {
            catalog,
            warehouse,
            store,
            options,
            unavailable,
        }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn store(&self) -> &dyn CohortStore {
        self.store.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Apply the configured eviction policy to both caches now.
    pub fn evict_cache(&self) -> EvictionReport {
        let report = self.store.evict(&self.options.eviction, Utc::now());
        info!(
            expired = report.expired,
            over_capacity = report.over_capacity,
            "cache eviction"
        );
        report
    }

    pub(crate) fn table_catalog(&self, table: &str) -> Result<&TableCatalog> {
        self.catalog
            .table(table)
            .ok_or_else(|| EngineError::UnknownTable(table.to_string()))
    }

    pub(crate) fn feature(&self, table: &str, name: &str) -> Result<&Feature> {
        let feature = self
            .table_catalog(table)?
            .feature(name)
            .ok_or_else(|| EngineError::UnknownFeature {
                table: table.to_string(),
                feature: name.to_string(),
            })?;
        if self
            .unavailable
            .contains(&(table.to_string(), name.to_string()))
        {
            return Err(EngineError::UnavailableFeature {
                table: table.to_string(),
                feature: name.to_string(),
            });
        }
        Ok(feature)
    }

    /// Catalog features of `table` that have a column in the loaded data.
    pub fn available_features(&self, table: &str) -> Result<Vec<&Feature>> {
        Ok(self
            .table_catalog(table)?
            .features()
            .iter()
            .filter(|feature| {
                !self
                    .unavailable
                    .contains(&(table.to_string(), feature.name.clone()))
            })
            .collect())
    }

    fn check_qualifier(feature: &Feature, qualifier: &Qualifier) -> Result<()> {
        match qualifier.mismatched_operand(feature.kind) {
            Some(operand) => Err(EngineError::OperandKind {
                feature: feature.name.clone(),
                kind: feature.kind.to_string(),
                operand: operand.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn check_predicates(
        &self,
        table: &str,
        predicates: &[FeaturePredicate],
    ) -> Result<()> {
        self.table_catalog(table)?;
        for predicate in predicates {
            let feature = self.feature(table, &predicate.feature_name)?;
            Self::check_qualifier(feature, &predicate.qualifier)?;
        }
        Ok(())
    }

    pub(crate) fn check_bins(&self, table: &str, bins: &FeatureBins) -> Result<&Feature> {
        let feature = self.feature(table, &bins.feature_name)?;
        if bins.bins.is_empty() {
            return Err(EngineError::EmptyBins {
                feature: bins.feature_name.clone(),
            });
        }
        for qualifier in &bins.bins {
            Self::check_qualifier(feature, qualifier)?;
        }
        Ok(feature)
    }

    /// Definition and year of a stored cohort, checked against `table`.
    pub(crate) fn resolve_cohort(
        &self,
        table: &str,
        cohort_id: &CohortId,
    ) -> Result<(NormalizedPredicates, Option<i32>)> {
        let cohort = self
            .store
            .cohort(cohort_id)
            .ok_or_else(|| EngineError::UnknownCohort(cohort_id.clone()))?;
        if cohort.table != table {
            return Err(EngineError::CohortTableMismatch {
                cohort_id: cohort_id.clone(),
                expected: table.to_string(),
                found: cohort.table,
            });
        }
        Ok((cohort.normalized_predicates()?, cohort.year))
    }

    /// One `=` bin per declared level, or per distinct live value when the
    /// feature has no declared domain.
    pub(crate) fn full_domain_bins(
        &self,
        table: &str,
        feature: &Feature,
        year: Option<i32>,
    ) -> Result<FeatureBins> {
        let levels = match &feature.domain {
            Some(levels) => levels.clone(),
            None => self.warehouse.distinct_values(table, &feature.name, year)?,
        };
        let bins = levels.into_iter().map(Qualifier::equals).collect();
        let mut bins = FeatureBins::new(feature.name.clone(), bins);
        bins.year = year;
        Ok(bins)
    }
}

/// Catalog features whose table or column is missing from the warehouse.
fn reflect(catalog: &FeatureCatalog, warehouse: &Warehouse) -> BTreeSet<(String, String)> {
    let mut unavailable = BTreeSet::new();
    for table in catalog.table_names() {
        let features = catalog.features(table);
        let Some(schema) = warehouse.schema(table) else {
            warn!(table, features = features.len(), "catalog table is not loaded");
            unavailable.extend(
                features
                    .iter()
                    .map(|feature| (table.to_string(), feature.name.clone())),
            );
            continue;
        };
        for feature in features {
            match schema.get(&feature.name) {
                None => {
                    warn!(table, feature = %feature.name, "catalog feature has no column");
                    unavailable.insert((table.to_string(), feature.name.clone()));
                }
                Some(dtype) if !kind_matches(feature.kind, dtype) => {
                    warn!(
                        table,
                        feature = %feature.name,
                        kind = %feature.kind,
                        dtype = %dtype,
                        "column type differs from catalog kind"
                    );
                }
                Some(_) => {}
            }
        }
    }
    unavailable
}

fn kind_matches(kind: FeatureKind, dtype: &DataType) -> bool {
    match kind {
        FeatureKind::Integer => dtype.is_integer(),
        FeatureKind::Real => dtype.is_integer() || dtype.is_float(),
        FeatureKind::String => matches!(dtype, DataType::String),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_polars_types() {
        assert!(kind_matches(FeatureKind::Integer, &DataType::Int64));
        assert!(kind_matches(FeatureKind::Real, &DataType::Int32));
        assert!(kind_matches(FeatureKind::Real, &DataType::Float64));
        assert!(!kind_matches(FeatureKind::Integer, &DataType::String));
        assert!(kind_matches(FeatureKind::String, &DataType::String));
    }

    #[test]
    fn options_cannot_carry_a_suppression_floor() {
        let parsed: std::result::Result<EngineOptions, _> =
            serde_json::from_str(r#"{"suppression_threshold": 0}"#);
        assert!(parsed.is_err());
        assert_eq!(SUPPRESSION_THRESHOLD, 10);
    }

    #[test]
    fn option_builders_clamp_to_one() {
        let options = EngineOptions::default()
            .with_id_allocation_attempts(0)
            .with_max_columns_per_query(0);
        assert_eq!(options.id_allocation_attempts, 1);
        assert_eq!(options.max_columns_per_query, 1);
    }
}
