//! Cohort materialization.
//!
//! A cohort is created the first time a normalized definition is seen and is
//! never mutated afterwards. Definitions whose matching rows number at or below
//! the suppression threshold are refused without persisting anything, and the
//! exact count is not surfaced.

use cohort_model::{Cohort, CohortId, FeaturePredicate, NormalizedPredicates, normalize};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::engine::{Engine, SUPPRESSION_THRESHOLD};
use crate::error::{EngineError, Result, StoreError};

/// Result of asking for a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CohortOutcome {
    Materialized { cohort_id: CohortId, size: u64 },
    /// Too few matching rows to disclose.
    Suppressed,
}

impl CohortOutcome {
    pub fn cohort_id(&self) -> Option<&CohortId> {
        match self {
            CohortOutcome::Materialized { cohort_id, .. } => Some(cohort_id),
            CohortOutcome::Suppressed => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, CohortOutcome::Suppressed)
    }

    fn from_cohort(cohort: &Cohort) -> Self {
        CohortOutcome::Materialized {
            cohort_id: cohort.cohort_id.clone(),
            size: cohort.size,
        }
    }
}

impl Engine {
    /// Return the cohort for this definition, creating it on first use.
    pub fn get_or_create(
        &self,
        table: &str,
        year: Option<i32>,
        predicates: &[FeaturePredicate],
    ) -> Result<CohortOutcome> {
        let _span = info_span!("get_or_create", table).entered();
        self.check_predicates(table, predicates)?;
        let normalized = normalize(year, predicates)?;

        if let Some(existing) = self.store().find_cohort(table, year, normalized.canonical()) {
            debug!(cohort_id = %existing.cohort_id, "reusing cohort");
            return Ok(CohortOutcome::from_cohort(&existing));
        }

        let Some(size) = self.disclosable_size(table, year, &normalized)? else {
            return Ok(CohortOutcome::Suppressed);
        };

        let attempts = self.options().id_allocation_attempts;
        for attempt in 1..=attempts {
            let cohort_id = self.store().next_cohort_id();
            let cohort = Cohort::new(cohort_id.clone(), table, year, size, &normalized);
            match self.store().insert_cohort(cohort) {
                Ok(()) => {
                    info!(cohort_id = %cohort_id, size, "created cohort");
                    return Ok(CohortOutcome::Materialized { cohort_id, size });
                }
                Err(err) if err.is_retryable() => {
                    debug!(cohort_id = %cohort_id, attempt, "cohort id collision");
                }
                Err(err) => return Err(err.into()),
            }
        }
        warn!(attempts, "cohort id allocation exhausted");
        Err(StoreError::IdAllocationExhausted { attempts }.into())
    }

    /// Store a cohort under a caller-chosen id.
    ///
    /// An id that already holds this exact definition is returned as is; an id
    /// holding a different definition is a conflict. The same definition may
    /// exist under other ids.
    pub fn create_explicit(
        &self,
        table: &str,
        year: Option<i32>,
        predicates: &[FeaturePredicate],
        requested_id: CohortId,
    ) -> Result<CohortOutcome> {
        let _span = info_span!("create_explicit", table, cohort_id = %requested_id).entered();
        self.check_predicates(table, predicates)?;
        let normalized = normalize(year, predicates)?;

        if let Some(existing) = self.store().cohort(&requested_id) {
            return reuse_or_conflict(&existing, table, year, &normalized);
        }

        let Some(size) = self.disclosable_size(table, year, &normalized)? else {
            return Ok(CohortOutcome::Suppressed);
        };

        let cohort = Cohort::new(requested_id.clone(), table, year, size, &normalized);
        match self.store().insert_cohort(cohort) {
            Ok(()) => {
                info!(size, "created cohort with explicit id");
                Ok(CohortOutcome::Materialized {
                    cohort_id: requested_id,
                    size,
                })
            }
            // Lost a race for this id; the winner decides.
            Err(StoreError::IdCollision(_)) => match self.store().cohort(&requested_id) {
                Some(existing) => reuse_or_conflict(&existing, table, year, &normalized),
                None => Err(StoreError::IdCollision(requested_id).into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Predicates and year of a cohort, which must belong to `table`.
    pub fn get_by_id(
        &self,
        cohort_id: &CohortId,
        table: &str,
    ) -> Result<(Vec<FeaturePredicate>, Option<i32>)> {
        let (predicates, year) = self.resolve_cohort(table, cohort_id)?;
        Ok((predicates.into_predicates(), year))
    }

    pub fn get_definition_by_id(&self, cohort_id: &CohortId) -> Result<Cohort> {
        self.store()
            .cohort(cohort_id)
            .ok_or_else(|| EngineError::UnknownCohort(cohort_id.clone()))
    }

    /// Every persisted cohort of `table`, in id order.
    pub fn cohort_dictionary(&self, table: &str) -> Result<Vec<Cohort>> {
        self.table_catalog(table)?;
        Ok(self.store().cohorts(Some(table)))
    }

    /// True when the definition is stored or its size clears the floor.
    pub(crate) fn clears_floor(
        &self,
        table: &str,
        year: Option<i32>,
        normalized: &NormalizedPredicates,
    ) -> Result<bool> {
        if self
            .store()
            .find_cohort(table, year, normalized.canonical())
            .is_some()
        {
            return Ok(true);
        }
        Ok(self.disclosable_size(table, year, normalized)?.is_some())
    }

    /// Distinct matching rows, or `None` when the cohort must be suppressed.
    fn disclosable_size(
        &self,
        table: &str,
        year: Option<i32>,
        normalized: &NormalizedPredicates,
    ) -> Result<Option<u64>> {
        let query = self
            .warehouse()
            .build(table, normalized.predicates(), year, &[])?;
        let size = self.warehouse().count_distinct(&query)?;
        if size <= SUPPRESSION_THRESHOLD {
            info!("cohort suppressed");
            Ok(None)
        } else {
            Ok(Some(size))
        }
    }
}

fn reuse_or_conflict(
    existing: &Cohort,
    table: &str,
    year: Option<i32>,
    normalized: &NormalizedPredicates,
) -> Result<CohortOutcome> {
    if existing.has_definition(table, year, normalized.canonical()) {
        Ok(CohortOutcome::from_cohort(existing))
    } else {
        Err(StoreError::ConflictingDefinition(existing.cohort_id.clone()).into())
    }
}
