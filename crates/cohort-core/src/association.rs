use cohort_model::{
    AssociationResult, CohortId, Digest, FeatureBins, FeaturePredicate, NormalizedPredicates,
    normalize,
};
use cohort_query::ColumnRequest;
use serde::Serialize;
use tracing::{debug, info_span};

use crate::cache::{AssociationEntry, AssociationKey};
use crate::contingency::{association_result, tabulate};
use crate::engine::Engine;
use crate::error::Result;

/// Result of an association over an ad hoc cohort.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssociationOutcome {
    Computed(Box<AssociationResult>),
    /// The cohort is too small to disclose; no table was built.
    Suppressed,
}

impl AssociationOutcome {
    pub fn result(&self) -> Option<&AssociationResult> {
        match self {
            AssociationOutcome::Computed(result) => Some(result),
            AssociationOutcome::Suppressed => None,
        }
    }

    pub fn into_result(self) -> Option<AssociationResult> {
        match self {
            AssociationOutcome::Computed(result) => Some(*result),
            AssociationOutcome::Suppressed => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, AssociationOutcome::Suppressed)
    }
}

impl From<AssociationResult> for AssociationOutcome {
    fn from(result: AssociationResult) -> Self {
        AssociationOutcome::Computed(Box::new(result))
    }
}

/// Normalized bins and cache key of one association request.
struct PendingAssociation<'a> {
    table: &'a str,
    cohort: &'a NormalizedPredicates,
    cohort_year: Option<i32>,
    feature_a: FeatureBins,
    feature_b: FeatureBins,
    digest: Digest,
}

impl Engine {
    /// Contingency table and statistics between two binned features over an
    /// ad hoc cohort.
    ///
    /// Results are cached by the digest of the normalized request. A cohort that
    /// is neither stored nor larger than the suppression floor yields
    /// [`AssociationOutcome::Suppressed`] and nothing is cached.
    pub fn compute_association(
        &self,
        table: &str,
        cohort_predicates: &[FeaturePredicate],
        cohort_year: Option<i32>,
        feature_a: FeatureBins,
        feature_b: FeatureBins,
    ) -> Result<AssociationOutcome> {
        let _span = info_span!(
            "compute_association",
            table,
            feature_a = %feature_a.feature_name,
            feature_b = %feature_b.feature_name
        )
        .entered();
        self.check_predicates(table, cohort_predicates)?;
        self.check_bins(table, &feature_a)?;
        self.check_bins(table, &feature_b)?;
        let normalized = normalize(cohort_year, cohort_predicates)?;
        let pending = pending(table, &normalized, cohort_year, feature_a, feature_b)?;
        if let Some(cached) = self.cached_association(&pending) {
            return Ok(cached.into());
        }
        if !self.clears_floor(table, cohort_year, &normalized)? {
            return Ok(AssociationOutcome::Suppressed);
        }
        self.fresh_association(pending).map(Into::into)
    }

    /// [`Engine::compute_association`] after checking that both bin lists
    /// partition their feature's declared domain.
    pub fn compute_association_checked(
        &self,
        table: &str,
        cohort_predicates: &[FeaturePredicate],
        cohort_year: Option<i32>,
        feature_a: FeatureBins,
        feature_b: FeatureBins,
    ) -> Result<AssociationOutcome> {
        self.validate_full_coverage(table, &feature_a)?;
        self.validate_full_coverage(table, &feature_b)?;
        self.compute_association(table, cohort_predicates, cohort_year, feature_a, feature_b)
    }

    /// Association over a stored cohort.
    pub fn compute_cohort_association(
        &self,
        table: &str,
        cohort_id: &CohortId,
        feature_a: FeatureBins,
        feature_b: FeatureBins,
    ) -> Result<AssociationResult> {
        let (normalized, year) = self.resolve_cohort(table, cohort_id)?;
        self.check_bins(table, &feature_a)?;
        self.check_bins(table, &feature_b)?;
        self.association_for(table, &normalized, year, feature_a, feature_b)
    }

    /// Cached association for a validated request over a stored cohort.
    pub(crate) fn association_for(
        &self,
        table: &str,
        cohort: &NormalizedPredicates,
        cohort_year: Option<i32>,
        feature_a: FeatureBins,
        feature_b: FeatureBins,
    ) -> Result<AssociationResult> {
        let pending = pending(table, cohort, cohort_year, feature_a, feature_b)?;
        match self.cached_association(&pending) {
            Some(cached) => Ok(cached),
            None => self.fresh_association(pending),
        }
    }

    fn cached_association(&self, pending: &PendingAssociation<'_>) -> Option<AssociationResult> {
        let cached = self.store().association(&pending.digest);
        if cached.is_some() {
            debug!(digest = %pending.digest, "association cache hit");
        } else {
            debug!(digest = %pending.digest, "association cache miss");
        }
        cached
    }

    fn fresh_association(&self, pending: PendingAssociation<'_>) -> Result<AssociationResult> {
        let PendingAssociation {
            table,
            cohort,
            cohort_year,
            feature_a,
            feature_b,
            digest,
        } = pending;
        let columns = [
            ColumnRequest::new(feature_a.feature_name.clone(), feature_a.year),
            ColumnRequest::new(feature_b.feature_name.clone(), feature_b.year),
        ];
        let query = self
            .warehouse()
            .build(table, cohort.predicates(), cohort_year, &columns)?;
        let counts = self.warehouse().grouped_counts(&query, &query.aliases)?;
        let key = |request: &ColumnRequest| counts.position(&request.alias()).unwrap_or(usize::MAX);
        let frequencies = tabulate(
            &counts,
            key(&columns[0]),
            &feature_a,
            key(&columns[1]),
            &feature_b,
        );
        let result = association_result(feature_a.clone(), feature_b.clone(), &frequencies);

        self.store().put_association(AssociationEntry {
            digest,
            table: table.to_string(),
            cohort_predicates: cohort.canonical().to_string(),
            cohort_year,
            feature_a,
            feature_b,
            result: result.clone(),
            last_access: self.store().access_now(),
        });
        Ok(result)
    }
}

fn pending<'a>(
    table: &'a str,
    cohort: &'a NormalizedPredicates,
    cohort_year: Option<i32>,
    feature_a: FeatureBins,
    feature_b: FeatureBins,
) -> Result<PendingAssociation<'a>> {
    let feature_a = feature_a.normalized(cohort_year);
    let feature_b = feature_b.normalized(cohort_year);
    let digest = AssociationKey {
        table,
        cohort_predicates: cohort.canonical(),
        cohort_year,
        feature_a: &feature_a,
        feature_b: &feature_b,
    }
    .digest()?;
    Ok(PendingAssociation {
        table,
        cohort,
        cohort_year,
        feature_a,
        feature_b,
        digest,
    })
}
