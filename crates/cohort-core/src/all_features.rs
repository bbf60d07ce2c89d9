//! Association search across catalog features.

use std::collections::{BTreeSet, HashSet};

use cohort_catalog::Feature;
use cohort_model::{AssociationResult, CohortId, FeatureBins, NormalizedPredicates};
use cohort_stats::{CorrectionMethod, correct};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::engine::Engine;
use crate::error::Result;

/// Which features take part on one side of the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSelector {
    /// A single feature with caller-supplied bins.
    Single(FeatureBins),
    /// Every catalog feature whose classification is in the set.
    Classes(BTreeSet<String>),
    /// Every catalog feature.
    Any,
}

impl FeatureSelector {
    pub fn classes<S: Into<String>>(classes: impl IntoIterator<Item = S>) -> Self {
        FeatureSelector::Classes(classes.into_iter().map(Into::into).collect())
    }
}

impl Engine {
    /// Associations between every unordered pair drawn from the two selections.
    ///
    /// Catalog candidates get one `=` bin per level. With `correction`, the
    /// chi-squared p-values of all computed pairs are adjusted together before
    /// any pair above `maximum_p_value` is dropped.
    pub fn compute_all_associations(
        &self,
        table: &str,
        cohort_id: &CohortId,
        feature_a: &FeatureSelector,
        maximum_p_value: f64,
        feature_b: &FeatureSelector,
        correction: Option<CorrectionMethod>,
    ) -> Result<Vec<AssociationResult>> {
        let _span = info_span!("compute_all_associations", table, cohort_id = %cohort_id).entered();
        let (cohort, year) = self.resolve_cohort(table, cohort_id)?;
        let side_a = self.candidates(table, feature_a, year)?;
        let side_b = self.candidates(table, feature_b, year)?;

        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut results = Vec::new();
        for a in &side_a {
            for b in &side_b {
                if a.feature_name == b.feature_name {
                    continue;
                }
                let pair = if a.feature_name < b.feature_name {
                    (a.feature_name.clone(), b.feature_name.clone())
                } else {
                    (b.feature_name.clone(), a.feature_name.clone())
                };
                if !visited.insert(pair) {
                    continue;
                }
                results.push(self.pair_association(table, &cohort, year, a, b)?);
            }
        }

        if let Some(method) = correction {
            let raw: Vec<f64> = results.iter().map(|r| r.chi_squared_p).collect();
            for (result, corrected) in results.iter_mut().zip(correct(method, &raw)) {
                result.chi_squared_p_corrected = Some(corrected);
            }
        }

        let computed = results.len();
        results.retain(|result| result.effective_p() <= maximum_p_value);
        info!(computed, kept = results.len(), "association search finished");
        Ok(results)
    }

    fn pair_association(
        &self,
        table: &str,
        cohort: &NormalizedPredicates,
        year: Option<i32>,
        a: &FeatureBins,
        b: &FeatureBins,
    ) -> Result<AssociationResult> {
        debug!(feature_a = %a.feature_name, feature_b = %b.feature_name, "pair");
        self.association_for(table, cohort, year, a.clone(), b.clone())
    }

    fn candidates(
        &self,
        table: &str,
        selector: &FeatureSelector,
        year: Option<i32>,
    ) -> Result<Vec<FeatureBins>> {
        let features: Vec<&Feature> = match selector {
            FeatureSelector::Single(bins) => {
                self.check_bins(table, bins)?;
                return Ok(vec![bins.clone()]);
            }
            FeatureSelector::Classes(classes) => self
                .available_features(table)?
                .into_iter()
                .filter(|feature| classes.contains(&feature.classification))
                .collect(),
            FeatureSelector::Any => self.available_features(table)?,
        };
        let mut candidates = Vec::with_capacity(features.len());
        for feature in features {
            let bins = self.full_domain_bins(table, feature, year)?;
            if bins.bins.is_empty() {
                debug!(feature = %feature.name, "skipping feature without levels");
                continue;
            }
            candidates.push(bins);
        }
        Ok(candidates)
    }
}
