//! Joint frequency tables over ordered feature chains.
//!
//! Constraints are built in stages: the first feature seeds one constraint per
//! bin, each following pair of features multiplies every constraint by the
//! pair's bin combinations, and a trailing odd feature is folded in alone. A
//! single grouped count over all named features then assigns each constraint
//! its frequency.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use cohort_model::{CohortId, FeatureBin, FeatureBins, MultivariateRow};
use cohort_query::ColumnRequest;
use tracing::{debug, info_span};

use crate::engine::Engine;
use crate::error::{EngineError, Result};

/// Accepted chain lengths.
pub const FEATURE_CHAIN: RangeInclusive<usize> = 3..=8;

type Constraint = Vec<FeatureBin>;

impl Engine {
    pub fn compute_multivariate_table(
        &self,
        table: &str,
        cohort_id: &CohortId,
        feature_names: &[String],
    ) -> Result<Vec<MultivariateRow>> {
        let _span = info_span!("compute_multivariate_table", table, cohort_id = %cohort_id).entered();
        if !FEATURE_CHAIN.contains(&feature_names.len()) {
            return Err(EngineError::FeatureCount {
                found: feature_names.len(),
            });
        }
        let mut seen = HashSet::new();
        for name in feature_names {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::RepeatedFeature {
                    feature: name.clone(),
                });
            }
        }

        let (cohort, year) = self.resolve_cohort(table, cohort_id)?;
        let chain = feature_names
            .iter()
            .map(|name| {
                let feature = self.feature(table, name)?;
                self.full_domain_bins(table, feature, year)
            })
            .collect::<Result<Vec<_>>>()?;

        let constraints = build_constraints(&chain);
        debug!(constraints = constraints.len(), "multivariate constraints");

        let columns: Vec<ColumnRequest> = chain
            .iter()
            .map(|bins| ColumnRequest::new(bins.feature_name.clone(), bins.year))
            .collect();
        let query = self
            .warehouse()
            .build(table, cohort.predicates(), year, &columns)?;
        let counts = self.warehouse().grouped_counts(&query, &query.aliases)?;
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|request| counts.position(&request.alias()))
            .collect();

        Ok(constraints
            .into_iter()
            .map(|bins| {
                let frequency = counts.sum_where(|values| {
                    bins.iter().zip(&positions).all(|(bin, position)| {
                        let value = position.and_then(|idx| values.get(idx)?.as_ref());
                        bin.qualifier.matches(value)
                    })
                });
                MultivariateRow { bins, frequency }
            })
            .collect())
    }
}

/// Staged cartesian expansion of the chain's bins.
fn build_constraints(chain: &[FeatureBins]) -> Vec<Constraint> {
    let Some((first, rest)) = chain.split_first() else {
        return Vec::new();
    };
    let mut constraints: Vec<Constraint> = first
        .bins
        .iter()
        .map(|qualifier| vec![bin(first, qualifier)])
        .collect();

    // Chains never repeat a feature, so every pair is visited once.
    let mut pairs = rest.chunks_exact(2);
    for pair in pairs.by_ref() {
        let (a, b) = (&pair[0], &pair[1]);
        let mut next = Vec::with_capacity(constraints.len() * a.bins.len() * b.bins.len());
        for constraint in &constraints {
            for qa in &a.bins {
                for qb in &b.bins {
                    let mut extended = constraint.clone();
                    extended.push(bin(a, qa));
                    extended.push(bin(b, qb));
                    next.push(extended);
                }
            }
        }
        constraints = next;
    }

    if let [last] = pairs.remainder() {
        constraints = constraints
            .iter()
            .flat_map(|constraint| {
                last.bins.iter().map(move |qualifier| {
                    let mut extended = constraint.clone();
                    extended.push(bin(last, qualifier));
                    extended
                })
            })
            .collect();
    }
    constraints
}

fn bin(bins: &FeatureBins, qualifier: &cohort_model::Qualifier) -> FeatureBin {
    FeatureBin {
        feature_name: bins.feature_name.clone(),
        qualifier: qualifier.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_model::Qualifier;

    fn feature(name: &str, levels: usize) -> FeatureBins {
        FeatureBins::new(
            name,
            (0..levels as i64).map(Qualifier::equals).collect(),
        )
    }

    #[test]
    fn expands_pairs_then_folds_trailing_feature() {
        let chain = [feature("a", 2), feature("b", 3), feature("c", 2), feature("d", 2)];
        let constraints = build_constraints(&chain);
        assert_eq!(constraints.len(), 2 * 3 * 2 * 2);
        assert!(constraints.iter().all(|c| c.len() == 4));
        let names: Vec<&str> = constraints[0]
            .iter()
            .map(|bin| bin.feature_name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn odd_chain_uses_pairs_only() {
        let chain = [feature("a", 2), feature("b", 2), feature("c", 3)];
        let constraints = build_constraints(&chain);
        assert_eq!(constraints.len(), 12);
        assert_eq!(constraints[0][2].feature_name, "c");
    }

    #[test]
    fn first_feature_varies_slowest() {
        let chain = [feature("a", 2), feature("b", 1), feature("c", 2)];
        let constraints = build_constraints(&chain);
        assert_eq!(constraints[0][0].qualifier, Qualifier::equals(0));
        assert_eq!(constraints[1][0].qualifier, Qualifier::equals(0));
        assert_eq!(constraints[2][0].qualifier, Qualifier::equals(1));
    }
}
