//! Checks that a bin list partitions a feature's declared domain.

use std::cmp::Ordering;
use std::ops::Range;

use cohort_model::{FeatureBins, Qualifier, Value};

use crate::engine::Engine;
use crate::error::{CoverageError, Result};

impl Engine {
    /// Verify that `feature_bins` covers every declared level exactly once.
    pub fn validate_full_coverage(&self, table: &str, feature_bins: &FeatureBins) -> Result<()> {
        let feature = self.check_bins(table, feature_bins)?;
        let domain = feature
            .domain
            .as_deref()
            .ok_or_else(|| CoverageError::NoDomain {
                feature: feature.name.clone(),
            })?;
        check_coverage(&feature.name, domain, &feature_bins.bins)?;
        Ok(())
    }
}

/// Pure coverage check over an ordered level list.
pub fn check_coverage(
    feature: &str,
    levels: &[Value],
    bins: &[Qualifier],
) -> std::result::Result<(), CoverageError> {
    let mut claimed = vec![false; levels.len()];
    for bin in bins {
        for idx in selected_levels(feature, levels, bin)? {
            if claimed[idx] {
                return Err(CoverageError::Overlap {
                    feature: feature.to_string(),
                    level: levels[idx].to_string(),
                });
            }
            claimed[idx] = true;
        }
    }
    match claimed.iter().position(|covered| !covered) {
        Some(idx) => Err(CoverageError::Incomplete {
            feature: feature.to_string(),
            level: levels[idx].to_string(),
        }),
        None => Ok(()),
    }
}

/// Indices of the levels a qualifier selects, in level order.
fn selected_levels(
    feature: &str,
    levels: &[Value],
    qualifier: &Qualifier,
) -> std::result::Result<Vec<usize>, CoverageError> {
    let position = |operand: &Value| {
        levels
            .iter()
            .position(|level| level.compare(operand) == Some(Ordering::Equal))
            .ok_or_else(|| CoverageError::UnknownLevel {
                feature: feature.to_string(),
                operand: operand.to_string(),
            })
    };
    let n = levels.len();
    let range = |r: Range<usize>| r.collect::<Vec<_>>();

    Ok(match qualifier {
        Qualifier::Lt { value } => range(0..position(value)?),
        Qualifier::Le { value } => range(0..position(value)? + 1),
        Qualifier::Gt { value } => range(position(value)? + 1..n),
        Qualifier::Ge { value } => range(position(value)?..n),
        Qualifier::Eq { value } => vec![position(value)?],
        Qualifier::Ne { value } => {
            let skip = position(value)?;
            (0..n).filter(|&idx| idx != skip).collect()
        }
        Qualifier::Between { value_a, value_b } => {
            let (a, b) = (position(value_a)?, position(value_b)?);
            if a <= b { range(a..b + 1) } else { Vec::new() }
        }
        Qualifier::In { values } => {
            let mut indices = values
                .iter()
                .map(position)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            indices.sort_unstable();
            indices.dedup();
            indices
        }
    })
}
