use serde::{Deserialize, Serialize};

use crate::predicate::FeatureBins;
use crate::qualifier::Qualifier;

/// One cell of a contingency table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellStats {
    pub frequency: u64,
    #[serde(with = "nan_as_null")]
    pub row_percentage: f64,
    #[serde(with = "nan_as_null")]
    pub column_percentage: f64,
    #[serde(with = "nan_as_null")]
    pub total_percentage: f64,
}

/// A marginal total (row, column or single-feature bin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marginal {
    pub frequency: u64,
    #[serde(with = "nan_as_null")]
    pub percentage: f64,
}

/// Contingency table and association statistics between two features.
///
/// Rows follow `feature_a.bins`, columns follow `feature_b.bins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationResult {
    pub feature_a: FeatureBins,
    pub feature_b: FeatureBins,
    pub feature_matrix: Vec<Vec<CellStats>>,
    pub rows: Vec<Marginal>,
    pub columns: Vec<Marginal>,
    pub total: u64,
    pub chi_squared_statistic: f64,
    pub chi_squared_dof: u64,
    pub chi_squared_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chi_squared_p_corrected: Option<f64>,
    pub fisher_exact_odds_ratio: Option<f64>,
    pub fisher_exact_p: Option<f64>,
    pub log_odds_ratio: Option<f64>,
    pub log_odds_ratio_95_confidence_interval: Option<[f64; 2]>,
}

impl AssociationResult {
    /// The p-value used for threshold filtering: corrected when present.
    pub fn effective_p(&self) -> f64 {
        self.chi_squared_p_corrected.unwrap_or(self.chi_squared_p)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&CellStats> {
        self.feature_matrix.get(row)?.get(column)
    }
}

/// Per-bin counts of a single feature over a cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCounts {
    pub feature: FeatureBins,
    pub counts: Vec<Marginal>,
    pub total: u64,
}

/// The bin a multivariate row selects for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBin {
    pub feature_name: String,
    pub qualifier: Qualifier,
}

/// One combination of bins across an ordered feature chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultivariateRow {
    pub bins: Vec<FeatureBin>,
    pub frequency: u64,
}

/// Frequency divided by a denominator, NaN when the denominator is zero.
pub fn ratio(frequency: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        frequency as f64 / denominator as f64
    }
}

/// JSON has no NaN, so undefined percentages travel as `null`.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
