//! Multiple-testing corrections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Family-wise or false-discovery-rate correction applied across a batch of p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionMethod {
    #[serde(rename = "bonferroni")]
    Bonferroni,
    #[serde(rename = "sidak")]
    Sidak,
    #[serde(rename = "holm-sidak", alias = "holm_sidak")]
    HolmSidak,
    #[serde(rename = "holm")]
    Holm,
    #[serde(rename = "simes-hochberg", alias = "hochberg")]
    SimesHochberg,
    #[serde(rename = "fdr_bh", alias = "fdr-bh")]
    FdrBh,
    #[serde(rename = "fdr_by", alias = "fdr-by")]
    FdrBy,
}

impl CorrectionMethod {
    pub const ALL: [CorrectionMethod; 7] = [
        CorrectionMethod::Bonferroni,
        CorrectionMethod::Sidak,
        CorrectionMethod::HolmSidak,
        CorrectionMethod::Holm,
        CorrectionMethod::SimesHochberg,
        CorrectionMethod::FdrBh,
        CorrectionMethod::FdrBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionMethod::Bonferroni => "bonferroni",
            CorrectionMethod::Sidak => "sidak",
            CorrectionMethod::HolmSidak => "holm-sidak",
            CorrectionMethod::Holm => "holm",
            CorrectionMethod::SimesHochberg => "simes-hochberg",
            CorrectionMethod::FdrBh => "fdr_bh",
            CorrectionMethod::FdrBy => "fdr_by",
        }
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown correction name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCorrection(pub String);

impl fmt::Display for UnknownCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown correction method: {}", self.0)
    }
}

impl std::error::Error for UnknownCorrection {}

impl FromStr for CorrectionMethod {
    type Err = UnknownCorrection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "bonferroni" => Ok(CorrectionMethod::Bonferroni),
            "sidak" => Ok(CorrectionMethod::Sidak),
            "holm-sidak" => Ok(CorrectionMethod::HolmSidak),
            "holm" => Ok(CorrectionMethod::Holm),
            "simes-hochberg" | "hochberg" => Ok(CorrectionMethod::SimesHochberg),
            "fdr-bh" => Ok(CorrectionMethod::FdrBh),
            "fdr-by" => Ok(CorrectionMethod::FdrBy),
            _ => Err(UnknownCorrection(s.to_string())),
        }
    }
}

/// Adjust `p_values` with `method`. Output order matches input order.
///
/// Step-down methods (holm, holm-sidak) enforce monotonicity with a running
/// maximum over ascending p-values; step-up methods (simes-hochberg, fdr_bh,
/// fdr_by) with a running minimum from the largest. Results are clipped to 1.
#[must_use]
pub fn correct(method: CorrectionMethod, p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }
    let mf = m as f64;

    match method {
        CorrectionMethod::Bonferroni => {
            return p_values.iter().map(|p| (p * mf).min(1.0)).collect();
        }
        CorrectionMethod::Sidak => {
            return p_values
                .iter()
                .map(|p| (1.0 - (1.0 - p).powf(mf)).min(1.0))
                .collect();
        }
        _ => {}
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| p_values[i].total_cmp(&p_values[j]));
    let sorted: Vec<f64> = order.iter().map(|&i| p_values[i]).collect();

    let adjusted: Vec<f64> = match method {
        CorrectionMethod::Holm => {
            let raw = sorted.iter().enumerate().map(|(i, p)| p * (m - i) as f64);
            running_max(raw)
        }
        CorrectionMethod::HolmSidak => {
            let raw = sorted
                .iter()
                .enumerate()
                .map(|(i, p)| 1.0 - (1.0 - p).powf((m - i) as f64));
            running_max(raw)
        }
        CorrectionMethod::SimesHochberg => {
            let raw = sorted.iter().enumerate().map(|(i, p)| p * (m - i) as f64);
            running_min_from_end(raw.collect())
        }
        CorrectionMethod::FdrBh => {
            let raw = sorted.iter().enumerate().map(|(i, p)| p * mf / (i + 1) as f64);
            running_min_from_end(raw.collect())
        }
        CorrectionMethod::FdrBy => {
            let harmonic: f64 = (1..=m).map(|k| 1.0 / k as f64).sum();
            let raw = sorted
                .iter()
                .enumerate()
                .map(|(i, p)| p * mf / (i + 1) as f64 * harmonic);
            running_min_from_end(raw.collect())
        }
        CorrectionMethod::Bonferroni | CorrectionMethod::Sidak => sorted,
    };

    let mut out = vec![0.0; m];
    for (rank, &original) in order.iter().enumerate() {
        out[original] = adjusted[rank].min(1.0);
    }
    out
}

fn running_max(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut max = f64::NEG_INFINITY;
    values
        .map(|v| {
            max = max.max(v);
            max
        })
        .collect()
}

fn running_min_from_end(mut values: Vec<f64>) -> Vec<f64> {
    let mut min = f64::INFINITY;
    for v in values.iter_mut().rev() {
        min = min.min(*v);
        *v = min;
    }
    values
}
