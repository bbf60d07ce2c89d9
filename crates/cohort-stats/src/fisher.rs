//! Exact test and odds ratio for 2x2 tables.

use crate::special::ln_choose;

/// Two-sided critical value of the standard normal at the 95% level.
pub const Z_95: f64 = 1.959_963_984_540_054;

/// Relative tolerance when comparing hypergeometric probabilities.
const RELATIVE_TOLERANCE: f64 = 1e-7;

/// Outcome of [`fisher_exact_2x2`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisherExact {
    pub odds_ratio: f64,
    pub p_value: f64,
    pub log_odds_ratio: f64,
    pub log_odds_ratio_ci: [f64; 2],
}

/// Fisher's exact test (two-sided) on `[[a, b], [c, d]]`.
///
/// The p-value is the total probability of every table with the same margins
/// that is no more likely than the observed one. Returns `None` when any cell
/// is zero, since the odds ratio and its log interval are then undefined.
///
/// # Examples
///
/// ```
/// use cohort_stats::fisher_exact_2x2;
///
/// let result = fisher_exact_2x2([[6, 2], [1, 4]]).unwrap();
/// assert_eq!(result.odds_ratio, 12.0);
/// assert!((result.p_value - 0.102_564_102_564_102_56).abs() < 1e-9);
/// ```
#[must_use]
pub fn fisher_exact_2x2(table: [[u64; 2]; 2]) -> Option<FisherExact> {
    let [[a, b], [c, d]] = table;
    if a == 0 || b == 0 || c == 0 || d == 0 {
        return None;
    }

    let odds_ratio = (a as f64 * d as f64) / (b as f64 * c as f64);
    let log_odds_ratio = odds_ratio.ln();
    let standard_error =
        (1.0 / a as f64 + 1.0 / b as f64 + 1.0 / c as f64 + 1.0 / d as f64).sqrt();
    let half_width = Z_95 * standard_error;

    Some(FisherExact {
        odds_ratio,
        p_value: two_sided_p(a, b, c, d),
        log_odds_ratio,
        log_odds_ratio_ci: [log_odds_ratio - half_width, log_odds_ratio + half_width],
    })
}

fn two_sided_p(a: u64, b: u64, c: u64, d: u64) -> f64 {
    let n = a + b + c + d;
    let row = a + b;
    let column = a + c;
    let ln_denominator = ln_choose(n, row);
    let ln_pmf = |x: u64| ln_choose(column, x) + ln_choose(n - column, row - x) - ln_denominator;

    let observed = ln_pmf(a);
    let threshold = observed + RELATIVE_TOLERANCE.ln_1p();
    let low = (row + column).saturating_sub(n);
    let high = row.min(column);

    let p: f64 = (low..=high)
        .map(ln_pmf)
        .filter(|&lp| lp <= threshold)
        .map(f64::exp)
        .sum();
    p.min(1.0)
}
