//! Contingency tables assembled from grouped counts.

use cohort_model::{AssociationResult, CellStats, FeatureBins, Marginal, Value, ratio};
use cohort_query::GroupedCounts;
use cohort_stats::{chi_squared, fisher_exact_2x2, shifted};

/// Frequencies for every (row bin, column bin) pair.
///
/// Each cell sums the grouped rows whose raw values satisfy both bins, so
/// range and set bins are honoured, not just equality.
pub fn tabulate(
    counts: &GroupedCounts,
    row_key: usize,
    row_bins: &FeatureBins,
    column_key: usize,
    column_bins: &FeatureBins,
) -> Vec<Vec<u64>> {
    row_bins
        .bins
        .iter()
        .map(|row_bin| {
            column_bins
                .bins
                .iter()
                .map(|column_bin| {
                    counts.sum_where(|values| {
                        row_bin.matches(key_value(values, row_key))
                            && column_bin.matches(key_value(values, column_key))
                    })
                })
                .collect()
        })
        .collect()
}

fn key_value(values: &[Option<Value>], idx: usize) -> Option<&Value> {
    values.get(idx)?.as_ref()
}

/// Percentages and statistics for a frequency table.
///
/// Marginals and the total are sums of the table's own cells. Every cell is
/// shifted by `f64::EPSILON` before the chi-squared test. Fisher's exact test,
/// the odds ratio and its log interval are only reported for 2x2 tables
/// without a zero cell.
pub fn association_result(
    feature_a: FeatureBins,
    feature_b: FeatureBins,
    frequencies: &[Vec<u64>],
) -> AssociationResult {
    let row_totals: Vec<u64> = frequencies.iter().map(|row| row.iter().sum()).collect();
    let column_count = frequencies.first().map_or(0, Vec::len);
    let column_totals: Vec<u64> = (0..column_count)
        .map(|c| frequencies.iter().map(|row| row[c]).sum())
        .collect();
    let total: u64 = row_totals.iter().sum();

    let feature_matrix = frequencies
        .iter()
        .zip(&row_totals)
        .map(|(row, &row_total)| {
            row.iter()
                .zip(&column_totals)
                .map(|(&frequency, &column_total)| CellStats {
                    frequency,
                    row_percentage: ratio(frequency, row_total),
                    column_percentage: ratio(frequency, column_total),
                    total_percentage: ratio(frequency, total),
                })
                .collect()
        })
        .collect();
    let marginal = |frequency: u64| Marginal {
        frequency,
        percentage: ratio(frequency, total),
    };

    let chi = chi_squared(&shifted(frequencies, f64::EPSILON));
    let fisher = match frequencies {
        [a, b] if a.len() == 2 && b.len() == 2 => fisher_exact_2x2([[a[0], a[1]], [b[0], b[1]]]),
        _ => None,
    };

    AssociationResult {
        feature_a,
        feature_b,
        feature_matrix,
        rows: row_totals.iter().copied().map(marginal).collect(),
        columns: column_totals.iter().copied().map(marginal).collect(),
        total,
        chi_squared_statistic: chi.statistic,
        chi_squared_dof: chi.dof,
        chi_squared_p: chi.p_value,
        chi_squared_p_corrected: None,
        fisher_exact_odds_ratio: fisher.map(|f| f.odds_ratio),
        fisher_exact_p: fisher.map(|f| f.p_value),
        log_odds_ratio: fisher.map(|f| f.log_odds_ratio),
        log_odds_ratio_95_confidence_interval: fisher.map(|f| f.log_odds_ratio_ci),
    }
}
