use crate::special::chi_squared_sf;

/// Pearson chi-squared test of independence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquared {
    pub statistic: f64,
    pub dof: u64,
    pub p_value: f64,
}

/// Chi-squared test over an `r x c` table of (possibly fractional) counts.
///
/// No continuity correction is applied. Cells with a zero expected count add
/// nothing to the statistic, so callers that want every cell to contribute
/// should shift the table first (see [`shifted`]).
#[must_use]
pub fn chi_squared(observed: &[Vec<f64>]) -> ChiSquared {
    let rows = observed.len();
    let columns = observed.first().map_or(0, Vec::len);
    let dof = (rows.saturating_sub(1) * columns.saturating_sub(1)) as u64;

    let row_sums: Vec<f64> = observed.iter().map(|row| row.iter().sum()).collect();
    let mut column_sums = vec![0.0; columns];
    for row in observed {
        for (sum, cell) in column_sums.iter_mut().zip(row) {
            *sum += cell;
        }
    }
    let total: f64 = row_sums.iter().sum();

    if dof == 0 || total <= 0.0 {
        return ChiSquared {
            statistic: 0.0,
            dof,
            p_value: 1.0,
        };
    }

    let mut statistic = 0.0;
    for (row, row_sum) in observed.iter().zip(&row_sums) {
        for (cell, column_sum) in row.iter().zip(&column_sums) {
            let expected = row_sum * column_sum / total;
            if expected > 0.0 {
                statistic += (cell - expected).powi(2) / expected;
            }
        }
    }

    ChiSquared {
        statistic,
        dof,
        p_value: chi_squared_sf(statistic, dof),
    }
}

/// Converts integer frequencies to floats, adding `shift` to every cell.
#[must_use]
pub fn shifted(frequencies: &[Vec<u64>], shift: f64) -> Vec<Vec<f64>> {
    frequencies
        .iter()
        .map(|row| row.iter().map(|&cell| cell as f64 + shift).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_by_two_statistic() {
        let result = chi_squared(&[vec![10.0, 20.0], vec![30.0, 40.0]]);
        assert!((result.statistic - 0.793_650_793_650_793_6).abs() < 1e-12);
        assert_eq!(result.dof, 1);
        assert!((result.p_value - 0.372_998_483_613_487_1).abs() < 1e-9);
    }

    #[test]
    fn independent_table_has_zero_statistic() {
        let result = chi_squared(&[vec![5.0, 10.0], vec![10.0, 20.0]]);
        assert!(result.statistic.abs() < 1e-12);
        assert!((result.p_value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_table_has_no_freedom() {
        let result = chi_squared(&[vec![12.0]]);
        assert_eq!(result.dof, 0);
        assert_eq!(result.statistic, 0.0);
        assert_eq!(result.p_value, 1.0);
    }

    #[test]
    fn shift_keeps_empty_rows_defined() {
        let table = shifted(&[vec![12, 0], vec![0, 0]], f64::EPSILON);
        let result = chi_squared(&table);
        assert!(result.statistic.is_finite());
        assert!((0.0..=1.0).contains(&result.p_value));
    }

    #[test]
    fn three_by_two_dof() {
        let result = chi_squared(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        assert_eq!(result.dof, 2);
    }
}
