use anyhow::{Context, Result};
use cohort_catalog::Feature;
use cohort_core::{AssociationOutcome, CohortOutcome};
use cohort_model::{
    AssociationResult, CellStats, Cohort, FeatureBins, FeatureCounts, Marginal, MultivariateRow,
};
use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize result")?;
    println!("{json}");
    Ok(())
}

pub fn print_features(table_name: &str, features: &[&Feature]) {
    println!("Table: {table_name}");
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Feature"),
        header_cell("Kind"),
        header_cell("Classification"),
        header_cell("Levels"),
    ]);
    apply_table_style(&mut table);
    for feature in features {
        let levels = match &feature.domain {
            Some(levels) => Cell::new(
                levels
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            None => dim_cell("from data"),
        };
        table.add_row(vec![
            name_cell(&feature.name),
            Cell::new(feature.kind),
            Cell::new(&feature.classification),
            levels,
        ]);
    }
    println!("{table}");
}

pub fn print_outcome(outcome: &CohortOutcome) {
    match outcome {
        CohortOutcome::Materialized { cohort_id, size } => {
            println!("Cohort: {cohort_id}");
            println!("Size: {size}");
        }
        CohortOutcome::Suppressed => {
            eprintln!("Cohort suppressed: too few matching rows to disclose.");
        }
    }
}

pub fn print_cohort(cohort: &Cohort) -> Result<()> {
    println!("Cohort: {}", cohort.cohort_id);
    println!("Table: {}", cohort.table);
    if let Some(year) = cohort.year {
        println!("Year: {year}");
    }
    println!("Size: {}", cohort.size);
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Feature"),
        header_cell("Condition"),
        header_cell("Year"),
    ]);
    apply_table_style(&mut table);
    for predicate in cohort.predicate_list().context("decode cohort predicates")? {
        table.add_row(vec![
            name_cell(&predicate.feature_name),
            Cell::new(&predicate.qualifier),
            year_cell(predicate.year),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn print_cohorts(cohorts: &[Cohort]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Cohort"),
        header_cell("Year"),
        header_cell("Size"),
        header_cell("Predicates"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    for cohort in cohorts {
        let predicates = match cohort.predicate_list() {
            Ok(predicates) => Cell::new(
                predicates
                    .iter()
                    .map(|predicate| format!("{} {}", predicate.feature_name, predicate.qualifier))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Err(_) => dim_cell("unreadable"),
        };
        table.add_row(vec![
            name_cell(cohort.cohort_id.as_str()),
            year_cell(cohort.year),
            Cell::new(cohort.size),
            predicates,
        ]);
    }
    println!("{table}");
}

pub fn print_association_outcome(outcome: &AssociationOutcome) {
    match outcome.result() {
        Some(result) => print_association(result),
        None => eprintln!("Association suppressed: too few matching rows to disclose."),
    }
}

fn print_association(result: &AssociationResult) {
    println!(
        "{} x {} (n = {})",
        result.feature_a.feature_name, result.feature_b.feature_name, result.total
    );
    let mut table = Table::new();
    let mut header = vec![header_cell(&result.feature_a.feature_name)];
    header.extend(result.feature_b.bins.iter().map(|bin| header_cell(&bin.to_string())));
    header.push(header_cell("Total"));
    table.set_header(header);
    apply_summary_table_style(&mut table);
    for (bin, (cells, marginal)) in result
        .feature_a
        .bins
        .iter()
        .zip(result.feature_matrix.iter().zip(&result.rows))
    {
        let mut row = vec![Cell::new(bin).add_attribute(Attribute::Bold)];
        row.extend(cells.iter().map(matrix_cell));
        row.push(marginal_cell(marginal));
        table.add_row(row);
    }
    let mut totals = vec![
        Cell::new("Total")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
    ];
    totals.extend(result.columns.iter().map(marginal_cell));
    totals.push(Cell::new(result.total).add_attribute(Attribute::Bold));
    table.add_row(totals);
    for column in 1..table.column_count() {
        align_column(&mut table, column, CellAlignment::Right);
    }
    println!("{table}");

    println!(
        "Chi-squared: {:.4} (dof {}), p = {}",
        result.chi_squared_statistic,
        result.chi_squared_dof,
        format_p(result.chi_squared_p)
    );
    if let Some(corrected) = result.chi_squared_p_corrected {
        println!("Corrected p = {}", format_p(corrected));
    }
    if let (Some(odds_ratio), Some(p)) = (result.fisher_exact_odds_ratio, result.fisher_exact_p) {
        println!("Fisher exact: odds ratio {odds_ratio:.4}, p = {}", format_p(p));
    }
    if let (Some(log_odds), Some([low, high])) = (
        result.log_odds_ratio,
        result.log_odds_ratio_95_confidence_interval,
    ) {
        println!("Log odds ratio: {log_odds:.4} (95% CI {low:.4} to {high:.4})");
    }
}

pub fn print_associations(results: &[AssociationResult]) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Feature A"),
        header_cell("Feature B"),
        header_cell("N"),
        header_cell("Chi-squared"),
        header_cell("DoF"),
        header_cell("p"),
        header_cell("Corrected p"),
        header_cell("Fisher p"),
    ]);
    apply_summary_table_style(&mut table);
    for column in 2..8 {
        align_column(&mut table, column, CellAlignment::Right);
    }
    for result in results {
        table.add_row(vec![
            name_cell(&result.feature_a.feature_name),
            name_cell(&result.feature_b.feature_name),
            Cell::new(result.total),
            Cell::new(format!("{:.4}", result.chi_squared_statistic)),
            Cell::new(result.chi_squared_dof),
            p_cell(Some(result.chi_squared_p)),
            p_cell(result.chi_squared_p_corrected),
            p_cell(result.fisher_exact_p),
        ]);
    }
    println!("{table}");
    println!("{} pair(s)", results.len());
}

pub fn print_counts(counts: &[FeatureCounts]) {
    for feature in counts {
        print_feature_counts(feature);
    }
}

fn print_feature_counts(counts: &FeatureCounts) {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell(&counts.feature.feature_name),
        header_cell("Frequency"),
        header_cell("Percent"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    align_column(&mut table, 2, CellAlignment::Right);
    for (bin, marginal) in counts.feature.bins.iter().zip(&counts.counts) {
        table.add_row(vec![
            Cell::new(bin),
            Cell::new(marginal.frequency),
            percent_cell(marginal.percentage),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(counts.total).add_attribute(Attribute::Bold),
        dim_cell("-"),
    ]);
    println!("{table}");
}

pub fn print_multivariate(rows: &[MultivariateRow]) {
    let Some(first) = rows.first() else {
        println!("No rows.");
        return;
    };
    let mut table = Table::new();
    let mut header: Vec<Cell> = first
        .bins
        .iter()
        .map(|bin| header_cell(&bin.feature_name))
        .collect();
    header.push(header_cell("Frequency"));
    table.set_header(header);
    apply_summary_table_style(&mut table);
    align_column(&mut table, first.bins.len(), CellAlignment::Right);
    for row in rows {
        let mut cells: Vec<Cell> = row.bins.iter().map(|bin| Cell::new(&bin.qualifier)).collect();
        cells.push(count_cell(row.frequency));
        table.add_row(cells);
    }
    println!("{table}");
}

pub fn print_coverage_ok(bins: &FeatureBins) {
    println!(
        "{}: {} bin(s) cover every declared level exactly once.",
        bins.feature_name,
        bins.bins.len()
    );
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(165);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn name_cell(name: &str) -> Cell {
    Cell::new(name)
        .fg(Color::Blue)
        .add_attribute(Attribute::Bold)
}

fn year_cell(year: Option<i32>) -> Cell {
    match year {
        Some(year) => Cell::new(year),
        None => dim_cell("-"),
    }
}

fn matrix_cell(cell: &CellStats) -> Cell {
    if cell.frequency == 0 {
        return dim_cell(0);
    }
    Cell::new(format!(
        "{} ({})",
        cell.frequency,
        format_percent(cell.total_percentage)
    ))
}

fn marginal_cell(marginal: &Marginal) -> Cell {
    Cell::new(format!(
        "{} ({})",
        marginal.frequency,
        format_percent(marginal.percentage)
    ))
    .add_attribute(Attribute::Bold)
}

fn count_cell(count: u64) -> Cell {
    if count == 0 {
        dim_cell(count)
    } else {
        Cell::new(count)
    }
}

fn percent_cell(ratio: f64) -> Cell {
    if ratio.is_nan() {
        dim_cell("-")
    } else {
        Cell::new(format_percent(ratio))
    }
}

fn p_cell(p: Option<f64>) -> Cell {
    match p {
        Some(p) if p < 0.05 => Cell::new(format_p(p))
            .fg(Color::Green)
            .add_attribute(Attribute::Bold),
        Some(p) => Cell::new(format_p(p)),
        None => dim_cell("-"),
    }
}

fn format_percent(ratio: f64) -> String {
    if ratio.is_nan() {
        "-".to_string()
    } else {
        format!("{:.1}%", ratio * 100.0)
    }
}

fn format_p(p: f64) -> String {
    if p < 1e-4 { format!("{p:.2e}") } else { format!("{p:.4}") }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
