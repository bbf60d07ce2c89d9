use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use cohort_catalog::{FeatureCatalog, TableCatalog};
use cohort_model::Value;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::builder::BuiltQuery;
use crate::convert::{any_to_count, any_to_value};
use crate::error::{QueryError, Result};

/// Column name of the frequency produced by grouped counts.
pub const FREQUENCY_COLUMN: &str = "__frequency";

/// One reference table held in memory.
#[derive(Debug, Clone)]
pub struct TableFrame {
    pub data: DataFrame,
    pub primary_key: String,
    pub year_column: Option<String>,
}

impl TableFrame {
    pub fn new(data: DataFrame, primary_key: impl Into<String>) -> Self {
        Self {
            data,
            primary_key: primary_key.into(),
            year_column: None,
        }
    }

    #[must_use]
    pub fn with_year_column(mut self, year_column: impl Into<String>) -> Self {
        self.year_column = Some(year_column.into());
        self
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.data.column(column).is_ok()
    }
}

/// Live column types of a table.
pub type TableSchema = BTreeMap<String, DataType>;

/// Count of rows for one combination of grouped values.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub values: Vec<Option<Value>>,
    pub frequency: u64,
}

/// Result of a `GROUP BY` over a cohort relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedCounts {
    pub keys: Vec<String>,
    pub rows: Vec<GroupRow>,
}

impl GroupedCounts {
    pub fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Total frequency of the rows accepted by `matches`.
    pub fn sum_where(&self, mut matches: impl FnMut(&[Option<Value>]) -> bool) -> u64 {
        self.rows
            .iter()
            .filter(|row| matches(&row.values))
            .map(|row| row.frequency)
            .sum()
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|row| row.frequency).sum()
    }
}

/// Immutable set of reference tables.
///
/// Every query builds its own lazy plan over a clone of the stored frames, so a
/// shared warehouse needs no locking. The executed-query counter exists so
/// callers can observe cache effectiveness.
#[derive(Debug, Default)]
pub struct Warehouse {
    tables: BTreeMap<String, TableFrame>,
    executed: AtomicU64,
}

impl Warehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: TableFrame) {
        self.tables.insert(name.into(), table);
    }

    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, table: TableFrame) -> Self {
        self.insert(name, table);
        self
    }

    /// Load `<dir>/<table>.csv` for every table in the catalog.
    ///
    /// Tables without a CSV file are skipped with a warning.
    pub fn from_csv_dir(dir: &Path, catalog: &FeatureCatalog) -> Result<Self> {
        let mut warehouse = Self::new();
        for name in catalog.table_names() {
            let Some(table) = catalog.table(name) else {
                continue;
            };
            let path = dir.join(format!("{name}.csv"));
            if !path.is_file() {
                warn!(table = name, path = %path.display(), "no data file for catalog table");
                continue;
            }
            let frame = read_table(&path, table)?;
            info!(table = name, rows = frame.data.height(), "loaded table");
            warehouse.insert(name, frame);
        }
        Ok(warehouse)
    }

    pub fn table(&self, name: &str) -> Result<&TableFrame> {
        self.tables
            .get(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Column names and types of a loaded table.
    pub fn schema(&self, name: &str) -> Option<TableSchema> {
        let table = self.tables.get(name)?;
        Some(
            table
                .data
                .get_columns()
                .iter()
                .map(|column| (column.name().to_string(), column.dtype().clone()))
                .collect(),
        )
    }

    /// Number of queries collected so far.
    pub fn executed_queries(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    fn collect(&self, plan: LazyFrame) -> Result<DataFrame> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        Ok(plan.collect()?)
    }

    /// Number of distinct primary keys in the relation.
    pub fn count_distinct(&self, query: &BuiltQuery) -> Result<u64> {
        let plan = query
            .relation
            .clone()
            .select([col(query.primary_key.as_str())])
            .unique(None, UniqueKeepStrategy::Any);
        let df = self.collect(plan)?;
        Ok(df.height() as u64)
    }

    /// `GROUP BY keys` over the relation, counting rows per group.
    pub fn grouped_counts(&self, query: &BuiltQuery, keys: &[String]) -> Result<GroupedCounts> {
        let mut unique_keys: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique_keys.contains(key) {
                unique_keys.push(key.clone());
            }
        }
        let by: Vec<Expr> = unique_keys.iter().map(|key| col(key.as_str())).collect();
        debug!(keys = unique_keys.len(), "grouped count");
        let plan = query
            .relation
            .clone()
            .group_by(by)
            .agg([len().alias(FREQUENCY_COLUMN)]);
        let df = self.collect(plan)?;

        let mut rows = Vec::with_capacity(df.height());
        let key_columns = unique_keys
            .iter()
            .map(|key| df.column(key.as_str()))
            .collect::<PolarsResult<Vec<_>>>()?;
        let frequency = df.column(FREQUENCY_COLUMN)?;
        for idx in 0..df.height() {
            let values = key_columns
                .iter()
                .map(|column| column.get(idx).map(any_to_value))
                .collect::<PolarsResult<Vec<_>>>()?;
            rows.push(GroupRow {
                values,
                frequency: any_to_count(frequency.get(idx)?),
            });
        }
        Ok(GroupedCounts {
            keys: unique_keys,
            rows,
        })
    }

    /// Distinct non-null values of a column, optionally restricted to one year.
    pub fn distinct_values(
        &self,
        table: &str,
        column: &str,
        year: Option<i32>,
    ) -> Result<Vec<Value>> {
        let frame = self.table(table)?;
        if !frame.has_column(column) {
            return Err(QueryError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let mut plan = frame.data.clone().lazy();
        if let Some(year) = year {
            let year_column = frame
                .year_column
                .as_deref()
                .ok_or_else(|| QueryError::NoYearColumn {
                    table: table.to_string(),
                })?;
            plan = plan.filter(col(year_column).eq(lit(year)));
        }
        let plan = plan
            .select([col(column)])
            .unique(None, UniqueKeepStrategy::Any);
        let df = self.collect(plan)?;
        let series = df.column(column)?;
        let mut values = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            if let Some(value) = any_to_value(series.get(idx)?) {
                values.push(value);
            }
        }
        values.sort_by(Value::canonical_cmp);
        Ok(values)
    }
}

fn read_table(path: &Path, table: &TableCatalog) -> Result<TableFrame> {
    let source = PathBuf::from(path);
    let data = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(source.clone()))
        .and_then(|reader| reader.finish())
        .map_err(|source_err| QueryError::Read {
            path: source,
            source: source_err,
        })?;
    Ok(TableFrame {
        data,
        primary_key: table.primary_key.clone(),
        year_column: table.year_column.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patients() -> Warehouse {
        let data = df!(
            "PatientId" => [1i64, 2, 3, 1],
            "year" => [2010i64, 2010, 2010, 2011],
            "Sex" => ["Male", "Female", "Male", "Male"],
        )
        .unwrap();
        Warehouse::new().with_table(
            "patient",
            TableFrame::new(data, "PatientId").with_year_column("year"),
        )
    }

    #[test]
    fn reflects_schema() {
        let schema = patients().schema("patient").unwrap();
        assert_eq!(schema.get("PatientId"), Some(&DataType::Int64));
        assert_eq!(schema.get("Sex"), Some(&DataType::String));
        assert!(patients().schema("visit").is_none());
    }

    #[test]
    fn distinct_values_are_sorted() {
        let warehouse = patients();
        let values = warehouse.distinct_values("patient", "Sex", None).unwrap();
        assert_eq!(values, vec![Value::text("Female"), Value::text("Male")]);
        let values = warehouse
            .distinct_values("patient", "PatientId", Some(2011))
            .unwrap();
        assert_eq!(values, vec![Value::Integer(1)]);
        assert_eq!(warehouse.executed_queries(), 2);
    }

    #[test]
    fn unknown_column_is_typed() {
        let err = patients()
            .distinct_values("patient", "Height", None)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
    }

    #[test]
    fn group_sums() {
        let counts = GroupedCounts {
            keys: vec!["a".into()],
            rows: vec![
                GroupRow {
                    values: vec![Some(Value::Integer(1))],
                    frequency: 4,
                },
                GroupRow {
                    values: vec![None],
                    frequency: 2,
                },
            ],
        };
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.sum_where(|values| values[0].is_some()), 4);
        assert_eq!(counts.position("a"), Some(0));
    }
}
