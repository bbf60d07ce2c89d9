//! Builds the cohort relation: rows of a table that satisfy every predicate,
//! joined with the requested feature columns.
//!
//! Predicates are grouped by effective year. Each group becomes a subquery of
//! distinct primary keys restricted to that year. Requested columns are grouped
//! by year the same way, each subquery selecting the key plus that year's
//! columns under a unique alias. All subqueries are inner-joined on the key, so
//! a row survives only if it has data in every year involved.

use std::collections::BTreeMap;

use cohort_model::{FeaturePredicate, Qualifier};
use polars::prelude::*;
use tracing::debug;

use crate::convert::value_lit;
use crate::error::{QueryError, Result};
use crate::warehouse::{TableFrame, Warehouse};

/// A feature column to attach to the cohort rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRequest {
    pub name: String,
    pub year: Option<i32>,
}

impl ColumnRequest {
    pub fn new(name: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            name: name.into(),
            year,
        }
    }

    /// Output column name, unique per (column, year).
    pub fn alias(&self) -> String {
        match self.year {
            Some(year) => format!("{}@{year}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A lazily evaluated cohort relation.
#[derive(Clone)]
pub struct BuiltQuery {
    /// Joined relation: primary key plus every requested alias.
    pub relation: LazyFrame,
    /// The per-year column subqueries, before joining.
    pub column_relations: Vec<LazyFrame>,
    pub primary_key: String,
    /// Aliases in request order.
    pub aliases: Vec<String>,
}

impl BuiltQuery {
    pub fn alias_of(&self, request_index: usize) -> Option<&str> {
        self.aliases.get(request_index).map(String::as_str)
    }
}

/// Translate one qualifier into a boolean expression on `column`.
pub fn qualifier_expr(column: &str, qualifier: &Qualifier) -> Expr {
    let c = col(column);
    match qualifier {
        Qualifier::Lt { value } => c.lt(value_lit(value)),
        Qualifier::Gt { value } => c.gt(value_lit(value)),
        Qualifier::Le { value } => c.lt_eq(value_lit(value)),
        Qualifier::Ge { value } => c.gt_eq(value_lit(value)),
        Qualifier::Eq { value } => c.eq(value_lit(value)),
        Qualifier::Ne { value } => c.neq(value_lit(value)),
        Qualifier::Between { value_a, value_b } => c
            .clone()
            .gt_eq(value_lit(value_a))
            .and(c.lt_eq(value_lit(value_b))),
        Qualifier::In { values } => values
            .iter()
            .map(|value| col(column).eq(value_lit(value)))
            .reduce(|any, next| any.or(next))
            .unwrap_or_else(|| lit(false)),
    }
}

impl Warehouse {
    /// Build the relation for `table` restricted to the cohort.
    ///
    /// Predicates without a year fall back to `cohort_year`; when both are
    /// absent the predicate is evaluated over every row.
    pub fn build(
        &self,
        table: &str,
        cohort_predicates: &[FeaturePredicate],
        cohort_year: Option<i32>,
        columns: &[ColumnRequest],
    ) -> Result<BuiltQuery> {
        let frame = self.table(table)?;
        let pk = frame.primary_key.as_str();
        require_column(table, frame, pk)?;

        let mut predicate_groups: BTreeMap<Option<i32>, Vec<&FeaturePredicate>> = BTreeMap::new();
        for predicate in cohort_predicates {
            require_column(table, frame, &predicate.feature_name)?;
            predicate_groups
                .entry(predicate.year.or(cohort_year))
                .or_default()
                .push(predicate);
        }
        if predicate_groups.is_empty() {
            predicate_groups.insert(cohort_year, Vec::new());
        }

        let mut subqueries = Vec::with_capacity(predicate_groups.len());
        for (year, predicates) in &predicate_groups {
            let mut plan = year_scoped(table, frame, *year)?;
            for predicate in predicates {
                plan = plan.filter(qualifier_expr(&predicate.feature_name, &predicate.qualifier));
            }
            subqueries.push(
                plan.select([col(pk)])
                    .unique(None, UniqueKeepStrategy::Any),
            );
        }

        let mut column_groups: BTreeMap<Option<i32>, Vec<&ColumnRequest>> = BTreeMap::new();
        for request in columns {
            require_column(table, frame, &request.name)?;
            let group = column_groups.entry(request.year).or_default();
            if !group.contains(&request) {
                group.push(request);
            }
        }

        let mut column_relations = Vec::with_capacity(column_groups.len());
        for (year, requests) in &column_groups {
            let mut projection = Vec::with_capacity(requests.len() + 1);
            projection.push(col(pk));
            for request in requests {
                projection.push(col(request.name.as_str()).alias(request.alias()));
            }
            column_relations.push(year_scoped(table, frame, *year)?.select(projection));
        }

        debug!(
            table,
            predicate_years = predicate_groups.len(),
            column_years = column_groups.len(),
            columns = columns.len(),
            "built cohort query"
        );

        let relation = subqueries
            .iter()
            .chain(&column_relations)
            .cloned()
            .reduce(|left, right| inner_join(left, right, pk))
            .unwrap_or_else(|| frame.data.clone().lazy());

        Ok(BuiltQuery {
            relation,
            column_relations,
            primary_key: pk.to_string(),
            aliases: columns.iter().map(ColumnRequest::alias).collect(),
        })
    }
}

fn year_scoped(table: &str, frame: &TableFrame, year: Option<i32>) -> Result<LazyFrame> {
    let plan = frame.data.clone().lazy();
    let Some(year) = year else {
        return Ok(plan);
    };
    let year_column = frame
        .year_column
        .as_deref()
        .ok_or_else(|| QueryError::NoYearColumn {
            table: table.to_string(),
        })?;
    Ok(plan.filter(col(year_column).eq(lit(year))))
}

fn inner_join(left: LazyFrame, right: LazyFrame, pk: &str) -> LazyFrame {
    left.join(
        right,
        [col(pk)],
        [col(pk)],
        JoinArgs::new(JoinType::Inner),
    )
}

fn require_column(table: &str, frame: &TableFrame, column: &str) -> Result<()> {
    if frame.has_column(column) {
        Ok(())
    } else {
        Err(QueryError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_model::Value;

    #[test]
    fn alias_includes_year() {
        assert_eq!(ColumnRequest::new("Sex", Some(2010)).alias(), "Sex@2010");
        assert_eq!(ColumnRequest::new("Sex", None).alias(), "Sex");
    }

    #[test]
    fn empty_in_matches_nothing() {
        let df = df!("x" => [1i64, 2]).unwrap();
        let out = df
            .lazy()
            .filter(qualifier_expr("x", &Qualifier::In { values: vec![] }))
            .collect()
            .unwrap();
        assert_eq!(out.height(), 0);
    }

    #[test]
    fn between_is_inclusive() {
        let df = df!("x" => [1i64, 2, 3, 4]).unwrap();
        let out = df
            .lazy()
            .filter(qualifier_expr("x", &Qualifier::between(2, 3)))
            .collect()
            .unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn in_is_membership() {
        let df = df!("x" => ["a", "b", "c"]).unwrap();
        let out = df
            .lazy()
            .filter(qualifier_expr(
                "x",
                &Qualifier::one_of([Value::text("a"), Value::text("c")]),
            ))
            .collect()
            .unwrap();
        assert_eq!(out.height(), 2);
    }
}
