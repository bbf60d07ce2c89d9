use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::predicate::{FeaturePredicate, NormalizedPredicates};

/// Opaque cohort identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CohortId(String);

impl CohortId {
    pub const PREFIX: &'static str = "COHORT:";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for the `n`th allocated cohort, e.g. `COHORT:3`.
    pub fn sequential(n: u64) -> Self {
        Self(format!("{}{n}", Self::PREFIX))
    }

    /// Sequence number of an id produced by [`CohortId::sequential`].
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(Self::PREFIX)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted, size-validated cohort definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub cohort_id: CohortId,
    pub table: String,
    pub year: Option<i32>,
    pub size: u64,
    /// Canonical serialization of the normalized predicate set.
    pub predicates: String,
}

impl Cohort {
    pub fn new(
        cohort_id: CohortId,
        table: impl Into<String>,
        year: Option<i32>,
        size: u64,
        predicates: &NormalizedPredicates,
    ) -> Self {
        Self {
            cohort_id,
            table: table.into(),
            year,
            size,
            predicates: predicates.canonical().to_string(),
        }
    }

    pub fn normalized_predicates(&self) -> Result<NormalizedPredicates> {
        NormalizedPredicates::from_canonical(&self.predicates)
    }

    pub fn predicate_list(&self) -> Result<Vec<FeaturePredicate>> {
        Ok(self.normalized_predicates()?.into_predicates())
    }

    /// True when this cohort was stored for exactly this table, year and definition.
    pub fn has_definition(&self, table: &str, year: Option<i32>, canonical: &str) -> bool {
        self.table == table && self.year == year && self.predicates == canonical
    }
}
