//! Feature predicates and their canonical form.
//!
//! A cohort is defined by an unordered multiset of [`FeaturePredicate`]s. Before a
//! definition is stored or used as a cache key it goes through [`normalize`], which
//! fills in the reference year, sorts and dedupes `in` operands, sorts by
//! `(feature_name, operator, operands, year)` and drops exact duplicates. The resulting [`NormalizedPredicates::canonical`]
//! string is byte-identical for any submission order.
//!
//! Bin lists ([`FeatureBins`]) are the other predicate shape. Their order is the
//! caller-declared axis order of a contingency table and is never sorted.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::qualifier::Qualifier;
use crate::value::Value;

/// One condition of a cohort definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePredicate {
    pub feature_name: String,
    pub qualifier: Qualifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl FeaturePredicate {
    pub fn new(feature_name: impl Into<String>, qualifier: Qualifier) -> Self {
        Self {
            feature_name: feature_name.into(),
            qualifier,
            year: None,
        }
    }

    #[must_use]
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    fn sort_key(&self) -> (&str, &'static str, String, Option<i32>) {
        (
            self.feature_name.as_str(),
            self.qualifier.operator().as_str(),
            serialized_operands(&self.qualifier),
            self.year,
        )
    }
}

/// An ordered, mutually exclusive partition of one feature, used as a table axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBins {
    pub feature_name: String,
    pub bins: Vec<Qualifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl FeatureBins {
    pub fn new(feature_name: impl Into<String>, bins: Vec<Qualifier>) -> Self {
        Self {
            feature_name: feature_name.into(),
            bins,
            year: None,
        }
    }

    #[must_use]
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Fill in a missing year. Bin order is preserved.
    #[must_use]
    pub fn normalized(mut self, default_year: Option<i32>) -> Self {
        if self.year.is_none() {
            self.year = default_year;
        }
        self
    }
}

/// Canonical form of a cohort definition.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPredicates {
    predicates: Vec<FeaturePredicate>,
    canonical: String,
}

impl NormalizedPredicates {
    /// Rebuild from a stored canonical string.
    pub fn from_canonical(canonical: &str) -> Result<Self> {
        let predicates: Vec<FeaturePredicate> =
            serde_json::from_str(canonical).map_err(ModelError::Parse)?;
        Ok(Self {
            predicates,
            canonical: canonical.to_string(),
        })
    }

    pub fn predicates(&self) -> &[FeaturePredicate] {
        &self.predicates
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn into_predicates(self) -> Vec<FeaturePredicate> {
        self.predicates
    }
}

/// Normalize a cohort definition.
///
/// Predicates without a year take `default_year`. The output is totally ordered,
/// so two semantically identical multisets produce the same canonical string.
pub fn normalize(
    default_year: Option<i32>,
    predicates: &[FeaturePredicate],
) -> Result<NormalizedPredicates> {
    let mut filled: Vec<FeaturePredicate> = predicates
        .iter()
        .cloned()
        .map(|mut predicate| {
            if predicate.year.is_none() {
                predicate.year = default_year;
            }
            if let Qualifier::In { values } = &mut predicate.qualifier {
                values.sort_by(Value::canonical_cmp);
                values.dedup_by(|a, b| a.canonical_cmp(b) == Ordering::Equal);
            }
            predicate
        })
        .collect();
    filled.sort_by(compare_predicates);
    filled.dedup();
    let canonical = to_canonical_json("cohort predicates", &filled)?;
    Ok(NormalizedPredicates {
        predicates: filled,
        canonical,
    })
}

fn compare_predicates(a: &FeaturePredicate, b: &FeaturePredicate) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

fn serialized_operands(qualifier: &Qualifier) -> String {
    serde_json::to_string(&qualifier.operands()).unwrap_or_default()
}

/// Serialize a value to the compact JSON form used for keys and digests.
pub fn to_canonical_json<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| ModelError::Serialize { what, source })
}
