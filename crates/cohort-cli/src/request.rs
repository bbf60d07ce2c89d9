//! Request arguments.
//!
//! Predicate lists and bin lists arrive as JSON, either inline or as a path
//! to a file holding the document. Anything whose first non-blank character
//! is `{` or `[` is parsed inline.

use std::path::Path;

use anyhow::{Context, Result, bail};
use cohort_core::FeatureSelector;
use cohort_model::{FeatureBins, FeaturePredicate};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub fn parse_json_arg<T: DeserializeOwned>(what: &str, arg: &str) -> Result<T> {
    let trimmed = arg.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).with_context(|| format!("parse {what}"));
    }
    let path = Path::new(arg);
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read {what} from {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {what} in {}", path.display()))
}

/// A cohort definition: a bare predicate list or `{"year": .., "predicates": [..]}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CohortRequest {
    Predicates(Vec<FeaturePredicate>),
    Definition {
        #[serde(default)]
        year: Option<i32>,
        predicates: Vec<FeaturePredicate>,
    },
}

impl CohortRequest {
    /// Split into predicates and year. `--year` overrides a year in the document.
    pub fn into_parts(self, year_flag: Option<i32>) -> (Vec<FeaturePredicate>, Option<i32>) {
        match self {
            CohortRequest::Predicates(predicates) => (predicates, year_flag),
            CohortRequest::Definition { year, predicates } => (predicates, year_flag.or(year)),
        }
    }
}

pub fn parse_bins(arg: &str) -> Result<FeatureBins> {
    parse_json_arg("feature bins", arg)
}

/// `any`, `class:A,B` or a JSON bin list.
pub fn parse_selector(arg: &str) -> Result<FeatureSelector> {
    let trimmed = arg.trim();
    if trimmed.eq_ignore_ascii_case("any") {
        return Ok(FeatureSelector::Any);
    }
    if let Some(classes) = trimmed.strip_prefix("class:") {
        let classes: Vec<&str> = classes
            .split(',')
            .map(str::trim)
            .filter(|class| !class.is_empty())
            .collect();
        if classes.is_empty() {
            bail!("feature selector `{arg}` names no classification");
        }
        return Ok(FeatureSelector::classes(classes));
    }
    parse_bins(trimmed).map(FeatureSelector::Single)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_model::Qualifier;

    #[test]
    fn inline_predicate_list() {
        let request: CohortRequest = parse_json_arg(
            "cohort",
            r#"[{"feature_name": "Sex", "qualifier": {"operator": "=", "value": "Male"}}]"#,
        )
        .unwrap();
        let (predicates, year) = request.into_parts(Some(2010));
        assert_eq!(
            predicates,
            vec![FeaturePredicate::new("Sex", Qualifier::equals("Male"))]
        );
        assert_eq!(year, Some(2010));
    }

    #[test]
    fn definition_keeps_document_year_without_flag() {
        let request: CohortRequest =
            parse_json_arg("cohort", r#"{"year": 2011, "predicates": []}"#).unwrap();
        assert_eq!(request.into_parts(None), (Vec::new(), Some(2011)));
    }

    #[test]
    fn selectors() {
        assert!(matches!(parse_selector("any").unwrap(), FeatureSelector::Any));
        match parse_selector("class:PhenotypicFeature, Environment").unwrap() {
            FeatureSelector::Classes(classes) => assert_eq!(classes.len(), 2),
            _ => panic!("expected classes"),
        }
        assert!(parse_selector("class:").is_err());
        let single = parse_selector(
            r#"{"feature_name": "Sex", "bins": [{"operator": "=", "value": "Male"}]}"#,
        )
        .unwrap();
        assert!(matches!(single, FeatureSelector::Single(bins) if bins.feature_name == "Sex"));
    }
}
