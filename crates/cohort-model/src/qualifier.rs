use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{FeatureKind, Value};

/// Comparison operator of a [`Qualifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Between,
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Between => "between",
            Operator::In => "in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate on one feature.
///
/// Serialized with the operator as the tag, e.g.
/// `{"operator": "between", "value_a": 1, "value_b": 5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator")]
pub enum Qualifier {
    #[serde(rename = "<")]
    Lt { value: Value },
    #[serde(rename = ">")]
    Gt { value: Value },
    #[serde(rename = "<=")]
    Le { value: Value },
    #[serde(rename = ">=")]
    Ge { value: Value },
    #[serde(rename = "=")]
    Eq { value: Value },
    #[serde(rename = "<>")]
    Ne { value: Value },
    #[serde(rename = "between")]
    Between { value_a: Value, value_b: Value },
    #[serde(rename = "in")]
    In { values: Vec<Value> },
}

impl Qualifier {
    pub fn equals(value: impl Into<Value>) -> Self {
        Qualifier::Eq {
            value: value.into(),
        }
    }

    pub fn between(value_a: impl Into<Value>, value_b: impl Into<Value>) -> Self {
        Qualifier::Between {
            value_a: value_a.into(),
            value_b: value_b.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Qualifier::In {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn operator(&self) -> Operator {
        match self {
            Qualifier::Lt { .. } => Operator::Lt,
            Qualifier::Gt { .. } => Operator::Gt,
            Qualifier::Le { .. } => Operator::Le,
            Qualifier::Ge { .. } => Operator::Ge,
            Qualifier::Eq { .. } => Operator::Eq,
            Qualifier::Ne { .. } => Operator::Ne,
            Qualifier::Between { .. } => Operator::Between,
            Qualifier::In { .. } => Operator::In,
        }
    }

    /// All operand values in declaration order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Qualifier::Lt { value }
            | Qualifier::Gt { value }
            | Qualifier::Le { value }
            | Qualifier::Ge { value }
            | Qualifier::Eq { value }
            | Qualifier::Ne { value } => vec![value],
            Qualifier::Between { value_a, value_b } => vec![value_a, value_b],
            Qualifier::In { values } => values.iter().collect(),
        }
    }

    /// Returns the first operand that does not fit `kind`, if any.
    pub fn mismatched_operand(&self, kind: FeatureKind) -> Option<&Value> {
        self.operands().into_iter().find(|value| !value.fits(kind))
    }

    /// Evaluate the qualifier against a raw column value.
    ///
    /// Missing values never match, mirroring SQL comparisons against NULL.
    pub fn matches(&self, candidate: Option<&Value>) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };
        let cmp = |operand: &Value| candidate.compare(operand);
        match self {
            Qualifier::Lt { value } => cmp(value) == Some(Ordering::Less),
            Qualifier::Gt { value } => cmp(value) == Some(Ordering::Greater),
            Qualifier::Le { value } => {
                matches!(cmp(value), Some(Ordering::Less | Ordering::Equal))
            }
            Qualifier::Ge { value } => {
                matches!(cmp(value), Some(Ordering::Greater | Ordering::Equal))
            }
            Qualifier::Eq { value } => cmp(value) == Some(Ordering::Equal),
            Qualifier::Ne { value } => {
                matches!(cmp(value), Some(Ordering::Less | Ordering::Greater))
            }
            Qualifier::Between { value_a, value_b } => {
                matches!(cmp(value_a), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp(value_b), Some(Ordering::Less | Ordering::Equal))
            }
            Qualifier::In { values } => values
                .iter()
                .any(|value| cmp(value) == Some(Ordering::Equal)),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Between { value_a, value_b } => {
                write!(f, "between {value_a} and {value_b}")
            }
            Qualifier::In { values } => {
                let joined: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "in ({})", joined.join(", "))
            }
            other => match other.operands().first() {
                Some(value) => write!(f, "{} {value}", other.operator()),
                None => write!(f, "{}", other.operator()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_tagged_json() {
        let q: Qualifier =
            serde_json::from_str(r#"{"operator": "between", "value_a": 1, "value_b": 5}"#)
                .unwrap();
        assert_eq!(q, Qualifier::between(1, 5));

        let q: Qualifier = serde_json::from_str(r#"{"operator": "<>", "value": "0-2"}"#).unwrap();
        assert_eq!(
            q,
            Qualifier::Ne {
                value: Value::text("0-2")
            }
        );
    }

    #[test]
    fn between_is_inclusive() {
        let q = Qualifier::between(2, 4);
        assert!(q.matches(Some(&Value::Integer(2))));
        assert!(q.matches(Some(&Value::Integer(4))));
        assert!(!q.matches(Some(&Value::Integer(5))));
    }

    #[test]
    fn missing_values_never_match() {
        assert!(!Qualifier::Ne {
            value: Value::Integer(1)
        }
        .matches(None));
    }

    #[test]
    fn in_matches_any_member() {
        let q = Qualifier::one_of(["a", "b"]);
        assert!(q.matches(Some(&Value::text("b"))));
        assert!(!q.matches(Some(&Value::text("c"))));
    }

    #[test]
    fn detects_operand_kind_mismatch() {
        let q = Qualifier::one_of([Value::Integer(1), Value::text("two")]);
        assert_eq!(
            q.mismatched_operand(FeatureKind::Integer),
            Some(&Value::text("two"))
        );
        assert_eq!(q.mismatched_operand(FeatureKind::String), Some(&Value::Integer(1)));
    }

    #[test]
    fn displays_readably() {
        assert_eq!(Qualifier::equals("0-2").to_string(), "= 0-2");
        assert_eq!(Qualifier::between(1, 3).to_string(), "between 1 and 3");
        assert_eq!(Qualifier::one_of([1, 2]).to_string(), "in (1, 2)");
    }
}
