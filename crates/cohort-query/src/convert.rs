//! Conversions between polars values and model [`Value`]s.

use cohort_model::Value;
use polars::prelude::*;

/// Converts a grouped cell to a model value. `Null` becomes `None`.
///
/// # Examples
///
/// ```
/// use cohort_model::Value;
/// use cohort_query::any_to_value;
/// use polars::prelude::AnyValue;
///
/// assert_eq!(any_to_value(AnyValue::Int32(3)), Some(Value::Integer(3)));
/// assert_eq!(any_to_value(AnyValue::String("0-2")), Some(Value::text("0-2")));
/// assert_eq!(any_to_value(AnyValue::Null), None);
/// ```
pub fn any_to_value(value: AnyValue<'_>) -> Option<Value> {
    match value {
        AnyValue::Null => None,
        AnyValue::Int8(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::Int16(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::Int32(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::Int64(v) => Some(Value::Integer(v)),
        AnyValue::UInt8(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::UInt16(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::UInt32(v) => Some(Value::Integer(i64::from(v))),
        AnyValue::UInt64(v) => Some(
            i64::try_from(v)
                .map(Value::Integer)
                .unwrap_or(Value::Real(v as f64)),
        ),
        AnyValue::Float32(v) => Some(Value::Real(f64::from(v))),
        AnyValue::Float64(v) => Some(Value::Real(v)),
        AnyValue::Boolean(b) => Some(Value::Integer(i64::from(b))),
        AnyValue::String(s) => Some(Value::text(s)),
        AnyValue::StringOwned(s) => Some(Value::text(s.as_str())),
        other => Some(Value::text(other.to_string())),
    }
}

/// Converts a count cell to `u64`, treating anything non-numeric as zero.
pub fn any_to_count(value: AnyValue<'_>) -> u64 {
    match value {
        AnyValue::UInt8(v) => u64::from(v),
        AnyValue::UInt16(v) => u64::from(v),
        AnyValue::UInt32(v) => u64::from(v),
        AnyValue::UInt64(v) => v,
        AnyValue::Int8(v) => u64::try_from(v).unwrap_or(0),
        AnyValue::Int16(v) => u64::try_from(v).unwrap_or(0),
        AnyValue::Int32(v) => u64::try_from(v).unwrap_or(0),
        AnyValue::Int64(v) => u64::try_from(v).unwrap_or(0),
        _ => 0,
    }
}

/// A literal expression for an operand.
pub fn value_lit(value: &Value) -> Expr {
    match value {
        Value::Integer(v) => lit(*v),
        Value::Real(v) => lit(*v),
        Value::Text(s) => lit(s.clone()),
    }
}
