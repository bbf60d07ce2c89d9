//! In-memory reference tables and the cohort query builder.

pub mod builder;
pub mod convert;
pub mod error;
pub mod warehouse;

pub use builder::{BuiltQuery, ColumnRequest, qualifier_expr};
pub use convert::{any_to_count, any_to_value, value_lit};
pub use error::{QueryError, Result};
pub use warehouse::{FREQUENCY_COLUMN, GroupRow, GroupedCounts, TableFrame, TableSchema, Warehouse};
