use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("table not loaded: {0}")]
    UnknownTable(String),

    #[error("column {column} not found in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("table {table} has no year column but a year-bound query was requested")]
    NoYearColumn { table: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}
