//! Engine error types.
//!
//! Every failure that crosses the engine boundary is a variant of
//! [`EngineError`]. [`EngineError::category`] groups them the way callers
//! react to them: a bad reference, a malformed request, a coverage problem,
//! a persistence failure or a backend query failure. Suppression of small
//! cohorts is not an error (see [`crate::CohortOutcome`]).

use std::path::PathBuf;

use cohort_model::{CohortId, ModelError};
use cohort_query::QueryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Broad classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidReference,
    InvalidRequest,
    Coverage,
    Persistence,
    Query,
}

/// A bin list that does not partition a feature's declared domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoverageError {
    #[error("feature {feature} has no declared domain")]
    NoDomain { feature: String },

    #[error("operand {operand} is not a level of {feature}")]
    UnknownLevel { feature: String, operand: String },

    #[error("level {level} of {feature} is covered by more than one bin")]
    Overlap { feature: String, level: String },

    #[error("level {level} of {feature} is not covered by any bin")]
    Incomplete { feature: String, level: String },
}

/// Failures of the cohort relation and caches.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cohort id {0} is already in use")]
    IdCollision(CohortId),

    #[error("cohort id {0} already holds a different definition")]
    ConflictingDefinition(CohortId),

    #[error("could not allocate a cohort id after {attempts} attempts")]
    IdAllocationExhausted { attempts: usize },

    #[error("failed to {operation} snapshot {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to complete snapshot write to {target_path}")]
    AtomicWriteFailed {
        temp_path: PathBuf,
        target_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot version {found} is not supported (maximum: {max_supported})")]
    UnsupportedSnapshot { found: u32, max_supported: u32 },
}

impl StoreError {
    /// True when retrying with a freshly allocated id can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::IdCollision(_))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown feature {feature} in table {table}")]
    UnknownFeature { table: String, feature: String },

    #[error("feature {feature} of table {table} has no column in the loaded data")]
    UnavailableFeature { table: String, feature: String },

    #[error("unknown cohort: {0}")]
    UnknownCohort(CohortId),

    #[error("cohort {cohort_id} belongs to table {found}, not {expected}")]
    CohortTableMismatch {
        cohort_id: CohortId,
        expected: String,
        found: String,
    },

    #[error("operand {operand} does not fit {kind} feature {feature}")]
    OperandKind {
        feature: String,
        kind: String,
        operand: String,
    },

    #[error("feature {feature} was given an empty bin list")]
    EmptyBins { feature: String },

    #[error("multivariate tables need 3 to 8 features, got {found}")]
    FeatureCount { found: usize },

    #[error("feature {feature} appears more than once")]
    RepeatedFeature { feature: String },

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::UnknownTable(_)
            | EngineError::UnknownFeature { .. }
            | EngineError::UnavailableFeature { .. }
            | EngineError::UnknownCohort(_)
            | EngineError::CohortTableMismatch { .. } => ErrorCategory::InvalidReference,
            EngineError::OperandKind { .. }
            | EngineError::EmptyBins { .. }
            | EngineError::FeatureCount { .. }
            | EngineError::RepeatedFeature { .. } => ErrorCategory::InvalidRequest,
            EngineError::Coverage(_) => ErrorCategory::Coverage,
            EngineError::Store(_) | EngineError::Model(_) => ErrorCategory::Persistence,
            EngineError::Query(err) => match err {
                QueryError::UnknownTable(_) | QueryError::UnknownColumn { .. } => {
                    ErrorCategory::InvalidReference
                }
                QueryError::NoYearColumn { .. } => ErrorCategory::InvalidRequest,
                QueryError::Read { .. } | QueryError::Polars(_) => ErrorCategory::Query,
            },
        }
    }

    /// True for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(err) if err.is_retryable())
    }
}
