//! Cohort and association engine.
//!
//! [`Engine`] ties the feature catalog, the in-memory reference tables and a
//! [`CohortStore`] together. It materializes privacy-checked cohorts, computes
//! contingency tables with chi-squared and Fisher statistics, searches for
//! associations across features, builds multivariate frequency tables and
//! caches every result by the digest of its normalized request.

pub mod all_features;
pub mod association;
pub mod cache;
pub mod cohort;
pub mod contingency;
pub mod counts;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod multivariate;
pub mod store;

pub use all_features::FeatureSelector;
pub use association::AssociationOutcome;
pub use cache::{EvictionPolicy, EvictionReport};
pub use cohort::CohortOutcome;
pub use coverage::check_coverage;
pub use engine::{Engine, EngineOptions, SUPPRESSION_THRESHOLD};
pub use error::{CoverageError, EngineError, ErrorCategory, Result, StoreError};
pub use multivariate::FEATURE_CHAIN;
pub use store::{CohortStore, MemoryStore};

pub use cohort_stats::CorrectionMethod;
