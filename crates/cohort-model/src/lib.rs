//! Data model for the cohort and association engine.
//!
//! Everything here is plain data: typed values and qualifiers, cohort
//! definitions and their canonical form, and the immutable result records the
//! engine computes and caches.

pub mod association;
pub mod cohort;
pub mod digest;
pub mod error;
pub mod predicate;
pub mod qualifier;
pub mod value;

pub use association::{
    AssociationResult, CellStats, FeatureBin, FeatureCounts, Marginal, MultivariateRow, ratio,
};
pub use cohort::{Cohort, CohortId};
pub use digest::Digest;
pub use error::{ModelError, Result};
pub use predicate::{FeatureBins, FeaturePredicate, NormalizedPredicates, normalize};
pub use qualifier::{Operator, Qualifier};
pub use value::{FeatureKind, Value, format_numeric};
