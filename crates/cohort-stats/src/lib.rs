//! Statistics for contingency tables: Pearson chi-squared, Fisher's exact test
//! with the log odds ratio interval, and multiple-testing corrections.

pub mod contingency;
pub mod correction;
pub mod fisher;
pub mod special;

pub use contingency::{ChiSquared, chi_squared, shifted};
pub use correction::{CorrectionMethod, UnknownCorrection, correct};
pub use fisher::{FisherExact, Z_95, fisher_exact_2x2};
pub use special::chi_squared_sf;
