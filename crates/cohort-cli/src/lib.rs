//! Configuration, request parsing and logging for the `cohort` binary.

pub mod config;
pub mod logging;
pub mod request;
