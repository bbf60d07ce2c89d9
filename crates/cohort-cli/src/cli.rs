//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "cohort",
    version,
    about = "Privacy-checked cohorts and feature associations over reference tables",
    long_about = "Define cohorts over catalogued reference tables and compute\n\
                  contingency tables, chi-squared and Fisher statistics between\n\
                  binned features. Cohorts and results persist in a store snapshot."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Engine config (default: $COHORT_CONFIG, then ./cohort.toml).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON instead of tables.
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the features of a table that are backed by data.
    Features(TableArgs),

    /// Manage stored cohorts.
    #[command(subcommand)]
    Cohort(CohortCommand),

    /// Contingency table and statistics between two binned features.
    Associate(AssociateArgs),

    /// Search associations between every pair of selected features.
    Associations(AssociationsArgs),

    /// Per-bin counts of one feature, or of every feature, over a cohort.
    Counts(CountsArgs),

    /// Frequencies of every bin combination across a feature chain.
    Multivariate(MultivariateArgs),

    /// Check that a bin list partitions its feature's declared levels.
    CheckBins(CheckBinsArgs),
}

#[derive(Subcommand)]
pub enum CohortCommand {
    /// Materialize a cohort, reusing an existing one with the same definition.
    Create(CreateArgs),

    /// Show a cohort definition.
    Show(ShowArgs),

    /// List the cohorts of a table.
    List(TableArgs),
}

#[derive(Args)]
pub struct TableArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,
}

#[derive(Args)]
pub struct CreateArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    /// Predicate list as inline JSON or a path to a JSON file.
    #[arg(long = "predicates", value_name = "JSON|PATH")]
    pub predicates: String,

    /// Reference year for predicates without one.
    #[arg(long = "year")]
    pub year: Option<i32>,

    /// Store under this id instead of allocating one.
    #[arg(long = "id", value_name = "COHORT_ID")]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    #[arg(value_name = "COHORT_ID")]
    pub cohort_id: String,
}

#[derive(Args)]
pub struct CohortSource {
    /// Stored cohort to run against.
    #[arg(long = "cohort", value_name = "COHORT_ID", conflicts_with = "predicates")]
    pub cohort: Option<String>,

    /// Ad hoc cohort predicates (inline JSON or path). Defaults to the whole table.
    #[arg(long = "predicates", value_name = "JSON|PATH")]
    pub predicates: Option<String>,

    /// Reference year for the ad hoc cohort.
    #[arg(long = "year", conflicts_with = "cohort")]
    pub year: Option<i32>,
}

#[derive(Args)]
pub struct AssociateArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    #[command(flatten)]
    pub source: CohortSource,

    /// Row feature bins (inline JSON or path).
    #[arg(long = "feature-a", value_name = "JSON|PATH")]
    pub feature_a: String,

    /// Column feature bins (inline JSON or path).
    #[arg(long = "feature-b", value_name = "JSON|PATH")]
    pub feature_b: String,

    /// Reject bin lists that do not partition the declared levels.
    #[arg(long = "check-coverage")]
    pub check_coverage: bool,
}

#[derive(Args)]
pub struct AssociationsArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    #[arg(long = "cohort", value_name = "COHORT_ID")]
    pub cohort: String,

    /// `any`, `class:A,B` or a bin list.
    #[arg(long = "feature-a", value_name = "SELECTOR", default_value = "any")]
    pub feature_a: String,

    /// `any`, `class:A,B` or a bin list.
    #[arg(long = "feature-b", value_name = "SELECTOR", default_value = "any")]
    pub feature_b: String,

    /// Drop pairs whose (corrected) p-value exceeds this.
    #[arg(long = "max-p", default_value_t = 1.0)]
    pub max_p: f64,

    /// Multiple-testing correction applied before filtering.
    #[arg(long = "correction", value_name = "METHOD")]
    pub correction: Option<String>,
}

#[derive(Args)]
pub struct CountsArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    #[arg(long = "cohort", value_name = "COHORT_ID")]
    pub cohort: String,

    /// Bins of a single feature. Without it every feature is summarized.
    #[arg(long = "feature", value_name = "JSON|PATH")]
    pub feature: Option<String>,
}

#[derive(Args)]
pub struct MultivariateArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    #[arg(long = "cohort", value_name = "COHORT_ID")]
    pub cohort: String,

    /// Ordered feature chain.
    #[arg(value_name = "FEATURE", num_args = 1..)]
    pub features: Vec<String>,
}

#[derive(Args)]
pub struct CheckBinsArgs {
    #[arg(value_name = "TABLE")]
    pub table: String,

    /// Bin list (inline JSON or path).
    #[arg(long = "feature", value_name = "JSON|PATH")]
    pub feature: String,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
