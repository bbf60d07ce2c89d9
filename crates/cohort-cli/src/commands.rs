use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use cohort_catalog::FeatureCatalog;
use cohort_cli::config::{AppConfig, resolve_config_path};
use cohort_cli::request::{CohortRequest, parse_bins, parse_json_arg, parse_selector};
use cohort_core::{AssociationOutcome, CohortStore, CorrectionMethod, Engine, MemoryStore};
use cohort_model::{CohortId, FeaturePredicate};
use cohort_query::Warehouse;
use tracing::{debug, info_span};

use crate::cli::{
    AssociateArgs, AssociationsArgs, CheckBinsArgs, CohortCommand, CohortSource, Command,
    CountsArgs, CreateArgs, MultivariateArgs, ShowArgs, TableArgs,
};
use crate::summary::{
    print_association_outcome, print_associations, print_cohort, print_cohorts, print_counts,
    print_coverage_ok, print_features, print_json, print_multivariate, print_outcome,
};

/// An engine plus the store it persists to.
pub struct Session {
    engine: Engine,
    store: Arc<MemoryStore>,
    snapshot: Option<PathBuf>,
}

impl Session {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(config_path);
        let config = AppConfig::load(&path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let _span = info_span!("open_session").entered();
        let start = Instant::now();
        let catalog = FeatureCatalog::load(&config.catalog)
            .with_context(|| format!("load catalog {}", config.catalog.display()))?;
        let warehouse = Warehouse::from_csv_dir(&config.data_dir, &catalog)
            .with_context(|| format!("load tables from {}", config.data_dir.display()))?;
        let options = config.engine_options();
        let store = match &config.store {
            Some(path) => MemoryStore::open(path)
                .with_context(|| format!("open store {}", path.display()))?,
            None => MemoryStore::new(),
        }
        .with_policy(options.eviction);
        let store = Arc::new(store);
        let engine = Engine::new(
            Arc::new(catalog),
            Arc::new(warehouse),
            Arc::clone(&store) as Arc<dyn CohortStore>,
            options,
        );
        debug!(elapsed_ms = start.elapsed().as_millis(), "session ready");
        Ok(Self {
            engine,
            store,
            snapshot: config.store.clone(),
        })
    }

    /// Write cohorts and caches back to the snapshot file, if one is configured.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let report = self.engine.evict_cache();
        self.store
            .save_snapshot(path)
            .with_context(|| format!("save store {}", path.display()))?;
        let (associations, counts) = self.store.cache_sizes();
        debug!(
            path = %path.display(),
            evicted = report.total(),
            associations,
            counts,
            "store saved"
        );
        Ok(())
    }
}

pub fn run(session: &Session, command: &Command, json: bool) -> Result<()> {
    match command {
        Command::Features(args) => run_features(session, args, json),
        Command::Cohort(CohortCommand::Create(args)) => run_cohort_create(session, args, json),
        Command::Cohort(CohortCommand::Show(args)) => run_cohort_show(session, args, json),
        Command::Cohort(CohortCommand::List(args)) => run_cohort_list(session, args, json),
        Command::Associate(args) => run_associate(session, args, json),
        Command::Associations(args) => run_associations(session, args, json),
        Command::Counts(args) => run_counts(session, args, json),
        Command::Multivariate(args) => run_multivariate(session, args, json),
        Command::CheckBins(args) => run_check_bins(session, args, json),
    }
}

fn run_features(session: &Session, args: &TableArgs, json: bool) -> Result<()> {
    let features = session.engine.available_features(&args.table)?;
    if json {
        let listing: Vec<serde_json::Value> = features
            .iter()
            .map(|feature| {
                serde_json::json!({
                    "name": feature.name,
                    "kind": feature.kind,
                    "classification": feature.classification,
                    "domain": feature.domain,
                })
            })
            .collect();
        return print_json(&listing);
    }
    print_features(&args.table, &features);
    Ok(())
}

fn run_cohort_create(session: &Session, args: &CreateArgs, json: bool) -> Result<()> {
    let request: CohortRequest = parse_json_arg("cohort predicates", &args.predicates)?;
    let (predicates, year) = request.into_parts(args.year);
    let outcome = match &args.id {
        Some(id) => session.engine.create_explicit(
            &args.table,
            year,
            &predicates,
            CohortId::new(id.as_str()),
        )?,
        None => session.engine.get_or_create(&args.table, year, &predicates)?,
    };
    if json {
        return print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

fn run_cohort_show(session: &Session, args: &ShowArgs, json: bool) -> Result<()> {
    let cohort = session
        .engine
        .get_definition_by_id(&CohortId::new(args.cohort_id.as_str()))?;
    if json {
        return print_json(&cohort);
    }
    print_cohort(&cohort)
}

fn run_cohort_list(session: &Session, args: &TableArgs, json: bool) -> Result<()> {
    let cohorts = session.engine.cohort_dictionary(&args.table)?;
    if json {
        return print_json(&cohorts);
    }
    print_cohorts(&cohorts);
    Ok(())
}

fn run_associate(session: &Session, args: &AssociateArgs, json: bool) -> Result<()> {
    let feature_a = parse_bins(&args.feature_a)?;
    let feature_b = parse_bins(&args.feature_b)?;
    let engine = &session.engine;
    let outcome: AssociationOutcome = match cohort_source(&args.source)? {
        Source::Stored(cohort_id) => {
            if args.check_coverage {
                engine.validate_full_coverage(&args.table, &feature_a)?;
                engine.validate_full_coverage(&args.table, &feature_b)?;
            }
            engine
                .compute_cohort_association(&args.table, &cohort_id, feature_a, feature_b)?
                .into()
        }
        Source::AdHoc(predicates, year) if args.check_coverage => engine
            .compute_association_checked(&args.table, &predicates, year, feature_a, feature_b)?,
        Source::AdHoc(predicates, year) => {
            engine.compute_association(&args.table, &predicates, year, feature_a, feature_b)?
        }
    };
    if json {
        return print_json(&outcome);
    }
    print_association_outcome(&outcome);
    Ok(())
}

fn run_associations(session: &Session, args: &AssociationsArgs, json: bool) -> Result<()> {
    let feature_a = parse_selector(&args.feature_a)?;
    let feature_b = parse_selector(&args.feature_b)?;
    let correction = args
        .correction
        .as_deref()
        .map(str::parse::<CorrectionMethod>)
        .transpose()?;
    let results = session.engine.compute_all_associations(
        &args.table,
        &CohortId::new(args.cohort.as_str()),
        &feature_a,
        args.max_p,
        &feature_b,
        correction,
    )?;
    if json {
        return print_json(&results);
    }
    print_associations(&results);
    Ok(())
}

fn run_counts(session: &Session, args: &CountsArgs, json: bool) -> Result<()> {
    let cohort_id = CohortId::new(args.cohort.as_str());
    let counts = match &args.feature {
        Some(feature) => vec![session.engine.compute_feature_counts(
            &args.table,
            &cohort_id,
            parse_bins(feature)?,
        )?],
        None => session.engine.cohort_features(&args.table, &cohort_id)?,
    };
    if json {
        return print_json(&counts);
    }
    print_counts(&counts);
    Ok(())
}

fn run_multivariate(session: &Session, args: &MultivariateArgs, json: bool) -> Result<()> {
    let rows = session.engine.compute_multivariate_table(
        &args.table,
        &CohortId::new(args.cohort.as_str()),
        &args.features,
    )?;
    if json {
        return print_json(&rows);
    }
    print_multivariate(&rows);
    Ok(())
}

fn run_check_bins(session: &Session, args: &CheckBinsArgs, json: bool) -> Result<()> {
    let bins = parse_bins(&args.feature)?;
    session.engine.validate_full_coverage(&args.table, &bins)?;
    if json {
        return print_json(&serde_json::json!({
            "feature_name": bins.feature_name,
            "covered": true,
        }));
    }
    print_coverage_ok(&bins);
    Ok(())
}

enum Source {
    Stored(CohortId),
    AdHoc(Vec<FeaturePredicate>, Option<i32>),
}

fn cohort_source(source: &CohortSource) -> Result<Source> {
    if let Some(cohort) = &source.cohort {
        return Ok(Source::Stored(CohortId::new(cohort.as_str())));
    }
    let request = match &source.predicates {
        Some(arg) => parse_json_arg("cohort predicates", arg)?,
        None => CohortRequest::Predicates(Vec::new()),
    };
    let (predicates, year) = request.into_parts(source.year);
    Ok(Source::AdHoc(predicates, year))
}
