//! Runs the engine against the bundled demo configuration.

use std::path::PathBuf;
use std::sync::Arc;

use cohort_catalog::FeatureCatalog;
use cohort_cli::config::AppConfig;
use cohort_cli::request::{CohortRequest, parse_bins, parse_json_arg};
use cohort_core::{CohortStore, Engine, MemoryStore};
use cohort_model::{FeaturePredicate, Qualifier};
use cohort_query::Warehouse;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn demo_engine() -> Engine {
    let config = AppConfig::load(&demos().join("cohort.toml")).unwrap();
    let catalog = FeatureCatalog::load(&config.catalog).unwrap();
    let warehouse = Warehouse::from_csv_dir(&config.data_dir, &catalog).unwrap();
    let store: Arc<dyn CohortStore> = Arc::new(MemoryStore::new());
    Engine::new(
        Arc::new(catalog),
        Arc::new(warehouse),
        store,
        config.engine_options(),
    )
}

#[test]
fn demo_config_resolves_next_to_file() {
    let config = AppConfig::load(&demos().join("cohort.toml")).unwrap();
    assert!(config.catalog.is_file());
    assert!(config.data_dir.join("patient.csv").is_file());
    assert_eq!(config.cache.capacity, Some(10_000));
}

#[test]
fn demo_requests_drive_an_association() {
    let engine = demo_engine();
    let requests = demos().join("requests");
    let request: CohortRequest =
        parse_json_arg("cohort", requests.join("male_2010.json").to_str().unwrap()).unwrap();
    let (predicates, year) = request.into_parts(None);
    assert_eq!(year, Some(2010));

    let outcome = engine.get_or_create("patient", year, &predicates).unwrap();
    let cohort_id = outcome.cohort_id().unwrap().clone();
    assert!(matches!(
        outcome,
        cohort_core::CohortOutcome::Materialized { size: 30, .. }
    ));

    let age = parse_bins(requests.join("age_bins.json").to_str().unwrap()).unwrap();
    let asthma = parse_bins(requests.join("asthma_bins.json").to_str().unwrap()).unwrap();
    engine.validate_full_coverage("patient", &age).unwrap();
    engine.validate_full_coverage("patient", &asthma).unwrap();

    let result = engine
        .compute_cohort_association("patient", &cohort_id, age, asthma)
        .unwrap();
    assert_eq!(result.total, 30);
    assert_eq!(result.chi_squared_dof, 2);
    let row_sum: u64 = result.rows.iter().map(|row| row.frequency).sum();
    assert_eq!(row_sum, result.total);
}

#[test]
fn demo_features_are_all_backed_by_columns() {
    let engine = demo_engine();
    assert_eq!(engine.available_features("patient").unwrap().len(), 5);
}

#[test]
fn json_outcomes_match_cli_output() {
    let engine = demo_engine();
    let requests = demos().join("requests");
    let request: CohortRequest =
        parse_json_arg("cohort", requests.join("male_2010.json").to_str().unwrap()).unwrap();
    let (predicates, year) = request.into_parts(None);
    let outcome = engine.get_or_create("patient", year, &predicates).unwrap();
    insta::assert_json_snapshot!(outcome, @r#"
    {
      "status": "materialized",
      "cohort_id": "COHORT:1",
      "size": 30
    }
    "#);

    // Ten asthmatic males in 2010: at the floor, so nothing is disclosed.
    let asthmatic_males = [
        FeaturePredicate::new("Sex", Qualifier::equals("Male")),
        FeaturePredicate::new("AsthmaDx", Qualifier::equals(1)),
    ];
    let age = parse_bins(requests.join("age_bins.json").to_str().unwrap()).unwrap();
    let asthma = parse_bins(requests.join("asthma_bins.json").to_str().unwrap()).unwrap();
    let association = engine
        .compute_association("patient", &asthmatic_males, Some(2010), age, asthma)
        .unwrap();
    insta::assert_json_snapshot!(association, @r#"
    {
      "status": "suppressed"
    }
    "#);
}
