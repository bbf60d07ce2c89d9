use std::sync::Arc;

use cohort_catalog::FeatureCatalog;
use cohort_core::{
    AssociationOutcome, CohortOutcome, CohortStore, CorrectionMethod, CoverageError, Engine,
    EngineError, EngineOptions, ErrorCategory, FeatureSelector, MemoryStore, StoreError,
};
use cohort_model::{CohortId, FeatureBins, FeaturePredicate, Qualifier, Value};
use cohort_query::{TableFrame, Warehouse};
use polars::prelude::*;

const CATALOG: &str = r#"
[tables.patient]
primary_key = "PatientId"
year_column = "year"

[[tables.patient.features]]
name = "AgeStudyStart"
kind = "string"
domain = ["0-2", "3-17"]
classification = "PhenotypicFeature"

[[tables.patient.features]]
name = "Sex"
kind = "string"
domain = ["Female", "Male"]
classification = "PhenotypicFeature"

[[tables.patient.features]]
name = "TotalEDVisits"
kind = "integer"
domain = [0, 1, 2, 3]
classification = "ActivityAndBehavior"

[[tables.patient.features]]
name = "AvgDailyPm25Exposure"
kind = "float"
classification = "ChemicalSubstance"
"#;

/// 24 patients in 2010: the first 12 aged 0-2, sex alternating.
fn patients() -> DataFrame {
    let ids: Vec<i64> = (1..=24).collect();
    let years = vec![2010i64; 24];
    let ages: Vec<&str> = (0..24).map(|i| if i < 12 { "0-2" } else { "3-17" }).collect();
    let sexes: Vec<&str> = (0..24)
        .map(|i| if i % 2 == 0 { "Female" } else { "Male" })
        .collect();
    let visits: Vec<i64> = (0..24).map(|i| i % 4).collect();
    let exposure: Vec<f64> = (0..24i32).map(|i| f64::from(i % 3) + 0.5).collect();
    df!(
        "PatientId" => ids,
        "year" => years,
        "AgeStudyStart" => ages,
        "Sex" => sexes,
        "TotalEDVisits" => visits,
        "AvgDailyPm25Exposure" => exposure,
    )
    .unwrap()
}

fn engine_with(data: DataFrame, options: EngineOptions) -> (Engine, Arc<MemoryStore>) {
    let catalog = Arc::new(FeatureCatalog::from_toml_str(CATALOG).unwrap());
    let warehouse = Arc::new(Warehouse::new().with_table(
        "patient",
        TableFrame::new(data, "PatientId").with_year_column("year"),
    ));
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(catalog, warehouse, store.clone(), options);
    (engine, store)
}

fn engine() -> Engine {
    engine_with(patients(), EngineOptions::default()).0
}

fn age(level: &str) -> FeaturePredicate {
    FeaturePredicate::new("AgeStudyStart", Qualifier::equals(level))
}

fn age_bins() -> FeatureBins {
    FeatureBins::new(
        "AgeStudyStart",
        vec![Qualifier::equals("0-2"), Qualifier::equals("3-17")],
    )
}

fn sex_bins() -> FeatureBins {
    FeatureBins::new(
        "Sex",
        vec![Qualifier::equals("Female"), Qualifier::equals("Male")],
    )
}

fn materialized(outcome: CohortOutcome) -> (CohortId, u64) {
    match outcome {
        CohortOutcome::Materialized { cohort_id, size } => (cohort_id, size),
        CohortOutcome::Suppressed => panic!("cohort unexpectedly suppressed"),
    }
}

#[test]
fn twelve_identical_rows_fill_one_cell() {
    let data = df!(
        "PatientId" => (1..=12).collect::<Vec<i64>>(),
        "year" => vec![2010i64; 12],
        "AgeStudyStart" => vec!["0-2"; 12],
        "Sex" => vec!["Male"; 12],
        "TotalEDVisits" => vec![0i64; 12],
        "AvgDailyPm25Exposure" => vec![1.0f64; 12],
    )
    .unwrap();
    let (engine, _) = engine_with(data, EngineOptions::default());
    let result = engine
        .compute_association("patient", &[], None, age_bins(), age_bins())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(result.feature_matrix[0][0].frequency, 12);
    assert_eq!(result.feature_matrix[0][1].frequency, 0);
    assert_eq!(result.feature_matrix[1][0].frequency, 0);
    assert_eq!(result.feature_matrix[1][1].frequency, 0);
    assert_eq!(result.total, 12);
    assert!(result.fisher_exact_p.is_none());
}

#[test]
fn small_tables_are_suppressed() {
    let data = df!(
        "PatientId" => (1..=10).collect::<Vec<i64>>(),
        "year" => vec![2010i64; 10],
        "AgeStudyStart" => vec!["0-2"; 10],
        "Sex" => vec!["Male"; 10],
        "TotalEDVisits" => vec![0i64; 10],
        "AvgDailyPm25Exposure" => vec![1.0f64; 10],
    )
    .unwrap();
    let (engine, store) = engine_with(data, EngineOptions::default());
    let outcome = engine.get_or_create("patient", Some(2010), &[]).unwrap();
    assert!(outcome.is_suppressed());
    assert!(store.cohorts(None).is_empty());
}

#[test]
fn get_or_create_is_idempotent() {
    let engine = engine();
    let predicates = [age("0-2")];
    let first = materialized(engine.get_or_create("patient", Some(2010), &predicates).unwrap());
    let second = materialized(engine.get_or_create("patient", Some(2010), &predicates).unwrap());
    assert_eq!(first, second);
    assert_eq!(first.1, 12);
    assert_eq!(engine.cohort_dictionary("patient").unwrap().len(), 1);

    let (stored, year) = engine.get_by_id(&first.0, "patient").unwrap();
    assert_eq!(year, Some(2010));
    assert_eq!(stored[0].year, Some(2010));
    let definition = engine.get_definition_by_id(&first.0).unwrap();
    assert_eq!(definition.size, 12);
}

#[test]
fn predicate_order_does_not_create_new_cohorts() {
    let engine = engine();
    let visits = FeaturePredicate::new(
        "TotalEDVisits",
        Qualifier::Ge {
            value: Value::Integer(0),
        },
    );
    let a = materialized(
        engine
            .get_or_create("patient", Some(2010), &[age("3-17"), visits.clone()])
            .unwrap(),
    );
    let b = materialized(
        engine
            .get_or_create("patient", Some(2010), &[visits, age("3-17")])
            .unwrap(),
    );
    assert_eq!(a.0, b.0);
}

#[test]
fn small_intersections_are_suppressed_without_persisting() {
    let engine = engine();
    let predicates = [
        age("0-2"),
        FeaturePredicate::new("Sex", Qualifier::equals("Male")),
    ];
    let outcome = engine.get_or_create("patient", Some(2010), &predicates).unwrap();
    assert_eq!(outcome, CohortOutcome::Suppressed);
    assert!(engine.cohort_dictionary("patient").unwrap().is_empty());
}

#[test]
fn small_ad_hoc_cohorts_get_no_association() {
    let (engine, store) = engine_with(patients(), EngineOptions::default());
    let young_males = [
        age("0-2"),
        FeaturePredicate::new("Sex", Qualifier::equals("Male")),
    ];
    let outcome = engine
        .compute_association("patient", &young_males, Some(2010), age_bins(), sex_bins())
        .unwrap();
    assert_eq!(outcome, AssociationOutcome::Suppressed);
    assert!(outcome.result().is_none());

    let checked = engine
        .compute_association_checked("patient", &young_males, Some(2010), age_bins(), sex_bins())
        .unwrap();
    assert!(checked.is_suppressed());
    assert_eq!(store.cache_sizes(), (0, 0));
    assert!(store.cohorts(None).is_empty());

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json, serde_json::json!({"status": "suppressed"}));
}

#[test]
fn suppressed_cohorts_cannot_be_counted() {
    let engine = engine();
    let young_males = [
        age("0-2"),
        FeaturePredicate::new("Sex", Qualifier::equals("Male")),
    ];
    let outcome = engine.get_or_create("patient", Some(2010), &young_males).unwrap();
    assert!(outcome.cohort_id().is_none());

    let guessed = CohortId::sequential(1);
    let err = engine
        .compute_feature_counts("patient", &guessed, sex_bins())
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownCohort(_)));
    let names = ["Sex", "AgeStudyStart", "TotalEDVisits"].map(String::from);
    let err = engine
        .compute_multivariate_table("patient", &guessed, &names)
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownCohort(_)));
}

#[test]
fn stored_cohorts_skip_the_size_query() {
    let engine = engine();
    materialized(engine.get_or_create("patient", Some(2010), &[age("0-2")]).unwrap());
    let before = engine.warehouse().executed_queries();
    let outcome = engine
        .compute_association("patient", &[age("0-2")], Some(2010), sex_bins(), age_bins())
        .unwrap();
    assert_eq!(outcome.result().map(|r| r.total), Some(12));
    assert_eq!(engine.warehouse().executed_queries() - before, 1);
}

#[test]
fn explicit_ids_alias_and_conflict() {
    let engine = engine();
    let id = CohortId::new("young");
    let created = materialized(
        engine
            .create_explicit("patient", Some(2010), &[age("0-2")], id.clone())
            .unwrap(),
    );
    assert_eq!(created.0, id);

    let again = materialized(
        engine
            .create_explicit("patient", Some(2010), &[age("0-2")], id.clone())
            .unwrap(),
    );
    assert_eq!(again, created);

    let err = engine
        .create_explicit("patient", Some(2010), &[age("3-17")], id)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::ConflictingDefinition(_))
    ));
    assert_eq!(err.category(), ErrorCategory::Persistence);

    let alias = materialized(
        engine
            .create_explicit("patient", Some(2010), &[age("0-2")], CohortId::new("infants"))
            .unwrap(),
    );
    assert_eq!(alias.1, created.1);
    assert_eq!(engine.cohort_dictionary("patient").unwrap().len(), 2);
}

#[test]
fn allocation_skips_explicitly_taken_ids() {
    let engine = engine();
    engine
        .create_explicit("patient", Some(2010), &[age("0-2")], CohortId::sequential(1))
        .unwrap();
    let (id, _) = materialized(
        engine
            .get_or_create("patient", Some(2010), &[age("3-17")])
            .unwrap(),
    );
    assert_eq!(id, CohortId::sequential(2));
}

#[test]
fn allocation_gives_up_after_configured_attempts() {
    let (engine, _) = engine_with(
        patients(),
        EngineOptions::default().with_id_allocation_attempts(1),
    );
    engine
        .create_explicit("patient", Some(2010), &[age("0-2")], CohortId::sequential(1))
        .unwrap();
    let err = engine
        .get_or_create("patient", Some(2010), &[age("3-17")])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::IdAllocationExhausted { attempts: 1 })
    ));
}

#[test]
fn cohort_lookup_checks_table() {
    let engine = engine();
    let (id, _) = materialized(engine.get_or_create("patient", Some(2010), &[]).unwrap());
    let err = engine.get_by_id(&id, "visit").unwrap_err();
    assert!(matches!(err, EngineError::CohortTableMismatch { .. }));
    let err = engine.get_by_id(&CohortId::new("missing"), "patient").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidReference);
}

#[test]
fn operand_kind_is_checked_before_querying() {
    let engine = engine();
    let bad = [FeaturePredicate::new("Sex", Qualifier::equals(1))];
    let err = engine.get_or_create("patient", None, &bad).unwrap_err();
    assert!(matches!(err, EngineError::OperandKind { .. }));
    assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    assert_eq!(engine.warehouse().executed_queries(), 0);

    let err = engine
        .compute_association(
            "patient",
            &[],
            None,
            FeatureBins::new("Sex", vec![]),
            age_bins(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyBins { .. }));
}

#[test]
fn association_is_cached() {
    let engine = engine();
    let first = engine
        .compute_association("patient", &[], Some(2010), age_bins(), sex_bins())
        .unwrap()
        .into_result()
        .unwrap();
    let executed = engine.warehouse().executed_queries();
    let second = engine
        .compute_association("patient", &[], Some(2010), age_bins(), sex_bins())
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(engine.warehouse().executed_queries(), executed);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    assert_eq!(first.total, 24);
    let cells: u64 = first.feature_matrix.iter().flatten().map(|c| c.frequency).sum();
    assert_eq!(cells, first.total);
    let rows: u64 = first.rows.iter().map(|m| m.frequency).sum();
    assert_eq!(rows, first.total);
    for row in &first.feature_matrix {
        let share: f64 = row.iter().map(|c| c.row_percentage).sum();
        assert!((share - 1.0).abs() < 1e-12);
    }
    assert_eq!(first.feature_a.year, Some(2010));
    assert!(first.fisher_exact_p.is_some());
}

#[test]
fn checked_association_rejects_partial_bins() {
    let engine = engine();
    let partial = FeatureBins::new("Sex", vec![Qualifier::equals("Male")]);
    let err = engine
        .compute_association_checked("patient", &[], None, age_bins(), partial)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Coverage(CoverageError::Incomplete { ref level, .. }) if level == "Female"
    ));

    let exposure = FeatureBins::new(
        "AvgDailyPm25Exposure",
        vec![Qualifier::Lt {
            value: Value::Real(1.0),
        }],
    );
    let err = engine.validate_full_coverage("patient", &exposure).unwrap_err();
    assert!(matches!(err, EngineError::Coverage(CoverageError::NoDomain { .. })));
}

#[test]
fn association_search_visits_each_pair_once() {
    let engine = engine();
    let (id, _) = materialized(engine.get_or_create("patient", Some(2010), &[]).unwrap());
    let results = engine
        .compute_all_associations(
            "patient",
            &id,
            &FeatureSelector::Any,
            1.0,
            &FeatureSelector::Any,
            None,
        )
        .unwrap();
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.chi_squared_p_corrected.is_none()));
}

#[test]
fn association_search_applies_correction() {
    let engine = engine();
    let (id, _) = materialized(engine.get_or_create("patient", Some(2010), &[]).unwrap());
    let results = engine
        .compute_all_associations(
            "patient",
            &id,
            &FeatureSelector::Single(age_bins()),
            1.0,
            &FeatureSelector::classes(["PhenotypicFeature", "ActivityAndBehavior"]),
            Some(CorrectionMethod::Bonferroni),
        )
        .unwrap();
    let names: Vec<&str> = results
        .iter()
        .map(|r| r.feature_b.feature_name.as_str())
        .collect();
    assert_eq!(names, vec!["Sex", "TotalEDVisits"]);
    for result in &results {
        let corrected = result.chi_squared_p_corrected.unwrap();
        assert!(corrected >= result.chi_squared_p);
    }

    let strict = engine
        .compute_all_associations(
            "patient",
            &id,
            &FeatureSelector::Single(age_bins()),
            0.0,
            &FeatureSelector::Any,
            Some(CorrectionMethod::FdrBh),
        )
        .unwrap();
    assert!(strict.is_empty());
}

#[test]
fn multivariate_frequencies_cover_the_cohort() {
    let engine = engine();
    let (id, size) = materialized(engine.get_or_create("patient", Some(2010), &[]).unwrap());
    let names = ["Sex", "AgeStudyStart", "TotalEDVisits"].map(String::from);
    let rows = engine
        .compute_multivariate_table("patient", &id, &names)
        .unwrap();
    assert_eq!(rows.len(), 2 * 2 * 4);
    assert_eq!(rows.iter().map(|r| r.frequency).sum::<u64>(), size);
    assert!(rows.iter().any(|r| r.frequency == 0));
    assert_eq!(rows[0].bins[0].feature_name, "Sex");

    let err = engine
        .compute_multivariate_table("patient", &id, &names[..2])
        .unwrap_err();
    assert!(matches!(err, EngineError::FeatureCount { found: 2 }));

    let repeated = ["Sex", "Sex", "TotalEDVisits"].map(String::from);
    let err = engine
        .compute_multivariate_table("patient", &id, &repeated)
        .unwrap_err();
    assert!(matches!(err, EngineError::RepeatedFeature { .. }));
}

#[test]
fn feature_counts_are_cached() {
    let engine = engine();
    let (id, _) = materialized(engine.get_or_create("patient", Some(2010), &[age("0-2")]).unwrap());
    let counts = engine
        .compute_feature_counts("patient", &id, sex_bins())
        .unwrap();
    assert_eq!(counts.total, 12);
    assert_eq!(counts.counts[0].frequency, 6);
    assert!((counts.counts[1].percentage - 0.5).abs() < 1e-12);

    let executed = engine.warehouse().executed_queries();
    engine
        .compute_feature_counts("patient", &id, sex_bins())
        .unwrap();
    assert_eq!(engine.warehouse().executed_queries(), executed);
}

#[test]
fn cohort_features_are_batched() {
    let (engine, _) = engine_with(
        patients(),
        EngineOptions::default().with_max_columns_per_query(2),
    );
    let (id, _) = materialized(engine.get_or_create("patient", Some(2010), &[]).unwrap());
    let before = engine.warehouse().executed_queries();
    let summaries = engine.cohort_features("patient", &id).unwrap();
    assert_eq!(summaries.len(), 4);
    // One distinct-value query for the undeclared domain, then two batches.
    assert_eq!(engine.warehouse().executed_queries() - before, 3);
    for summary in &summaries {
        assert_eq!(summary.counts.iter().map(|m| m.frequency).sum::<u64>(), 24);
    }

    // Everything is cached now, apart from the live domain lookup.
    let before = engine.warehouse().executed_queries();
    engine.cohort_features("patient", &id).unwrap();
    assert_eq!(engine.warehouse().executed_queries() - before, 1);
}

#[test]
fn features_without_columns_are_unavailable() {
    let data = patients().drop("AvgDailyPm25Exposure").unwrap();
    let (engine, _) = engine_with(data, EngineOptions::default());
    let err = engine
        .compute_association(
            "patient",
            &[],
            None,
            age_bins(),
            FeatureBins::new("AvgDailyPm25Exposure", vec![Qualifier::equals(1.5)]),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::UnavailableFeature { .. }));
    assert_eq!(engine.available_features("patient").unwrap().len(), 3);
}

#[test]
fn engine_is_shareable_across_threads() {
    let engine = Arc::new(engine());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine
                    .get_or_create("patient", Some(2010), &[age("0-2")])
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<CohortOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outcomes.iter().all(|o| !o.is_suppressed()));
    // Racing creators may each insert, but every insert got a distinct id.
    let ids: std::collections::BTreeSet<_> = engine
        .cohort_dictionary("patient")
        .unwrap()
        .into_iter()
        .map(|c| c.cohort_id)
        .collect();
    assert!(!ids.is_empty() && ids.len() <= 4);
}
