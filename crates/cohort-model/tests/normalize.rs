use cohort_model::{FeatureBins, FeaturePredicate, Qualifier, Value, normalize};
use proptest::prelude::*;

fn predicate_strategy() -> impl Strategy<Value = FeaturePredicate> {
    let name = prop::sample::select(vec!["AgeStudyStart", "Sex", "AvgDailyPm25Exposure", "Race"]);
    let qualifier = prop_oneof![
        (0i64..5).prop_map(|v| Qualifier::Eq {
            value: Value::Integer(v)
        }),
        (0i64..5).prop_map(|v| Qualifier::Ge {
            value: Value::Integer(v)
        }),
        (0i64..3, 3i64..6).prop_map(|(a, b)| Qualifier::between(a, b)),
        prop::collection::vec("[a-c]", 1..3).prop_map(|values| Qualifier::one_of(values)),
    ];
    let year = prop::option::of(2010i32..2013);
    (name, qualifier, year).prop_map(|(name, qualifier, year)| FeaturePredicate {
        feature_name: name.to_string(),
        qualifier,
        year,
    })
}

proptest! {
    #[test]
    fn normalization_ignores_submission_order(
        (predicates, shuffled) in prop::collection::vec(predicate_strategy(), 0..6)
            .prop_flat_map(|predicates| {
                let shuffled = Just(predicates.clone()).prop_shuffle();
                (Just(predicates), shuffled)
            })
    ) {
        let first = normalize(Some(2010), &predicates).unwrap();
        let second = normalize(Some(2010), &shuffled).unwrap();
        prop_assert_eq!(first.canonical(), second.canonical());
    }

    #[test]
    fn normalization_ignores_in_operand_order(
        (values, shuffled) in prop::collection::vec("[a-e]", 1..5)
            .prop_flat_map(|values| {
                let shuffled = Just(values.clone()).prop_shuffle();
                (Just(values), shuffled)
            }),
        others in prop::collection::vec(predicate_strategy(), 0..3),
    ) {
        let with = |values: Vec<String>| {
            let mut predicates = others.clone();
            predicates.push(FeaturePredicate::new("Race", Qualifier::one_of(values)));
            predicates
        };
        let first = normalize(Some(2010), &with(values)).unwrap();
        let second = normalize(Some(2010), &with(shuffled)).unwrap();
        prop_assert_eq!(first.canonical(), second.canonical());
    }

    #[test]
    fn normalization_is_idempotent(predicates in prop::collection::vec(predicate_strategy(), 0..6)) {
        let once = normalize(None, &predicates).unwrap();
        let twice = normalize(None, once.predicates()).unwrap();
        prop_assert_eq!(once.canonical(), twice.canonical());
    }
}

#[test]
fn canonical_form_is_stable() {
    let predicates = vec![
        FeaturePredicate::new("Sex", Qualifier::equals("Male")),
        FeaturePredicate::new("AgeStudyStart", Qualifier::equals("0-2")).with_year(2011),
        FeaturePredicate::new("AvgDailyPm25Exposure", Qualifier::between(1, 3)),
    ];
    let normalized = normalize(Some(2010), &predicates).unwrap();
    insta::assert_snapshot!(
        normalized.canonical(),
        @r#"[{"feature_name":"AgeStudyStart","qualifier":{"operator":"=","value":"0-2"},"year":2011},{"feature_name":"AvgDailyPm25Exposure","qualifier":{"operator":"between","value_a":1,"value_b":3},"year":2010},{"feature_name":"Sex","qualifier":{"operator":"=","value":"Male"},"year":2010}]"#
    );
}

#[test]
fn empty_definition_without_year_is_an_empty_list() {
    let normalized = normalize(None, &[]).unwrap();
    assert!(normalized.is_empty());
    assert_eq!(normalized.canonical(), "[]");
}

#[test]
fn feature_bins_parse_from_request_json() {
    let bins: FeatureBins = serde_json::from_str(
        r#"{"feature_name": "AgeStudyStart",
            "bins": [{"operator": "=", "value": "0-2"}, {"operator": "in", "values": ["3-17", "18-34"]}]}"#,
    )
    .unwrap();
    assert_eq!(bins.bins.len(), 2);
    assert_eq!(bins.year, None);
}
