//! Property-based tests for parsing, paths, operators and history.
//!
//! These tests use proptest to verify properties hold across
//! many randomly generated inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use stepwise::core::{ErrorName, EventHistory, HistoryEventType, JsonPath, StateType};
use stepwise::definition::{parse, ComparisonOperator, Retrier};
use stepwise::eval::{compare, wildcard_match, StackValue};

prop_compose! {
    fn field_name()(name in "[a-z][a-z0-9_]{0,7}") -> String {
        name
    }
}

prop_compose! {
    fn pass_chain()(names in prop::collection::btree_set(field_name(), 1..6)) -> String {
        let names: Vec<String> = names.into_iter().collect();
        let mut states = serde_json::Map::new();
        for (i, name) in names.iter().enumerate() {
            let mut state = json!({"Type": "Pass", "Result": {"step": i}});
            match names.get(i + 1) {
                Some(next) => state["Next"] = json!(next),
                None => state["End"] = json!(true),
            }
            states.insert(name.clone(), state);
        }
        json!({"StartAt": names[0], "States": states}).to_string()
    }
}

fn leaf_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        (-1.0e9..1.0e9f64).prop_map(Value::from),
        "[a-zA-Z0-9 *:-]{0,12}".prop_map(Value::from),
        Just(json!("2024-03-01T12:00:00Z")),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    leaf_value().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn operator() -> impl Strategy<Value = ComparisonOperator> {
    (0..ComparisonOperator::ALL.len()).prop_map(|i| ComparisonOperator::ALL[i])
}

proptest! {
    #[test]
    fn parsing_is_deterministic(definition in pass_chain()) {
        let first = parse(&definition).unwrap();
        let second = parse(&definition).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn assign_then_select_returns_value(
        fields in prop::collection::vec(field_name(), 1..5),
        value in json_value(),
    ) {
        let raw = format!("$.{}", fields.join("."));
        let path = JsonPath::parse(&raw).unwrap();
        let mut document = json!({});
        path.assign(&mut document, value.clone()).unwrap();
        prop_assert_eq!(path.select(&document), Some(&value));
    }

    #[test]
    fn root_path_selects_whole_document(document in json_value()) {
        prop_assert_eq!(JsonPath::root().select(&document), Some(&document));
    }

    #[test]
    fn comparisons_are_total(
        op in operator(),
        subject in json_value(),
        operand in json_value(),
    ) {
        // Never panics, whatever the shapes involved.
        let _ = compare(op, &StackValue::Json(subject), Some(&operand));
        let _ = compare(op, &StackValue::Missing, Some(&operand));
        let _ = compare(op, &StackValue::Json(operand), None);
    }

    #[test]
    fn missing_variable_only_matches_is_present_false(op in operator(), operand in json_value()) {
        let verdict = compare(op, &StackValue::Missing, Some(&operand));
        let expected = op == ComparisonOperator::IsPresent && operand == json!(false);
        prop_assert_eq!(verdict, expected);
    }

    #[test]
    fn numeric_operators_reject_strings(text in "[0-9]{1,6}", n in any::<i32>()) {
        let subject = StackValue::Json(Value::from(text));
        for op in [
            ComparisonOperator::NumericEquals,
            ComparisonOperator::NumericLessThan,
            ComparisonOperator::NumericGreaterThanEquals,
        ] {
            prop_assert!(!compare(op, &subject, Some(&json!(n))));
        }
    }

    #[test]
    fn star_matches_everything(text in ".{0,20}") {
        prop_assert!(wildcard_match("*", &text));
    }

    #[test]
    fn plain_pattern_matches_only_itself(text in "[a-z]{0,10}", other in "[a-z]{0,10}") {
        prop_assert!(wildcard_match(&text, &text));
        prop_assert_eq!(wildcard_match(&text, &other), text == other);
    }

    #[test]
    fn retry_delays_never_shrink(
        interval in 0.0..10.0f64,
        backoff in 1.0..4.0f64,
        cap in prop::option::of(0.0..60.0f64),
    ) {
        let retrier = Retrier {
            error_equals: vec![ErrorName::All],
            interval_seconds: interval,
            max_attempts: 6,
            backoff_rate: backoff,
            max_delay_seconds: cap,
        };
        let delays: Vec<f64> = (1..=6).map(|k| retrier.delay_before(k).as_secs_f64()).collect();
        prop_assert_eq!(delays[0], 0.0);
        for pair in delays.windows(2).skip(1) {
            prop_assert!(pair[1] + 1e-9 >= pair[0]);
        }
        if let Some(cap) = cap {
            prop_assert!(delays.iter().all(|d| *d <= cap + 1e-9));
        }
    }

    #[test]
    fn history_path_follows_entered_states(
        names in prop::collection::vec(field_name(), 0..8)
    ) {
        let mut history = EventHistory::new();
        history.record(HistoryEventType::ExecutionStarted, json!({}));
        for name in &names {
            history.record(HistoryEventType::StateEntered(StateType::Pass), json!({"name": name}));
            history.record(HistoryEventType::StateExited(StateType::Pass), json!({"name": name}));
        }
        let path: Vec<String> = history.get_path().into_iter().map(str::to_string).collect();
        prop_assert_eq!(path, names);

        let ids: Vec<u64> = history.events().iter().map(|e| e.id).collect();
        prop_assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn sealed_history_rejects_appends(extra in 1..5usize) {
        let mut history = EventHistory::new();
        history.record(HistoryEventType::ExecutionStarted, json!({}));
        history.record(HistoryEventType::ExecutionAborted, json!({}));
        let sealed_len = history.events().len();
        for _ in 0..extra {
            let recorded = history.record(HistoryEventType::TaskScheduled, json!({}));
            prop_assert!(recorded.is_none());
        }
        prop_assert!(history.is_sealed());
        prop_assert_eq!(history.events().len(), sealed_len);
    }
}
