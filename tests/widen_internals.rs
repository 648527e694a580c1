use proptest::prelude::*;
use serde_json::Value;
use vault_probe::widen::{ColumnState, SqlType, observe};

fn observe_all(values: &[Value]) -> ColumnState {
    let mut state = ColumnState::new("probe");
    for value in values {
        observe(&mut state, Some(value)).expect("scalar observation");
    }
    state
}

fn digit_strategy() -> impl Strategy<Value = char> {
    (0u8..=9).prop_map(|d| (b'0' + d) as char)
}

fn decimal_literal_strategy() -> impl Strategy<Value = Value> {
    (
        1u64..=999_999_999,
        proptest::collection::vec(digit_strategy(), 1..=6),
    )
        .prop_map(|(integer, fraction)| {
            let fraction: String = fraction.into_iter().collect();
            serde_json::from_str(&format!("{integer}.{fraction}")).expect("decimal literal")
        })
}

fn numeric_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        (0u16..=255).prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        decimal_literal_strategy(),
    ]
}

proptest! {
    #[test]
    fn numeric_widening_is_permutation_invariant(
        (original, shuffled) in proptest::collection::vec(numeric_value_strategy(), 1..8)
            .prop_flat_map(|values| (Just(values.clone()), Just(values).prop_shuffle()))
    ) {
        let forward = observe_all(&original);
        let reordered = observe_all(&shuffled);
        prop_assert_eq!(forward.column, reordered.column);
    }

    #[test]
    fn re_observing_the_same_values_changes_nothing(
        values in proptest::collection::vec(numeric_value_strategy(), 1..8)
    ) {
        let once = observe_all(&values);
        let doubled: Vec<Value> = values.iter().chain(values.iter()).cloned().collect();
        let twice = observe_all(&doubled);
        prop_assert_eq!(once.column, twice.column);
    }

    #[test]
    fn interleaved_nulls_only_affect_nullability(
        (values, mask) in proptest::collection::vec(numeric_value_strategy(), 1..6)
            .prop_flat_map(|values| {
                let len = values.len();
                (Just(values), proptest::collection::vec(any::<bool>(), len))
            })
    ) {
        let without_nulls = observe_all(&values);

        let mut with_nulls: Vec<Value> = Vec::new();
        for (value, insert_null) in values.iter().zip(&mask) {
            if *insert_null {
                with_nulls.push(Value::Null);
            }
            with_nulls.push(value.clone());
        }
        with_nulls.push(Value::Null);
        let nullable = observe_all(&with_nulls);

        prop_assert_eq!(nullable.column.sql_type, without_nulls.column.sql_type);
        prop_assert!(nullable.column.nullable);
    }

    #[test]
    fn varchar_length_is_the_longest_observed_word(
        words in proptest::collection::vec("[a-z]{1,12}", 1..8)
    ) {
        let values: Vec<Value> = words.iter().map(|w| Value::from(w.as_str())).collect();
        let state = observe_all(&values);
        let longest = words.iter().map(|w| w.len() as u32).max().unwrap();
        prop_assert_eq!(state.column.sql_type, SqlType::VarChar(longest));
    }
}
