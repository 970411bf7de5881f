use std::collections::HashSet;

use proptest::prelude::*;

use csv_reconcile::{
    AggregationMethod, AggregationSpec, Column, JoinMode, MergeSpec, Table, Value,
    aggregate::aggregate,
    clean::{self, Keep},
    data::normalize_key,
    harmonize, matching, merge,
};

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-c]{1,2}",
        (0i64..50).prop_map(|n| n.to_string()),
        (0i64..50).prop_map(|n| format!("{n}.5")),
        (1u32..28).prop_map(|d| format!("2024-02-{d:02}")),
    ]
}

/// Raw text table with `columns` distinct column names drawn from a small
/// alphabet so that different tables share some names.
fn text_table(max_rows: usize) -> impl Strategy<Value = Table> {
    (
        proptest::sample::subsequence(vec!["k", "a", "b", "c", "d"], 1..=4),
        0..=max_rows,
    )
        .prop_flat_map(|(names, rows)| {
            proptest::collection::vec(proptest::collection::vec(cell(), rows), names.len()).prop_map(
                move |columns| {
                    let columns = names
                        .iter()
                        .zip(columns)
                        .map(|(name, values)| {
                            let refs = values.iter().map(String::as_str).collect::<Vec<_>>();
                            Column::strings(*name, &refs)
                        })
                        .collect();
                    Table::new(columns).expect("columns have equal length")
                },
            )
        })
}

fn keyed_table(max_rows: usize) -> impl Strategy<Value = Table> {
    proptest::collection::vec(
        (prop_oneof![Just(None), (0i64..8).prop_map(Some)], 0i64..100),
        0..=max_rows,
    )
    .prop_map(|rows| {
        let (keys, vals): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .map(|(k, v)| (k.map(Value::Integer), Some(Value::Integer(v))))
            .unzip();
        Table::new(vec![
            Column::from_values("k", keys),
            Column::from_values("v", vals),
        ])
        .expect("columns have equal length")
    })
}

fn key_set(table: &Table, name: &str) -> HashSet<String> {
    table
        .column(name)
        .map(|c| c.values().iter().filter_map(|v| normalize_key(v.as_ref())).collect())
        .unwrap_or_default()
}

proptest! {
    #[test]
    fn reset_row_order_keeps_shape(table in text_table(12)) {
        let reset = clean::reset_row_order(&table);
        prop_assert_eq!(reset.row_count(), table.row_count());
        prop_assert_eq!(reset.column_names(), table.column_names());
    }

    #[test]
    fn drop_duplicates_is_idempotent(table in text_table(12), last in any::<bool>()) {
        let keep = if last { Keep::Last } else { Keep::First };
        let once = clean::drop_duplicate_rows(&table, None, keep).unwrap();
        let twice = clean::drop_duplicate_rows(&once, None, keep).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn row_append_preserves_rows_and_unions_columns(a in text_table(8), b in text_table(8)) {
        let merged = merge::merge(&a, &b, &MergeSpec::RowAppend).unwrap();
        prop_assert_eq!(merged.row_count(), a.row_count() + b.row_count());
        let expected: HashSet<String> = a.column_names().into_iter().chain(b.column_names()).collect();
        let actual: HashSet<String> = merged.column_names().into_iter().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn outer_join_keeps_every_key(a in keyed_table(10), b in keyed_table(10)) {
        let merged = merge::merge(&a, &b, &MergeSpec::on("k", JoinMode::Outer)).unwrap();
        let keys = key_set(&merged, "k");
        prop_assert!(key_set(&a, "k").is_subset(&keys));
        prop_assert!(key_set(&b, "k").is_subset(&keys));
    }

    #[test]
    fn inner_join_rows_only_pair_equal_keys(a in keyed_table(10), b in keyed_table(10)) {
        let merged = merge::merge(&a, &b, &MergeSpec::on("k", JoinMode::Inner)).unwrap();
        let left = key_set(&a, "k");
        let right = key_set(&b, "k");
        let shared = left.intersection(&right).cloned().collect::<HashSet<_>>();
        prop_assert_eq!(key_set(&merged, "k"), shared);
        prop_assert_eq!(merged.column("k").unwrap().missing_count(), 0);
    }

    #[test]
    fn aggregation_yields_one_row_per_key(
        lookup in keyed_table(20),
        method in proptest::sample::select(vec![
            AggregationMethod::First,
            AggregationMethod::Sum,
            AggregationMethod::Mean,
            AggregationMethod::Max,
            AggregationMethod::Min,
            AggregationMethod::Count,
            AggregationMethod::ConcatDistinct,
            AggregationMethod::ConcatUnique,
        ]),
    ) {
        let specs = vec![AggregationSpec::new("v", method)];
        let aggregated = aggregate(&lookup, "k", &specs).unwrap();
        let keys = key_set(&lookup, "k");
        prop_assert_eq!(aggregated.row_count(), keys.len());
        prop_assert_eq!(key_set(&aggregated, "k"), keys);
    }

    #[test]
    fn match_rate_is_a_fraction_of_main_rows(main in keyed_table(12), lookup in keyed_table(12)) {
        let specs = vec![AggregationSpec::new("v", AggregationMethod::Sum).with_output_name("total")];
        let result = matching::match_tables(&main, "k", &lookup, "k", &specs).unwrap();
        let rate = result.match_rate();
        prop_assert!((0.0..=1.0).contains(&rate));
        prop_assert_eq!(result.table.row_count(), main.row_count());
        if result.total_row_count == 0 {
            prop_assert_eq!(rate, 0.0);
        } else {
            let expected = result.matched_row_count as f64 / result.total_row_count as f64;
            prop_assert!((rate - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn inference_is_idempotent(table in text_table(12)) {
        let once = harmonize::infer(&table);
        let twice = harmonize::infer(&once);
        prop_assert_eq!(once, twice);
    }
}
