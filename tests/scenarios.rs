//! End-to-end library scenarios over in-memory tables.

use csv_reconcile::{
    AggregationMethod, AggregationSpec, Column, ColumnType, JoinMode, MergeSpec, ReconcileError,
    Table, Value,
    clean::{self, CleanOp, FillStrategy, Keep},
    harmonize, matching, merge,
    stats::TableStats,
};

fn ints(values: &[i64]) -> Vec<Option<Value>> {
    values.iter().map(|v| Some(Value::Integer(*v))).collect()
}

fn text(value: &str) -> Option<Value> {
    Some(Value::String(value.to_string()))
}

#[test]
fn string_and_integer_keys_match_after_normalization() {
    let main = Table::new(vec![
        Column::strings("id", &["1", "2"]),
        Column::strings("name", &["A", "B"]),
    ])
    .unwrap();
    let lookup = Table::new(vec![
        Column::from_values("id", ints(&[1, 1, 2])),
        Column::from_values("val", ints(&[10, 20, 5])),
    ])
    .unwrap();
    let specs = vec![AggregationSpec::new("val", AggregationMethod::Sum)];

    let aggregated = csv_reconcile::aggregate::aggregate(&lookup, "id", &specs).unwrap();
    assert_eq!(aggregated.column("id").unwrap().values(), &[text("1"), text("2")]);
    assert_eq!(
        aggregated.column("匹配_val").unwrap().values(),
        ints(&[30, 5]).as_slice()
    );

    let result = matching::match_tables(&main, "id", &lookup, "id", &specs).unwrap();
    assert_eq!(result.table.column_names(), vec!["id", "name", "匹配_val"]);
    assert_eq!(result.table.column("id").unwrap().values(), &[text("1"), text("2")]);
    assert_eq!(result.table.column("name").unwrap().values(), &[text("A"), text("B")]);
    assert_eq!(
        result.table.column("匹配_val").unwrap().values(),
        ints(&[30, 5]).as_slice()
    );
    assert_eq!(result.matched_row_count, 2);
    assert_eq!(result.total_row_count, 2);
    assert_eq!(result.match_rate(), 1.0);
}

#[test]
fn column_concat_with_unequal_row_counts_is_a_schema_mismatch() {
    let three = Table::new(vec![Column::strings("a", &["1", "2", "3"])]).unwrap();
    let two = Table::new(vec![Column::strings("b", &["1", "2"])]).unwrap();
    assert_eq!(
        merge::merge(&three, &two, &MergeSpec::ColumnConcat),
        Err(ReconcileError::SchemaMismatch { left: 3, right: 2 })
    );
}

#[test]
fn mean_fill_on_string_column_is_a_type_error() {
    let table = Table::new(vec![Column::strings("city", &["Oslo", "", "Rome"])]).unwrap();
    let err = clean::fill_missing(&table, "city", &FillStrategy::Mean).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::TypeError { ref column, column_type: ColumnType::String, .. } if column == "city"
    ));
}

#[test]
fn raw_text_tables_flow_through_inference_match_and_cleaning() {
    let orders = Table::new(vec![
        Column::strings("order", &["o1", "o2", "o3", "o3"]),
        Column::strings("sku", &[" A-1", "B-2", "C-3", "C-3"]),
        Column::strings("placed", &["2024-01-05", "01/06/2024", "", ""]),
    ])
    .unwrap();
    let prices = Table::new(vec![
        Column::strings("sku", &["A-1", "A-1", "B-2"]),
        Column::strings("price", &["1,000.50", "999.50", "n/a"]),
    ])
    .unwrap();

    let orders = harmonize::infer(&orders);
    let prices = harmonize::infer(&prices);
    assert_eq!(orders.column("placed").unwrap().column_type(), ColumnType::Date);
    assert_eq!(prices.column("price").unwrap().column_type(), ColumnType::Float);

    let specs = vec![
        AggregationSpec::new("price", AggregationMethod::Mean).with_output_name("avg_price"),
        AggregationSpec::new("price", AggregationMethod::Count).with_output_name("quotes"),
    ];
    let result = matching::match_tables(&orders, "sku", &prices, "sku", &specs).unwrap();
    assert_eq!(
        result.table.column("avg_price").unwrap().values(),
        &[Some(Value::Float(1000.0)), None, None, None]
    );
    // B-2 has a row but no price, so Count still reports it as matched.
    assert_eq!(
        result.table.column("quotes").unwrap().values(),
        &[Some(Value::Integer(2)), Some(Value::Integer(0)), None, None]
    );
    assert_eq!(result.matched_row_count, 2);

    let cleaned = clean::apply_all(
        &result.table,
        &[
            CleanOp::DropDuplicates { subset: None, keep: Keep::First },
            CleanOp::Fill {
                column: "quotes".into(),
                strategy: FillStrategy::Constant(Value::Integer(0)),
            },
            CleanOp::Rename { from: "order".into(), to: "order_id".into() },
        ],
    )
    .unwrap();
    assert_eq!(cleaned.row_count(), 3);
    assert_eq!(cleaned.column_names()[0], "order_id");
    assert_eq!(cleaned.column("quotes").unwrap().missing_count(), 0);

    let stats = TableStats::with_match(&result);
    assert_eq!(stats.duplicate_row_count, 1);
    assert_eq!(stats.match_rate, Some(0.5));
}

#[test]
fn key_merge_outer_then_row_append_keeps_every_key() {
    let left = Table::new(vec![
        Column::from_values("id", ints(&[1, 2])),
        Column::strings("v", &["a", "b"]),
    ])
    .unwrap();
    let right = Table::new(vec![
        Column::strings("id", &["2", "3"]),
        Column::strings("v", &["B", "C"]),
    ])
    .unwrap();
    let joined = merge::merge(&left, &right, &MergeSpec::on("id", JoinMode::Outer)).unwrap();
    assert_eq!(joined.column_names(), vec!["id", "v_left", "v_right"]);
    assert_eq!(
        joined.column("id").unwrap().values(),
        &[text("1"), text("2"), text("3")]
    );

    let appended = merge::merge(&joined, &right, &MergeSpec::RowAppend).unwrap();
    assert_eq!(appended.row_count(), 5);
    assert_eq!(appended.column_names(), vec!["id", "v_left", "v_right", "v"]);
}
