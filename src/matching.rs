//! VLOOKUP-style enrichment of a main table from a lookup table.
//!
//! The lookup table is first collapsed to one row per key by
//! [`aggregate`](crate::aggregate::aggregate), then left-joined onto the
//! main table. Every main row is kept in its original order and the join
//! can never multiply rows.

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use crate::{
    aggregate::{self, AggregationSpec},
    data::{Value, normalize_key},
    error::ReconcileError,
    table::{Column, ColumnType, Table},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub table: Table,
    pub matched_row_count: usize,
    pub total_row_count: usize,
}

impl MatchResult {
    /// Share of main rows that received at least one value; 0 for an empty
    /// main table.
    pub fn match_rate(&self) -> f64 {
        if self.total_row_count == 0 {
            0.0
        } else {
            self.matched_row_count as f64 / self.total_row_count as f64
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            matched_row_count: self.matched_row_count,
            total_row_count: self.total_row_count,
            match_rate: self.match_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchSummary {
    pub matched_row_count: usize,
    pub total_row_count: usize,
    pub match_rate: f64,
}

pub fn match_tables(
    main: &Table,
    main_key: &str,
    lookup: &Table,
    lookup_key: &str,
    specs: &[AggregationSpec],
) -> Result<MatchResult, ReconcileError> {
    let main_key_idx = main
        .column_index(main_key)
        .ok_or_else(|| ReconcileError::key_not_found(main_key, "main"))?;
    let lookup_key_column = lookup
        .column(lookup_key)
        .ok_or_else(|| ReconcileError::key_not_found(lookup_key, "lookup"))?;
    aggregate::validate_output_names(specs, lookup_key)?;
    for spec in specs {
        if main.has_column(&spec.output_name) {
            return Err(ReconcileError::DuplicateColumnName(spec.output_name.clone()));
        }
    }

    let main_key_column = &main.columns()[main_key_idx];
    let main_keys = main_key_column
        .values()
        .iter()
        .map(|cell| normalize_key(cell.as_ref()))
        .collect::<Vec<_>>();
    let base = if main_key_column.column_type() != lookup_key_column.column_type() {
        debug!(
            "Key types differ ({} vs {}); normalizing '{main_key}' to text",
            main_key_column.column_type(),
            lookup_key_column.column_type()
        );
        let normalized = Column::with_type(
            main_key,
            ColumnType::String,
            main_keys.iter().map(|k| k.clone().map(Value::String)).collect(),
        );
        main.with_column_at(main_key_idx, normalized)
    } else {
        main.clone()
    };

    let aggregated = aggregate::aggregate(lookup, lookup_key, specs)?;
    let positions: HashMap<&str, usize> = aggregated
        .columns()
        .first()
        .map(|key_column| {
            key_column
                .values()
                .iter()
                .enumerate()
                .filter_map(|(row, cell)| match cell {
                    Some(Value::String(key)) => Some((key.as_str(), row)),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let matches = main_keys
        .iter()
        .map(|key| key.as_deref().and_then(|k| positions.get(k).copied()))
        .collect::<Vec<_>>();

    let mut columns = base.into_columns();
    let mut joined = Vec::with_capacity(specs.len());
    for spec in specs {
        let source = aggregated.require_column(&spec.output_name)?;
        let values = matches
            .iter()
            .map(|row| row.and_then(|r| source.values()[r].clone()))
            .collect();
        joined.push(Column::with_type(
            spec.output_name.clone(),
            source.column_type(),
            values,
        ));
    }
    let matched_row_count = (0..main.row_count())
        .filter(|row| joined.iter().any(|column| column.get(*row).is_some()))
        .count();
    columns.extend(joined);

    let table = Table::new(columns)?;
    debug!(
        "Matched {matched_row_count} of {} row(s) on '{main_key}' = '{lookup_key}'",
        main.row_count()
    );
    Ok(MatchResult {
        table,
        matched_row_count,
        total_row_count: main.row_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationMethod;

    fn main_table() -> Table {
        Table::new(vec![
            Column::strings("id", &["1", "2", "3"]),
            Column::strings("name", &["A", "B", "C"]),
        ])
        .unwrap()
    }

    fn lookup_table() -> Table {
        let ints = |values: &[i64]| values.iter().map(|v| Some(Value::Integer(*v))).collect();
        Table::new(vec![
            Column::from_values("id", ints(&[1, 1, 2])),
            Column::from_values("val", ints(&[10, 20, 5])),
        ])
        .unwrap()
    }

    #[test]
    fn match_preserves_main_rows_and_reports_rate() {
        let specs = vec![AggregationSpec::new("val", AggregationMethod::Sum)];
        let result = match_tables(&main_table(), "id", &lookup_table(), "id", &specs).unwrap();
        assert_eq!(result.table.row_count(), 3);
        assert_eq!(result.table.column_names(), vec!["id", "name", "匹配_val"]);
        assert_eq!(
            result.table.column("匹配_val").unwrap().values(),
            &[Some(Value::Integer(30)), Some(Value::Integer(5)), None]
        );
        assert_eq!(result.matched_row_count, 2);
        assert!((result.match_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_key_types_normalize_the_main_key() {
        let main = Table::new(vec![Column::from_values(
            "code",
            vec![Some(Value::Float(1.0)), Some(Value::Float(2.5))],
        )])
        .unwrap();
        let lookup = Table::new(vec![
            Column::strings("code", &["1", "2.5"]),
            Column::strings("label", &["one", "two and a half"]),
        ])
        .unwrap();
        let specs = vec![AggregationSpec::new("label", AggregationMethod::First)];
        let result = match_tables(&main, "code", &lookup, "code", &specs).unwrap();
        let key = result.table.column("code").unwrap();
        assert_eq!(key.column_type(), ColumnType::String);
        assert_eq!(result.matched_row_count, 2);
    }

    #[test]
    fn empty_main_table_has_zero_rate() {
        let main = Table::new(vec![Column::strings("id", &[])]).unwrap();
        let specs = vec![AggregationSpec::new("val", AggregationMethod::Sum)];
        let result = match_tables(&main, "id", &lookup_table(), "id", &specs).unwrap();
        assert_eq!(result.total_row_count, 0);
        assert_eq!(result.match_rate(), 0.0);
    }

    #[test]
    fn unknown_keys_are_reported_with_their_table() {
        let err = match_tables(&main_table(), "missing", &lookup_table(), "id", &[]).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::KeyNotFound {
                column: "missing".into(),
                table: "main".into()
            }
        );
        let err = match_tables(&main_table(), "id", &lookup_table(), "nope", &[]).unwrap_err();
        assert!(matches!(err, ReconcileError::KeyNotFound { table, .. } if table == "lookup"));
    }

    #[test]
    fn duplicate_output_names_fail_before_joining() {
        let specs = vec![
            AggregationSpec::new("val", AggregationMethod::Sum).with_output_name("x"),
            AggregationSpec::new("val", AggregationMethod::Count).with_output_name("x"),
        ];
        let err = match_tables(&main_table(), "id", &lookup_table(), "id", &specs).unwrap_err();
        assert_eq!(err, ReconcileError::DuplicateFieldName("x".into()));
    }

    #[test]
    fn output_name_clashing_with_main_column_is_rejected() {
        let specs = vec![AggregationSpec::new("val", AggregationMethod::Sum).with_output_name("name")];
        let err = match_tables(&main_table(), "id", &lookup_table(), "id", &specs).unwrap_err();
        assert_eq!(err, ReconcileError::DuplicateColumnName("name".into()));
    }
}
