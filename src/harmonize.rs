//! Semantic type inference for freshly loaded tables.
//!
//! Only String columns are candidates. Each one is tried as a date column
//! first and as a numeric column second:
//!
//! - **Date**: adopted when at least one non-missing value parses as a date.
//!   Values that do not parse become Missing.
//! - **Numeric**: adopted when more than half of the non-missing values parse
//!   as numbers. The column is Integer when every parsed value is integral,
//!   Float otherwise. Values that do not parse become Missing.
//!
//! Columns that are already typed, or entirely missing, pass through
//! untouched, which makes [`infer`] idempotent.

use log::debug;
use serde::Serialize;

use crate::{
    data::{Value, float_to_integer, parse_naive_date, parse_number},
    table::{Column, ColumnType, Table},
};

const NUMERIC_MAJORITY: f64 = 0.5;

/// How one column was retyped and how many of its cells were lost doing so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnCoercion {
    pub column: String,
    pub from: ColumnType,
    pub to: ColumnType,
    pub coerced_to_missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoercionReport {
    pub columns: Vec<ColumnCoercion>,
}

impl CoercionReport {
    pub fn coerced_to_missing(&self) -> usize {
        self.columns.iter().map(|c| c.coerced_to_missing).sum()
    }

    pub fn retyped(&self) -> impl Iterator<Item = &ColumnCoercion> {
        self.columns.iter().filter(|c| c.from != c.to)
    }
}

pub fn infer(table: &Table) -> Table {
    infer_with_report(table).0
}

pub fn infer_with_report(table: &Table) -> (Table, CoercionReport) {
    let mut report = CoercionReport::default();
    let columns = table
        .columns()
        .iter()
        .map(|column| {
            let (inferred, coercion) = infer_column(column);
            report.columns.push(coercion);
            inferred
        })
        .collect();
    (
        Table::from_parts_unchecked(columns, table.row_count()),
        report,
    )
}

pub fn infer_column(column: &Column) -> (Column, ColumnCoercion) {
    let unchanged = |column: &Column| {
        (
            column.clone(),
            ColumnCoercion {
                column: column.name().to_string(),
                from: column.column_type(),
                to: column.column_type(),
                coerced_to_missing: 0,
            },
        )
    };
    if column.column_type() != ColumnType::String {
        return unchanged(column);
    }
    let non_missing = column.len() - column.missing_count();
    if non_missing == 0 {
        return unchanged(column);
    }

    let dates = column
        .values()
        .iter()
        .map(|cell| match cell {
            Some(Value::String(raw)) => parse_naive_date(raw).map(Value::Date),
            _ => None,
        })
        .collect::<Vec<_>>();
    let parsed_dates = dates.iter().flatten().count();
    if parsed_dates > 0 {
        debug!(
            "Column '{}' adopted as date ({parsed_dates}/{non_missing} value(s) parsed)",
            column.name()
        );
        return retyped(column, ColumnType::Date, dates, non_missing - parsed_dates);
    }

    let numbers = column
        .values()
        .iter()
        .map(|cell| match cell {
            Some(Value::String(raw)) => parse_number(raw),
            _ => None,
        })
        .collect::<Vec<_>>();
    let parsed_numbers = numbers.iter().flatten().count();
    if parsed_numbers as f64 / non_missing as f64 > NUMERIC_MAJORITY {
        let integral = numbers.iter().flatten().all(|value| match value {
            Value::Integer(_) => true,
            Value::Float(f) => float_to_integer(*f).is_some(),
            _ => false,
        });
        let target = if integral {
            ColumnType::Integer
        } else {
            ColumnType::Float
        };
        debug!(
            "Column '{}' adopted as {target} ({parsed_numbers}/{non_missing} value(s) parsed)",
            column.name()
        );
        return retyped(column, target, numbers, non_missing - parsed_numbers);
    }

    unchanged(column)
}

fn retyped(
    column: &Column,
    target: ColumnType,
    values: Vec<Option<Value>>,
    coerced_to_missing: usize,
) -> (Column, ColumnCoercion) {
    (
        Column::with_type(column.name(), target, values),
        ColumnCoercion {
            column: column.name().to_string(),
            from: column.column_type(),
            to: target,
            coerced_to_missing,
        },
    )
}

/// Promotes String columns to Date when every non-missing value parses as a
/// date, so no cell is lost. Used after merges reassemble date columns.
pub fn upgrade_dates(table: &Table) -> Table {
    let columns = table
        .columns()
        .iter()
        .map(|column| {
            if column.column_type() != ColumnType::String {
                return column.clone();
            }
            let mut parsed = Vec::with_capacity(column.len());
            for cell in column.values() {
                match cell {
                    None => parsed.push(None),
                    Some(Value::String(raw)) => match parse_naive_date(raw) {
                        Some(date) => parsed.push(Some(Value::Date(date))),
                        None => return column.clone(),
                    },
                    Some(_) => return column.clone(),
                }
            }
            if parsed.iter().all(Option::is_none) {
                return column.clone();
            }
            debug!("Column '{}' upgraded to date after merge", column.name());
            Column::with_type(column.name(), ColumnType::Date, parsed)
        })
        .collect();
    Table::from_parts_unchecked(columns, table.row_count())
}
