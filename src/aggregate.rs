//! Collapses a lookup table to one row per distinct key.
//!
//! Rows are grouped on the key's trimmed string form; rows without a key are
//! skipped. Groups appear in the order their key is first seen. Each
//! [`AggregationSpec`] reduces one field of the group independently and
//! contributes exactly one output column named after its `output_name`.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, normalize_key},
    error::ReconcileError,
    table::{Column, ColumnType, Table},
};

pub const CONCAT_SEPARATOR: &str = ", ";
pub const DEFAULT_OUTPUT_PREFIX: &str = "匹配_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    First,
    Sum,
    Mean,
    Max,
    Min,
    Count,
    /// Every non-missing value in row order, duplicates kept.
    ConcatDistinct,
    /// Like `ConcatDistinct` but each value appears once, first-seen order.
    ConcatUnique,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::First => "first",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Mean => "mean",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::Count => "count",
            AggregationMethod::ConcatDistinct => "concat_distinct",
            AggregationMethod::ConcatUnique => "concat_unique",
        }
    }
}

impl std::str::FromStr for AggregationMethod {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first" => Ok(AggregationMethod::First),
            "sum" => Ok(AggregationMethod::Sum),
            "mean" | "avg" | "average" => Ok(AggregationMethod::Mean),
            "max" => Ok(AggregationMethod::Max),
            "min" => Ok(AggregationMethod::Min),
            "count" => Ok(AggregationMethod::Count),
            "concat_distinct" | "concat" | "join" => Ok(AggregationMethod::ConcatDistinct),
            "concat_unique" | "unique" => Ok(AggregationMethod::ConcatUnique),
            other => Err(anyhow::anyhow!(
                "Unknown aggregation method '{other}'. Supported methods: first, sum, mean, max, min, count, concat_distinct, concat_unique"
            )),
        }
    }
}

/// Methods accepted for a lookup field of the given type. Numeric
/// reductions need an Integer or Float column; an all-missing column is not
/// numeric.
pub fn methods_for(column_type: ColumnType) -> &'static [AggregationMethod] {
    use AggregationMethod::*;
    if column_type.is_numeric() {
        &[First, Sum, Mean, Max, Min, Count, ConcatDistinct, ConcatUnique]
    } else {
        &[First, Count, ConcatDistinct, ConcatUnique]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub field: String,
    pub method: AggregationMethod,
    pub output_name: String,
}

impl AggregationSpec {
    pub fn new(field: impl Into<String>, method: AggregationMethod) -> Self {
        let field = field.into();
        let output_name = format!("{DEFAULT_OUTPUT_PREFIX}{field}");
        Self {
            field,
            method,
            output_name,
        }
    }

    pub fn with_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.output_name = output_name.into();
        self
    }
}

pub(crate) fn validate_output_names(specs: &[AggregationSpec], key: &str) -> Result<(), ReconcileError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.output_name == key || !seen.insert(spec.output_name.as_str()) {
            return Err(ReconcileError::DuplicateFieldName(spec.output_name.clone()));
        }
    }
    Ok(())
}

/// Aggregates `lookup` by `key`. The result holds the key column (as
/// trimmed strings, under the same name) followed by one column per spec.
pub fn aggregate(
    lookup: &Table,
    key: &str,
    specs: &[AggregationSpec],
) -> Result<Table, ReconcileError> {
    let key_column = lookup
        .column(key)
        .ok_or_else(|| ReconcileError::key_not_found(key, "lookup"))?;
    validate_output_names(specs, key)?;
    let fields = specs
        .iter()
        .map(|spec| {
            let column = lookup.require_column(&spec.field)?;
            if !methods_for(column.column_type()).contains(&spec.method) {
                return Err(ReconcileError::type_error(
                    &spec.field,
                    spec.method.as_str(),
                    column.column_type(),
                ));
            }
            Ok(column)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut group_keys: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, cell) in key_column.values().iter().enumerate() {
        let Some(normalized) = normalize_key(cell.as_ref()) else {
            continue;
        };
        groups
            .entry(normalized.clone())
            .or_insert_with(|| {
                group_keys.push(normalized);
                Vec::new()
            })
            .push(row);
    }

    let mut columns = Vec::with_capacity(specs.len() + 1);
    columns.push(Column::from_values(
        key,
        group_keys.iter().cloned().map(|k| Some(Value::String(k))).collect(),
    ));
    for (spec, column) in specs.iter().zip(fields) {
        let values = group_keys
            .iter()
            .map(|k| reduce(column, &groups[k], spec.method))
            .collect();
        columns.push(Column::with_type(
            spec.output_name.clone(),
            output_type(column.column_type(), spec.method),
            values,
        ));
    }
    debug!(
        "Aggregated {} lookup row(s) into {} key group(s) on '{key}'",
        lookup.row_count(),
        group_keys.len()
    );
    Table::new(columns)
}

fn output_type(field_type: ColumnType, method: AggregationMethod) -> ColumnType {
    match method {
        AggregationMethod::First | AggregationMethod::Max | AggregationMethod::Min => field_type,
        AggregationMethod::Sum => match field_type {
            ColumnType::Integer => ColumnType::Integer,
            _ => ColumnType::Float,
        },
        AggregationMethod::Mean => ColumnType::Float,
        AggregationMethod::Count => ColumnType::Integer,
        AggregationMethod::ConcatDistinct | AggregationMethod::ConcatUnique => ColumnType::String,
    }
}

fn reduce(column: &Column, rows: &[usize], method: AggregationMethod) -> Option<Value> {
    let mut present = rows.iter().filter_map(|row| column.get(*row));
    match method {
        AggregationMethod::First => present.next().cloned(),
        AggregationMethod::Count => Some(Value::Integer(present.count() as i64)),
        AggregationMethod::Max => present.max().cloned(),
        AggregationMethod::Min => present.min().cloned(),
        AggregationMethod::Sum => sum(present, column.column_type()),
        AggregationMethod::Mean => {
            let numbers = present.filter_map(Value::as_f64).collect::<Vec<_>>();
            if numbers.is_empty() {
                None
            } else {
                Some(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
        }
        AggregationMethod::ConcatDistinct => {
            non_empty(present.map(Value::as_display).join(CONCAT_SEPARATOR))
        }
        AggregationMethod::ConcatUnique => {
            non_empty(present.map(Value::as_display).unique().join(CONCAT_SEPARATOR))
        }
    }
}

fn non_empty(joined: String) -> Option<Value> {
    (!joined.is_empty()).then_some(Value::String(joined))
}

/// Integer columns sum exactly; a total outside `i64` is Missing.
fn sum<'a>(values: impl Iterator<Item = &'a Value>, column_type: ColumnType) -> Option<Value> {
    if column_type == ColumnType::Integer {
        let total = values
            .filter_map(|value| match value {
                Value::Integer(i) => Some(i128::from(*i)),
                _ => None,
            })
            .sum::<i128>();
        return i64::try_from(total).ok().map(Value::Integer);
    }
    Some(Value::Float(values.filter_map(Value::as_f64).sum()))
}
