//! Independent table transforms that can be chained in any order.
//!
//! Each function takes a `&Table` and returns a new one. [`CleanOp`] is the
//! closed set of operations used by recipes and the `clean` command; it is
//! dispatched by [`CleanOp::apply`].

use std::{collections::BTreeSet, str::FromStr, sync::OnceLock};

use anyhow::{anyhow, bail};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    data::{ComparableValue, Value, coerce_value, float_to_integer, parse_number},
    error::ReconcileError,
    expr::RowPredicate,
    table::{Column, ColumnType, Table},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertTarget {
    /// Numeric when every non-missing value parses, otherwise unchanged.
    Auto,
    String,
    /// Integer when every parsed value is integral, Float otherwise.
    Numeric,
    Integer,
    Float,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Forward,
    Backward,
    Constant(Value),
    Mean,
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CleanOp {
    DropDuplicates {
        #[serde(default)]
        subset: Option<Vec<String>>,
        #[serde(default)]
        keep: Keep,
    },
    DropMissing {
        #[serde(default)]
        subset: Option<Vec<String>>,
    },
    ResetRowOrder,
    NormalizeColumnNames,
    Rename {
        from: String,
        to: String,
    },
    DropColumns {
        columns: Vec<String>,
    },
    SelectColumns {
        columns: Vec<String>,
    },
    MoveColumn {
        column: String,
        position: usize,
    },
    Sort {
        column: String,
        #[serde(default = "default_ascending")]
        ascending: bool,
    },
    Convert {
        column: String,
        target: ConvertTarget,
    },
    Fill {
        column: String,
        strategy: FillStrategy,
    },
    Filter {
        expression: String,
    },
}

fn default_ascending() -> bool {
    true
}

impl CleanOp {
    pub fn apply(&self, table: &Table) -> Result<Table, ReconcileError> {
        match self {
            CleanOp::DropDuplicates { subset, keep } => {
                drop_duplicate_rows(table, subset.as_deref(), *keep)
            }
            CleanOp::DropMissing { subset } => drop_missing(table, subset.as_deref()),
            CleanOp::ResetRowOrder => Ok(reset_row_order(table)),
            CleanOp::NormalizeColumnNames => normalize_column_names(table),
            CleanOp::Rename { from, to } => rename_column(table, from, to),
            CleanOp::DropColumns { columns } => drop_columns(table, columns),
            CleanOp::SelectColumns { columns } => select_columns(table, columns),
            CleanOp::MoveColumn { column, position } => move_column(table, column, *position),
            CleanOp::Sort { column, ascending } => sort_by(table, column, *ascending),
            CleanOp::Convert { column, target } => convert_column(table, column, *target),
            CleanOp::Fill { column, strategy } => fill_missing(table, column, strategy),
            CleanOp::Filter { expression } => filter_rows(table, expression),
        }
    }
}

pub fn apply_all(table: &Table, ops: &[CleanOp]) -> Result<Table, ReconcileError> {
    ops.iter().try_fold(table.clone(), |current, op| {
        let next = op.apply(&current)?;
        debug!(
            "{op:?}: {} -> {} row(s), {} column(s)",
            current.row_count(),
            next.row_count(),
            next.column_count()
        );
        Ok(next)
    })
}

fn subset_indices(table: &Table, subset: Option<&[String]>) -> Result<Vec<usize>, ReconcileError> {
    match subset {
        None => Ok((0..table.column_count()).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                table
                    .column_index(name)
                    .ok_or_else(|| ReconcileError::ColumnNotFound(name.clone()))
            })
            .collect(),
    }
}

fn row_signature(table: &Table, row: usize, columns: &[usize]) -> Vec<ComparableValue> {
    columns
        .iter()
        .map(|idx| ComparableValue(table.columns()[*idx].get(row).cloned()))
        .collect()
}

/// Removes rows whose values over `subset` (all columns by default) repeat
/// an earlier (`Keep::First`) or later (`Keep::Last`) row. Surviving rows
/// keep their relative order.
pub fn drop_duplicate_rows(
    table: &Table,
    subset: Option<&[String]>,
    keep: Keep,
) -> Result<Table, ReconcileError> {
    let columns = subset_indices(table, subset)?;
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(table.row_count());
    let order: Box<dyn Iterator<Item = usize>> = match keep {
        Keep::First => Box::new(0..table.row_count()),
        Keep::Last => Box::new((0..table.row_count()).rev()),
    };
    for row in order {
        if seen.insert(row_signature(table, row, &columns)) {
            kept.push(row);
        }
    }
    kept.sort_unstable();
    Ok(table.take_rows(&kept))
}

/// Number of rows that `drop_duplicate_rows(table, None, Keep::First)`
/// would remove.
pub fn duplicate_row_count(table: &Table) -> usize {
    let columns = (0..table.column_count()).collect::<Vec<_>>();
    let mut seen = BTreeSet::new();
    (0..table.row_count())
        .filter(|row| !seen.insert(row_signature(table, *row, &columns)))
        .count()
}

pub fn drop_missing(table: &Table, subset: Option<&[String]>) -> Result<Table, ReconcileError> {
    let columns = subset_indices(table, subset)?;
    let kept = (0..table.row_count())
        .filter(|row| {
            columns
                .iter()
                .all(|idx| table.columns()[*idx].get(*row).is_some())
        })
        .collect::<Vec<_>>();
    Ok(table.take_rows(&kept))
}

/// Tables carry no row labels, so positions are already contiguous; this
/// yields an identical snapshot.
pub fn reset_row_order(table: &Table) -> Table {
    table.clone()
}

fn whitespace() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s").expect("whitespace pattern is valid"))
}

/// Trims each column name and replaces inner whitespace with `_`.
pub fn normalize_column_names(table: &Table) -> Result<Table, ReconcileError> {
    let columns = table
        .columns()
        .iter()
        .map(|column| {
            let normalized = whitespace().replace_all(column.name().trim(), "_");
            column.renamed(normalized.into_owned())
        })
        .collect();
    Table::new(columns)
}

pub fn rename_column(table: &Table, old: &str, new: &str) -> Result<Table, ReconcileError> {
    let idx = table
        .column_index(old)
        .ok_or_else(|| ReconcileError::ColumnNotFound(old.to_string()))?;
    if old == new {
        return Ok(table.clone());
    }
    if table.has_column(new) {
        return Err(ReconcileError::DuplicateColumnName(new.to_string()));
    }
    Ok(table.with_column_at(idx, table.columns()[idx].renamed(new)))
}

pub fn drop_columns(table: &Table, names: &[String]) -> Result<Table, ReconcileError> {
    if let Some(missing) = names.iter().find(|name| !table.has_column(name)) {
        return Err(ReconcileError::ColumnNotFound(missing.clone()));
    }
    let columns = table
        .columns()
        .iter()
        .filter(|column| !names.iter().any(|name| name == column.name()))
        .cloned()
        .collect();
    Ok(Table::from_parts_unchecked(columns, table.row_count()))
}

/// Keeps only `names`, in the order given.
pub fn select_columns(table: &Table, names: &[String]) -> Result<Table, ReconcileError> {
    let columns = names
        .iter()
        .map(|name| table.require_column(name).cloned())
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Ok(Table::from_parts_unchecked(columns, table.row_count()));
    }
    Table::new(columns)
}

/// Moves `name` to `position`, clamped to the last slot.
pub fn move_column(table: &Table, name: &str, position: usize) -> Result<Table, ReconcileError> {
    let idx = table
        .column_index(name)
        .ok_or_else(|| ReconcileError::ColumnNotFound(name.to_string()))?;
    let mut columns = table.columns().to_vec();
    let column = columns.remove(idx);
    columns.insert(position.min(columns.len()), column);
    Ok(Table::from_parts_unchecked(columns, table.row_count()))
}

/// Stable sort on one column. Missing values always sort last.
pub fn sort_by(table: &Table, column: &str, ascending: bool) -> Result<Table, ReconcileError> {
    let column = table.require_column(column)?;
    let mut rows = (0..table.row_count()).collect::<Vec<_>>();
    rows.sort_by(|a, b| match (column.get(*a), column.get(*b)) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(x), Some(y)) if ascending => x.cmp(y),
        (Some(x), Some(y)) => y.cmp(x),
    });
    Ok(table.take_rows(&rows))
}

pub fn convert_column(
    table: &Table,
    column: &str,
    target: ConvertTarget,
) -> Result<Table, ReconcileError> {
    convert_column_with_report(table, column, target).map(|(table, _)| table)
}

/// Converts one column, returning the new table and the number of
/// non-missing cells that could not be converted and became Missing.
pub fn convert_column_with_report(
    table: &Table,
    column: &str,
    target: ConvertTarget,
) -> Result<(Table, usize), ReconcileError> {
    let idx = table
        .column_index(column)
        .ok_or_else(|| ReconcileError::ColumnNotFound(column.to_string()))?;
    let source = &table.columns()[idx];
    let before = source.len() - source.missing_count();
    let converted = match target {
        ConvertTarget::String => Column::with_type(column, ColumnType::String, source.values().to_vec()),
        ConvertTarget::Integer => Column::with_type(column, ColumnType::Integer, source.values().to_vec()),
        ConvertTarget::Float => Column::with_type(column, ColumnType::Float, source.values().to_vec()),
        ConvertTarget::Date => Column::with_type(column, ColumnType::Date, source.values().to_vec()),
        ConvertTarget::Numeric => to_numeric(source),
        ConvertTarget::Auto => {
            let numeric = to_numeric(source);
            if numeric.missing_count() == source.missing_count() && source.column_type() != ColumnType::Date {
                numeric
            } else {
                source.clone()
            }
        }
    };
    let lost = before - (converted.len() - converted.missing_count());
    debug!("Converted '{column}' to {target:?}; {lost} value(s) became missing");
    Ok((table.with_column_at(idx, converted), lost))
}

fn to_numeric(column: &Column) -> Column {
    if column.column_type().is_numeric() {
        return column.clone();
    }
    let parsed = column
        .values()
        .iter()
        .map(|cell| match cell {
            Some(Value::String(raw)) => parse_number(raw),
            _ => None,
        })
        .collect::<Vec<_>>();
    if parsed.iter().all(Option::is_none) {
        return Column::from_values(column.name(), parsed);
    }
    let integral = parsed.iter().flatten().all(|value| match value {
        Value::Integer(_) => true,
        Value::Float(f) => float_to_integer(*f).is_some(),
        _ => false,
    });
    let target = if integral {
        ColumnType::Integer
    } else {
        ColumnType::Float
    };
    Column::with_type(column.name(), target, parsed)
}

pub fn fill_missing(
    table: &Table,
    column: &str,
    strategy: &FillStrategy,
) -> Result<Table, ReconcileError> {
    let idx = table
        .column_index(column)
        .ok_or_else(|| ReconcileError::ColumnNotFound(column.to_string()))?;
    let source = &table.columns()[idx];
    let mut values = source.values().to_vec();
    match strategy {
        FillStrategy::Forward => {
            let mut last = None;
            for cell in values.iter_mut() {
                match cell {
                    Some(value) => last = Some(value.clone()),
                    None => *cell = last.clone(),
                }
            }
        }
        FillStrategy::Backward => {
            let mut next = None;
            for cell in values.iter_mut().rev() {
                match cell {
                    Some(value) => next = Some(value.clone()),
                    None => *cell = next.clone(),
                }
            }
        }
        FillStrategy::Constant(constant) => {
            let constant = match coerce_value(constant, &source.column_type()) {
                Some(fitted) if source.column_type() != ColumnType::Null => fitted,
                _ => constant.clone(),
            };
            for cell in values.iter_mut().filter(|cell| cell.is_none()) {
                *cell = Some(constant.clone());
            }
        }
        FillStrategy::Mean | FillStrategy::Median => {
            if !source.column_type().is_numeric() {
                let method = if matches!(strategy, FillStrategy::Mean) { "mean fill" } else { "median fill" };
                return Err(ReconcileError::type_error(column, method, source.column_type()));
            }
            let mut numbers = values.iter().flatten().filter_map(Value::as_f64).collect::<Vec<_>>();
            let fill = if matches!(strategy, FillStrategy::Mean) {
                mean(&numbers)
            } else {
                median(&mut numbers)
            };
            if let Some(fill) = fill {
                for cell in values.iter_mut().filter(|cell| cell.is_none()) {
                    *cell = Some(Value::Float(fill));
                }
            }
        }
    }
    Ok(table.with_column_at(idx, Column::from_values(column, values)))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len().is_multiple_of(2) {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

pub fn filter_rows(table: &Table, expression: &str) -> Result<Table, ReconcileError> {
    let predicate = RowPredicate::compile(expression, table)?;
    let mut kept = Vec::new();
    for row in 0..table.row_count() {
        if predicate.evaluate(&table.row(row), row + 1)? {
            kept.push(row);
        }
    }
    Ok(table.take_rows(&kept))
}

fn split_columns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn optional_subset(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(split_columns).filter(|columns| !columns.is_empty())
}

impl FromStr for ConvertTarget {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ConvertTarget::Auto),
            "string" | "text" => Ok(ConvertTarget::String),
            "numeric" | "number" => Ok(ConvertTarget::Numeric),
            "integer" | "int" => Ok(ConvertTarget::Integer),
            "float" => Ok(ConvertTarget::Float),
            "date" => Ok(ConvertTarget::Date),
            other => Err(anyhow!("Unknown conversion target '{other}'")),
        }
    }
}

/// Parses the compact step syntax used on the command line, for example
/// `sort:amount:desc`, `rename:old=new` or `fill:price:constant:0`.
impl FromStr for CleanOp {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, rest) = match value.split_once(':') {
            Some((name, rest)) => (name.trim(), Some(rest)),
            None => (value.trim(), None),
        };
        let op = match name.to_ascii_lowercase().as_str() {
            "dedup" | "drop-duplicates" => {
                let (keep, subset) = match rest.map(|r| r.split_once(':').unwrap_or((r, ""))) {
                    Some((keep, subset)) if keep.eq_ignore_ascii_case("last") => (Keep::Last, Some(subset)),
                    Some((keep, subset)) if keep.eq_ignore_ascii_case("first") => (Keep::First, Some(subset)),
                    Some((first, second)) if second.is_empty() => (Keep::First, Some(first)),
                    Some(_) => bail!("dedup expects 'dedup[:first|last][:columns]'"),
                    None => (Keep::First, None),
                };
                CleanOp::DropDuplicates {
                    subset: optional_subset(subset),
                    keep,
                }
            }
            "drop-missing" | "dropna" => CleanOp::DropMissing {
                subset: optional_subset(rest),
            },
            "reset" | "reset-row-order" => CleanOp::ResetRowOrder,
            "normalize-names" => CleanOp::NormalizeColumnNames,
            "rename" => {
                let (from, to) = rest
                    .and_then(|r| r.split_once('='))
                    .ok_or_else(|| anyhow!("rename expects 'rename:OLD=NEW'"))?;
                CleanOp::Rename {
                    from: from.trim().to_string(),
                    to: to.trim().to_string(),
                }
            }
            "drop" => CleanOp::DropColumns {
                columns: split_columns(rest.unwrap_or_default()),
            },
            "select" => CleanOp::SelectColumns {
                columns: split_columns(rest.unwrap_or_default()),
            },
            "move" => {
                let (column, position) = rest
                    .and_then(|r| r.rsplit_once('='))
                    .ok_or_else(|| anyhow!("move expects 'move:COLUMN=POSITION'"))?;
                CleanOp::MoveColumn {
                    column: column.trim().to_string(),
                    position: position.trim().parse()?,
                }
            }
            "sort" => {
                let rest = rest.ok_or_else(|| anyhow!("sort expects 'sort:COLUMN[:asc|desc]'"))?;
                let (column, ascending) = match rest.rsplit_once(':') {
                    Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => (column, false),
                    Some((column, dir)) if dir.eq_ignore_ascii_case("asc") => (column, true),
                    _ => (rest, true),
                };
                CleanOp::Sort {
                    column: column.trim().to_string(),
                    ascending,
                }
            }
            "convert" => {
                let (column, target) = rest
                    .and_then(|r| r.rsplit_once(':'))
                    .ok_or_else(|| anyhow!("convert expects 'convert:COLUMN:TYPE'"))?;
                CleanOp::Convert {
                    column: column.trim().to_string(),
                    target: target.parse()?,
                }
            }
            "fill" => {
                let rest = rest.ok_or_else(|| anyhow!("fill expects 'fill:COLUMN:STRATEGY[:VALUE]'"))?;
                let mut parts = rest.splitn(3, ':');
                let column = parts.next().unwrap_or_default().trim().to_string();
                let strategy = match parts.next().map(|s| s.trim().to_ascii_lowercase()) {
                    Some(s) if s == "forward" || s == "ffill" => FillStrategy::Forward,
                    Some(s) if s == "backward" || s == "bfill" => FillStrategy::Backward,
                    Some(s) if s == "mean" => FillStrategy::Mean,
                    Some(s) if s == "median" => FillStrategy::Median,
                    Some(s) if s == "constant" => {
                        let raw = parts
                            .next()
                            .ok_or_else(|| anyhow!("constant fill requires a value"))?;
                        FillStrategy::Constant(
                            parse_number(raw).unwrap_or_else(|| Value::String(raw.to_string())),
                        )
                    }
                    _ => bail!("Unknown fill strategy in '{value}'"),
                };
                CleanOp::Fill { column, strategy }
            }
            "filter" => CleanOp::Filter {
                expression: rest
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("filter expects 'filter:EXPRESSION'"))?,
            },
            other => bail!("Unknown cleaning step '{other}'"),
        };
        Ok(op)
    }
}
