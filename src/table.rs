//! In-memory table model shared by every engine stage.
//!
//! A [`Table`] is an ordered list of uniquely named [`Column`]s of equal
//! length. Each column carries a semantic [`ColumnType`] and every non-missing
//! cell in it holds a [`Value`] of that type. Tables are value snapshots:
//! operations take `&Table` and hand back a new one.

use std::{collections::HashSet, fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::{
    data::{ComparableValue, Value, coerce_value},
    error::ReconcileError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Date,
    Null,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Null => "null",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    /// Common type for two columns being stacked or filled together.
    pub fn unify(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Null, other) | (other, ColumnType::Null) => other,
            (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                ColumnType::Float
            }
            _ => ColumnType::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Ok(ColumnType::String),
            "integer" | "int" => Ok(ColumnType::Integer),
            "float" | "double" => Ok(ColumnType::Float),
            "date" => Ok(ColumnType::Date),
            "null" => Ok(ColumnType::Null),
            other => Err(anyhow!(
                "Unknown column type '{other}'. Supported types: string, integer, float, date, null"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    values: Vec<Option<Value>>,
}

impl Column {
    /// Builds a column and derives its type from the cells. Integer and
    /// Float cells unify to Float; any other mix is rendered as String.
    pub fn from_values(name: impl Into<String>, values: Vec<Option<Value>>) -> Self {
        let column_type = values
            .iter()
            .flatten()
            .map(Value::column_type)
            .fold(ColumnType::Null, ColumnType::unify);
        Self::with_type(name, column_type, values)
    }

    /// Builds a column of the given type, coercing every cell to it. Cells
    /// that cannot be represented become Missing.
    pub fn with_type(
        name: impl Into<String>,
        column_type: ColumnType,
        values: Vec<Option<Value>>,
    ) -> Self {
        let values = values
            .into_iter()
            .map(|cell| match cell {
                Some(value) if value.column_type() == column_type => Some(value),
                Some(value) => coerce_value(&value, &column_type),
                None => None,
            })
            .collect();
        Self {
            name: name.into(),
            column_type,
            values,
        }
    }

    pub fn strings(name: impl Into<String>, values: &[&str]) -> Self {
        let cells = values
            .iter()
            .map(|raw| {
                if raw.is_empty() {
                    None
                } else {
                    Some(Value::String((*raw).to_string()))
                }
            })
            .collect();
        Self::from_values(name, cells)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|cell| cell.is_none()).count()
    }

    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .flatten()
            .map(|value| ComparableValue(Some(value.clone())))
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: self.column_type,
            values: self.values.clone(),
        }
    }

    pub fn take(&self, rows: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            column_type: self.column_type,
            values: rows.iter().map(|idx| self.values[*idx].clone()).collect(),
        }
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        self.values
    }
}

/// Per-column report; derived on demand and never cached on the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnTypeInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub missing_count: usize,
    pub distinct_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, ReconcileError> {
        let row_count = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != row_count {
                return Err(ReconcileError::SchemaMismatch {
                    left: row_count,
                    right: column.len(),
                });
            }
            if !seen.insert(column.name.clone()) {
                return Err(ReconcileError::DuplicateColumnName(column.name.clone()));
            }
        }
        Ok(Self { columns, row_count })
    }

    /// Assembles a table from row-major cells. Column types are derived from
    /// the cells of each column.
    pub fn from_rows(
        headers: &[String],
        rows: Vec<Vec<Option<Value>>>,
    ) -> Result<Self, ReconcileError> {
        let mut buffers: Vec<Vec<Option<Value>>> = headers
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for row in rows {
            if row.len() != headers.len() {
                return Err(ReconcileError::SchemaMismatch {
                    left: headers.len(),
                    right: row.len(),
                });
            }
            for (buffer, cell) in buffers.iter_mut().zip(row) {
                buffer.push(cell);
            }
        }
        let columns = headers
            .iter()
            .zip(buffers)
            .map(|(name, values)| Column::from_values(name.clone(), values))
            .collect();
        Self::new(columns)
    }

    pub(crate) fn from_parts_unchecked(columns: Vec<Column>, row_count: usize) -> Self {
        Self { columns, row_count }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, ReconcileError> {
        self.column(name)
            .ok_or_else(|| ReconcileError::ColumnNotFound(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn row(&self, idx: usize) -> Vec<Option<Value>> {
        self.columns
            .iter()
            .map(|column| column.values[idx].clone())
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Option<Value>>> + '_ {
        (0..self.row_count).map(|idx| self.row(idx))
    }

    /// New table holding the given row positions, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        let columns = self.columns.iter().map(|c| c.take(rows)).collect();
        Table::from_parts_unchecked(columns, rows.len())
    }

    /// New table with `column` substituted for the existing column at `idx`.
    pub(crate) fn with_column_at(&self, idx: usize, column: Column) -> Table {
        let mut columns = self.columns.clone();
        columns[idx] = column;
        Table::from_parts_unchecked(columns, self.row_count)
    }

    pub fn missing_count(&self) -> usize {
        self.columns.iter().map(Column::missing_count).sum()
    }

    pub fn type_info(&self) -> Vec<ColumnTypeInfo> {
        self.columns
            .iter()
            .map(|column| ColumnTypeInfo {
                name: column.name.clone(),
                column_type: column.column_type,
                missing_count: column.missing_count(),
                distinct_count: column.distinct_count(),
            })
            .collect()
    }

    /// Display strings for the first `limit` rows; Missing renders empty.
    pub fn display_rows(&self, limit: usize) -> Vec<Vec<String>> {
        (0..self.row_count.min(limit))
            .map(|idx| {
                self.columns
                    .iter()
                    .map(|c| c.get(idx).map(Value::as_display).unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_values_unifies_integer_and_float() {
        let column = Column::from_values(
            "amount",
            vec![Some(Value::Integer(1)), None, Some(Value::Float(2.5))],
        );
        assert_eq!(column.column_type(), ColumnType::Float);
        assert_eq!(column.values()[0], Some(Value::Float(1.0)));
        assert_eq!(column.missing_count(), 1);
    }

    #[test]
    fn from_values_renders_mixed_cells_as_strings() {
        let column = Column::from_values(
            "code",
            vec![Some(Value::Integer(7)), Some(Value::String("x".into()))],
        );
        assert_eq!(column.column_type(), ColumnType::String);
        assert_eq!(column.values()[0], Some(Value::String("7".into())));
    }

    #[test]
    fn all_missing_column_is_null_typed() {
        let column = Column::from_values("empty", vec![None, None]);
        assert_eq!(column.column_type(), ColumnType::Null);
    }

    #[test]
    fn new_rejects_ragged_and_duplicate_columns() {
        let ragged = Table::new(vec![
            Column::strings("a", &["1", "2"]),
            Column::strings("b", &["1"]),
        ]);
        assert!(matches!(ragged, Err(ReconcileError::SchemaMismatch { .. })));

        let duplicate = Table::new(vec![
            Column::strings("a", &["1"]),
            Column::strings("a", &["2"]),
        ]);
        assert_eq!(
            duplicate,
            Err(ReconcileError::DuplicateColumnName("a".into()))
        );
    }

    #[test]
    fn type_info_reports_missing_and_distinct_counts() {
        let table = Table::new(vec![Column::strings("city", &["Oslo", "", "Oslo", "Rome"])])
            .unwrap();
        let info = table.type_info();
        assert_eq!(info[0].missing_count, 1);
        assert_eq!(info[0].distinct_count, 2);
        assert_eq!(info[0].column_type, ColumnType::String);
    }

    #[test]
    fn column_type_parses_from_tokens() {
        assert_eq!("INT".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert!("decimal".parse::<ColumnType>().is_err());
    }
}
