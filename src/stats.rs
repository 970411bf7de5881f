use serde::Serialize;

use crate::{
    clean,
    data::Value,
    harmonize::CoercionReport,
    matching::MatchResult,
    table::{Column, ColumnType, Table},
};

/// Summary counts for a table, optionally carrying the outcome of a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub row_count: usize,
    pub column_count: usize,
    pub missing_count: usize,
    pub duplicate_row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_rate: Option<f64>,
    /// Non-missing source values that type inference turned into Missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coerced_to_missing: Option<usize>,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub column_type: ColumnType,
    pub count: usize,
    pub missing: usize,
    pub distinct: usize,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub mean: Option<f64>,
}

impl ColumnSummary {
    fn of(column: &Column) -> Self {
        let present = column.values().iter().flatten();
        let numbers = column
            .column_type()
            .is_numeric()
            .then(|| present.clone().filter_map(Value::as_f64).collect::<Vec<_>>())
            .unwrap_or_default();
        let ordered = matches!(
            column.column_type(),
            ColumnType::Integer | ColumnType::Float | ColumnType::Date
        );
        Self {
            name: column.name().to_string(),
            column_type: column.column_type(),
            count: column.len() - column.missing_count(),
            missing: column.missing_count(),
            distinct: column.distinct_count(),
            min: ordered.then(|| present.clone().min().cloned()).flatten(),
            max: ordered.then(|| present.clone().max().cloned()).flatten(),
            mean: (!numbers.is_empty())
                .then(|| numbers.iter().sum::<f64>() / numbers.len() as f64),
        }
    }

    fn render_row(&self) -> Vec<String> {
        let render = |value: &Option<Value>| value.as_ref().map(Value::as_display).unwrap_or_default();
        vec![
            self.name.clone(),
            self.column_type.to_string(),
            self.count.to_string(),
            self.missing.to_string(),
            self.distinct.to_string(),
            render(&self.min),
            render(&self.max),
            self.mean.map(|m| format!("{m:.4}")).unwrap_or_default(),
        ]
    }
}

impl TableStats {
    pub fn of(table: &Table) -> Self {
        Self {
            row_count: table.row_count(),
            column_count: table.column_count(),
            missing_count: table.missing_count(),
            duplicate_row_count: clean::duplicate_row_count(table),
            matched_row_count: None,
            match_rate: None,
            coerced_to_missing: None,
            columns: table.columns().iter().map(ColumnSummary::of).collect(),
        }
    }

    /// Stats of the enriched table with the match outcome attached.
    pub fn with_match(result: &MatchResult) -> Self {
        Self {
            matched_row_count: Some(result.matched_row_count),
            match_rate: Some(result.match_rate()),
            ..Self::of(&result.table)
        }
    }

    pub fn with_coercions(mut self, report: &CoercionReport) -> Self {
        self.coerced_to_missing = Some(report.coerced_to_missing());
        self
    }

    pub fn summary_headers() -> Vec<String> {
        vec!["metric".to_string(), "value".to_string()]
    }

    /// Two-column metric/value rows for terminal output.
    pub fn render_rows(&self) -> Vec<Vec<String>> {
        let mut rows = vec![
            vec!["rows".to_string(), self.row_count.to_string()],
            vec!["columns".to_string(), self.column_count.to_string()],
            vec!["missing".to_string(), self.missing_count.to_string()],
            vec!["duplicate_rows".to_string(), self.duplicate_row_count.to_string()],
        ];
        if let Some(matched) = self.matched_row_count {
            rows.push(vec!["matched_rows".to_string(), matched.to_string()]);
        }
        if let Some(rate) = self.match_rate {
            rows.push(vec!["match_rate".to_string(), format!("{:.2}%", rate * 100.0)]);
        }
        if let Some(coerced) = self.coerced_to_missing {
            rows.push(vec!["coerced_to_missing".to_string(), coerced.to_string()]);
        }
        rows
    }

    pub fn column_headers() -> Vec<String> {
        ["column", "type", "count", "missing", "distinct", "min", "max", "mean"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn render_column_rows(&self) -> Vec<Vec<String>> {
        self.columns.iter().map(ColumnSummary::render_row).collect()
    }
}
