//! Combining two tables by stacking rows, placing columns side by side, or
//! joining on a key column.
//!
//! Key joins compare keys in their trimmed string form so that `5`, `5.0`
//! and `" 5 "` meet each other regardless of how each side was typed. After
//! any merge, String columns whose every value is a date are promoted back to
//! Date.

use std::collections::{HashMap, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, normalize_key},
    error::ReconcileError,
    harmonize,
    table::{Column, Table},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinMode {
    fn keeps_unmatched_left(self) -> bool {
        matches!(self, JoinMode::Left | JoinMode::Outer)
    }

    fn keeps_unmatched_right(self) -> bool {
        matches!(self, JoinMode::Right | JoinMode::Outer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suffixes {
    pub left: String,
    pub right: String,
}

impl Default for Suffixes {
    fn default() -> Self {
        Self {
            left: "_left".to_string(),
            right: "_right".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MergeSpec {
    RowAppend,
    ColumnConcat,
    Key {
        #[serde(default)]
        left_key: Option<String>,
        #[serde(default)]
        right_key: Option<String>,
        #[serde(default)]
        join: JoinMode,
        #[serde(default)]
        suffixes: Suffixes,
    },
}

impl MergeSpec {
    /// Key join on a column name present in both tables.
    pub fn on(key: impl Into<String>, join: JoinMode) -> Self {
        let key = key.into();
        MergeSpec::Key {
            left_key: Some(key.clone()),
            right_key: Some(key),
            join,
            suffixes: Suffixes::default(),
        }
    }

    pub fn keys(left_key: impl Into<String>, right_key: impl Into<String>, join: JoinMode) -> Self {
        MergeSpec::Key {
            left_key: Some(left_key.into()),
            right_key: Some(right_key.into()),
            join,
            suffixes: Suffixes::default(),
        }
    }

    /// Key join on the first column name the two tables share.
    pub fn common_key(join: JoinMode) -> Self {
        MergeSpec::Key {
            left_key: None,
            right_key: None,
            join,
            suffixes: Suffixes::default(),
        }
    }
}

pub fn merge(left: &Table, right: &Table, spec: &MergeSpec) -> Result<Table, ReconcileError> {
    let merged = match spec {
        MergeSpec::RowAppend => append_rows(left, right),
        MergeSpec::ColumnConcat => concat_columns(left, right, &Suffixes::default())?,
        MergeSpec::Key {
            left_key,
            right_key,
            join,
            suffixes,
        } => {
            let (left_key, right_key) =
                resolve_keys(left, right, left_key.as_deref(), right_key.as_deref())?;
            join_on_key(left, right, &left_key, &right_key, *join, suffixes)?
        }
    };
    Ok(harmonize::upgrade_dates(&merged))
}

fn append_rows(left: &Table, right: &Table) -> Table {
    let mut names = left.column_names();
    names.extend(
        right
            .column_names()
            .into_iter()
            .filter(|name| !left.has_column(name)),
    );
    let row_count = left.row_count() + right.row_count();
    let columns = names
        .iter()
        .map(|name| {
            let mut values = Vec::with_capacity(row_count);
            for table in [left, right] {
                match table.column(name) {
                    Some(column) => values.extend_from_slice(column.values()),
                    None => values.resize(values.len() + table.row_count(), None),
                }
            }
            Column::from_values(name.clone(), values)
        })
        .collect();
    debug!(
        "Appended {} + {} row(s) across {} column(s)",
        left.row_count(),
        right.row_count(),
        names.len()
    );
    Table::from_parts_unchecked(columns, row_count)
}

fn concat_columns(left: &Table, right: &Table, suffixes: &Suffixes) -> Result<Table, ReconcileError> {
    if left.row_count() != right.row_count() {
        return Err(ReconcileError::SchemaMismatch {
            left: left.row_count(),
            right: right.row_count(),
        });
    }
    let mut seen: HashSet<String> = left.column_names().into_iter().collect();
    let mut columns = left.columns().to_vec();
    for column in right.columns() {
        let name = if seen.contains(column.name()) {
            unique_name(&format!("{}{}", column.name(), suffixes.right), &seen)
        } else {
            column.name().to_string()
        };
        seen.insert(name.clone());
        columns.push(column.renamed(name));
    }
    Ok(Table::from_parts_unchecked(columns, left.row_count()))
}

fn resolve_keys(
    left: &Table,
    right: &Table,
    left_key: Option<&str>,
    right_key: Option<&str>,
) -> Result<(String, String), ReconcileError> {
    let (left_key, right_key) = match (left_key, right_key) {
        (Some(l), Some(r)) => (l.to_string(), r.to_string()),
        (Some(key), None) | (None, Some(key)) => (key.to_string(), key.to_string()),
        (None, None) => {
            let common = left
                .columns()
                .iter()
                .map(Column::name)
                .find(|name| right.has_column(name))
                .ok_or(ReconcileError::NoCommonKey)?;
            debug!("No join key supplied; using shared column '{common}'");
            (common.to_string(), common.to_string())
        }
    };
    if !left.has_column(&left_key) {
        return Err(ReconcileError::key_not_found(&left_key, "left"));
    }
    if !right.has_column(&right_key) {
        return Err(ReconcileError::key_not_found(&right_key, "right"));
    }
    Ok((left_key, right_key))
}

fn normalized_keys(column: &Column) -> Vec<Option<String>> {
    column.values().iter().map(|v| normalize_key(v.as_ref())).collect()
}

fn build_lookup(keys: &[Option<String>]) -> HashMap<&str, Vec<usize>> {
    let mut map: HashMap<&str, Vec<usize>> = HashMap::new();
    for (row, key) in keys.iter().enumerate() {
        if let Some(key) = key {
            map.entry(key.as_str()).or_default().push(row);
        }
    }
    map
}

type RowPair = (Option<usize>, Option<usize>);

fn pair_rows(
    left_keys: &[Option<String>],
    right_keys: &[Option<String>],
    join: JoinMode,
) -> Vec<RowPair> {
    let mut pairs = Vec::new();
    if join == JoinMode::Right {
        let left_lookup = build_lookup(left_keys);
        for (r, key) in right_keys.iter().enumerate() {
            match key.as_deref().and_then(|k| left_lookup.get(k)) {
                Some(bucket) => pairs.extend(bucket.iter().map(|l| (Some(*l), Some(r)))),
                None => pairs.push((None, Some(r))),
            }
        }
        return pairs;
    }

    let right_lookup = build_lookup(right_keys);
    let mut right_matched = vec![false; right_keys.len()];
    for (l, key) in left_keys.iter().enumerate() {
        match key.as_deref().and_then(|k| right_lookup.get(k)) {
            Some(bucket) => {
                for r in bucket {
                    right_matched[*r] = true;
                    pairs.push((Some(l), Some(*r)));
                }
            }
            None if join.keeps_unmatched_left() => pairs.push((Some(l), None)),
            None => {}
        }
    }
    if join.keeps_unmatched_right() {
        pairs.extend(
            right_matched
                .iter()
                .enumerate()
                .filter(|(_, matched)| !**matched)
                .map(|(r, _)| (None, Some(r))),
        );
    }
    pairs
}

fn join_on_key(
    left: &Table,
    right: &Table,
    left_key: &str,
    right_key: &str,
    join: JoinMode,
    suffixes: &Suffixes,
) -> Result<Table, ReconcileError> {
    let shared_key = left_key == right_key;
    let left_keys = normalized_keys(left.require_column(left_key)?);
    let right_keys = normalized_keys(right.require_column(right_key)?);
    let pairs = pair_rows(&left_keys, &right_keys, join);

    let right_columns = right
        .columns()
        .iter()
        .filter(|column| !(shared_key && column.name() == right_key))
        .collect::<Vec<_>>();
    let right_names: HashSet<&str> = right_columns.iter().map(|c| c.name()).collect();
    let colliding: HashSet<String> = left
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .filter(|name| right_names.contains(name.as_str()))
        .collect();

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(left.column_count() + right_columns.len());

    for column in left.columns() {
        let name = output_name(column.name(), &suffixes.left, &colliding, &mut seen);
        if column.name() == left_key {
            let values = pairs
                .iter()
                .map(|(l, r)| {
                    let key = match (l, r) {
                        (Some(l), _) => left_keys[*l].clone(),
                        (None, Some(r)) if shared_key => right_keys[*r].clone(),
                        _ => None,
                    };
                    key.map(Value::String)
                })
                .collect();
            columns.push(Column::from_values(name, values));
        } else {
            columns.push(gather(column, name, pairs.iter().map(|(l, _)| *l)));
        }
    }

    for column in right_columns {
        let name = output_name(column.name(), &suffixes.right, &colliding, &mut seen);
        if column.name() == right_key {
            let values = pairs
                .iter()
                .map(|(_, r)| r.and_then(|r| right_keys[r].clone()).map(Value::String))
                .collect();
            columns.push(Column::from_values(name, values));
        } else {
            columns.push(gather(column, name, pairs.iter().map(|(_, r)| *r)));
        }
    }

    debug!(
        "Joined on '{left_key}' = '{right_key}' ({join:?}): {} output row(s)",
        pairs.len()
    );
    Ok(Table::from_parts_unchecked(columns, pairs.len()))
}

fn gather(column: &Column, name: String, rows: impl Iterator<Item = Option<usize>>) -> Column {
    let values = rows
        .map(|row| row.and_then(|idx| column.values()[idx].clone()))
        .collect();
    Column::with_type(name, column.column_type(), values)
}

fn output_name(
    name: &str,
    suffix: &str,
    colliding: &HashSet<String>,
    seen: &mut HashSet<String>,
) -> String {
    let candidate = if colliding.contains(name) {
        format!("{name}{suffix}")
    } else {
        name.to_string()
    };
    let unique = unique_name(&candidate, seen);
    seen.insert(unique.clone());
    unique
}

fn unique_name(candidate: &str, seen: &HashSet<String>) -> String {
    if !seen.contains(candidate) {
        return candidate.to_string();
    }
    let mut counter = 1usize;
    loop {
        let next = format!("{candidate}_{counter}");
        if !seen.contains(&next) {
            return next;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    fn table(columns: Vec<Column>) -> Table {
        Table::new(columns).unwrap()
    }

    fn ints(name: &str, values: &[i64]) -> Column {
        Column::from_values(name, values.iter().map(|v| Some(Value::Integer(*v))).collect())
    }

    fn display(column: &Column) -> Vec<String> {
        column
            .values()
            .iter()
            .map(|v| v.as_ref().map(Value::as_display).unwrap_or_default())
            .collect()
    }

    #[test]
    fn row_append_unions_columns_and_fills_missing() {
        let left = table(vec![ints("id", &[1, 2]), Column::strings("name", &["a", "b"])]);
        let right = table(vec![ints("id", &[3]), Column::strings("city", &["Oslo"])]);
        let merged = merge(&left, &right, &MergeSpec::RowAppend).unwrap();
        assert_eq!(merged.row_count(), 3);
        assert_eq!(merged.column_names(), vec!["id", "name", "city"]);
        assert_eq!(display(merged.column("city").unwrap()), vec!["", "", "Oslo"]);
        assert_eq!(merged.column("id").unwrap().column_type(), ColumnType::Integer);
    }

    #[test]
    fn column_concat_requires_equal_row_counts() {
        let left = table(vec![ints("a", &[1, 2, 3])]);
        let right = table(vec![ints("b", &[1, 2])]);
        assert_eq!(
            merge(&left, &right, &MergeSpec::ColumnConcat),
            Err(ReconcileError::SchemaMismatch { left: 3, right: 2 })
        );
    }

    #[test]
    fn column_concat_suffixes_duplicate_names() {
        let left = table(vec![ints("a", &[1])]);
        let right = table(vec![ints("a", &[2])]);
        let merged = merge(&left, &right, &MergeSpec::ColumnConcat).unwrap();
        assert_eq!(merged.column_names(), vec!["a", "a_right"]);
    }

    #[test]
    fn key_join_normalizes_mixed_key_types() {
        let left = table(vec![
            Column::strings("id", &["1", " 2", "3"]),
            Column::strings("name", &["a", "b", "c"]),
        ]);
        let right = table(vec![ints("id", &[2, 1]), ints("score", &[20, 10])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Inner)).unwrap();
        assert_eq!(merged.column_names(), vec!["id", "name", "score"]);
        assert_eq!(display(merged.column("id").unwrap()), vec!["1", "2"]);
        assert_eq!(display(merged.column("score").unwrap()), vec!["10", "20"]);
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let left = table(vec![ints("id", &[1, 9])]);
        let right = table(vec![ints("id", &[1]), Column::strings("tag", &["x"])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Left)).unwrap();
        assert_eq!(display(merged.column("tag").unwrap()), vec!["x", ""]);
    }

    #[test]
    fn right_join_follows_right_row_order() {
        let left = table(vec![ints("id", &[1, 2]), Column::strings("l", &["a", "b"])]);
        let right = table(vec![ints("id", &[2, 7]), Column::strings("r", &["x", "y"])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Right)).unwrap();
        assert_eq!(display(merged.column("id").unwrap()), vec!["2", "7"]);
        assert_eq!(display(merged.column("l").unwrap()), vec!["b", ""]);
    }

    #[test]
    fn outer_join_contains_every_key() {
        let left = table(vec![ints("id", &[1, 2])]);
        let right = table(vec![ints("id", &[2, 3]), ints("v", &[20, 30])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Outer)).unwrap();
        assert_eq!(display(merged.column("id").unwrap()), vec!["1", "2", "3"]);
        assert_eq!(display(merged.column("v").unwrap()), vec!["", "20", "30"]);
    }

    #[test]
    fn inner_join_multiplies_duplicate_keys() {
        let left = table(vec![ints("id", &[1, 1])]);
        let right = table(vec![ints("id", &[1, 1, 1])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Inner)).unwrap();
        assert_eq!(merged.row_count(), 6);
    }

    #[test]
    fn colliding_columns_receive_source_suffixes() {
        let left = table(vec![ints("id", &[1]), ints("amount", &[5])]);
        let right = table(vec![ints("id", &[1]), ints("amount", &[7])]);
        let merged = merge(&left, &right, &MergeSpec::on("id", JoinMode::Inner)).unwrap();
        assert_eq!(merged.column_names(), vec!["id", "amount_left", "amount_right"]);
    }

    #[test]
    fn differently_named_keys_are_both_kept() {
        let left = table(vec![ints("order_id", &[1, 2])]);
        let right = table(vec![ints("id", &[2]), Column::strings("s", &["ok"])]);
        let merged = merge(&left, &right, &MergeSpec::keys("order_id", "id", JoinMode::Left)).unwrap();
        assert_eq!(merged.column_names(), vec!["order_id", "id", "s"]);
        assert_eq!(display(merged.column("id").unwrap()), vec!["", "2"]);
    }

    #[test]
    fn missing_common_key_is_reported() {
        let left = table(vec![ints("a", &[1])]);
        let right = table(vec![ints("b", &[1])]);
        assert_eq!(
            merge(&left, &right, &MergeSpec::common_key(JoinMode::Inner)),
            Err(ReconcileError::NoCommonKey)
        );
        assert_eq!(
            merge(&left, &right, &MergeSpec::on("a", JoinMode::Inner)),
            Err(ReconcileError::KeyNotFound {
                column: "a".into(),
                table: "right".into()
            })
        );
    }

    #[test]
    fn date_keys_are_restored_after_join() {
        let left = table(vec![Column::strings("day", &["2024-01-01", "2024-01-02"])]);
        let right = table(vec![
            Column::strings("day", &["2024-01-02"]),
            ints("sales", &[3]),
        ]);
        let merged = merge(&left, &right, &MergeSpec::on("day", JoinMode::Left)).unwrap();
        assert_eq!(merged.column("day").unwrap().column_type(), ColumnType::Date);
    }
}
