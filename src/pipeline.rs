//! YAML recipes: named input tables, an ordered list of merge, match and
//! clean steps, and the tables to write at the end.
//!
//! ```yaml
//! inputs:
//!   orders: { path: orders.csv }
//!   rates: { path: rates.tsv, encoding: windows-1252 }
//! steps:
//!   - kind: match
//!     main: orders
//!     lookup: rates
//!     main_key: sku
//!     lookup_key: sku
//!     fields:
//!       - { field: price, method: mean, output_name: avg_price }
//!     output: priced
//!   - kind: clean
//!     input: priced
//!     ops:
//!       - { op: sort, column: avg_price, ascending: false }
//! outputs:
//!   - { table: priced, path: priced.csv }
//! ```
//!
//! Relative paths resolve against the recipe file's directory.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{AggregationMethod, AggregationSpec},
    clean::{self, CleanOp},
    harmonize, io_utils,
    matching::{self, MatchSummary},
    merge::{self, MergeSpec},
    table::Table,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub inputs: BTreeMap<String, InputSource>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outputs: Vec<OutputTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSource {
    pub path: PathBuf,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    /// Infer column types after loading. Disable to keep every column as text.
    #[serde(default = "default_true")]
    pub infer_types: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputTarget {
    pub table: String,
    pub path: PathBuf,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: String,
    pub method: AggregationMethod,
    #[serde(default)]
    pub output_name: Option<String>,
}

impl From<&FieldSpec> for AggregationSpec {
    fn from(field: &FieldSpec) -> Self {
        let spec = AggregationSpec::new(field.field.clone(), field.method);
        match &field.output_name {
            Some(name) => spec.with_output_name(name.clone()),
            None => spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Merge {
        left: String,
        right: String,
        spec: MergeSpec,
        output: String,
    },
    Match {
        main: String,
        lookup: String,
        main_key: String,
        lookup_key: String,
        fields: Vec<FieldSpec>,
        /// Defaults to replacing `main`.
        #[serde(default)]
        output: Option<String>,
    },
    Clean {
        input: String,
        ops: Vec<CleanOp>,
        /// Defaults to replacing `input`.
        #[serde(default)]
        output: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

/// Tables produced by a recipe plus the summary of every match step.
#[derive(Debug, Clone, Default)]
pub struct RecipeRun {
    pub tables: BTreeMap<String, Table>,
    pub matches: Vec<(String, MatchSummary)>,
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Opening recipe {path:?}"))?;
        Self::from_yaml(&raw).with_context(|| format!("Parsing recipe {path:?}"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load_inputs(&self, base_dir: &Path) -> Result<BTreeMap<String, Table>> {
        let mut tables = BTreeMap::new();
        for (name, source) in &self.inputs {
            let path = resolve_path(base_dir, &source.path);
            let delimiter = source
                .delimiter
                .as_deref()
                .map(io_utils::parse_delimiter)
                .transpose()
                .map_err(|err| anyhow!("Input '{name}': {err}"))?;
            let encoding = io_utils::resolve_encoding(source.encoding.as_deref())?;
            let raw = io_utils::read_table(&path, delimiter, encoding)
                .with_context(|| format!("Loading input '{name}'"))?;
            let table = if source.infer_types {
                let (table, report) = harmonize::infer_with_report(&raw);
                if report.coerced_to_missing() > 0 {
                    warn!(
                        "Input '{name}': {} value(s) could not be converted and became missing",
                        report.coerced_to_missing()
                    );
                }
                table
            } else {
                raw
            };
            info!(
                "Loaded input '{name}' ({} row(s), {} column(s))",
                table.row_count(),
                table.column_count()
            );
            tables.insert(name.clone(), table);
        }
        Ok(tables)
    }

    /// Runs every step against `tables`, which must hold the named inputs.
    pub fn execute(&self, tables: BTreeMap<String, Table>) -> Result<RecipeRun> {
        let mut run = RecipeRun {
            tables,
            matches: Vec::new(),
        };
        for (idx, step) in self.steps.iter().enumerate() {
            let step_no = idx + 1;
            match step {
                Step::Merge {
                    left,
                    right,
                    spec,
                    output,
                } => {
                    let merged = merge::merge(
                        lookup(&run.tables, left, step_no)?,
                        lookup(&run.tables, right, step_no)?,
                        spec,
                    )
                    .with_context(|| format!("Step {step_no}: merging '{left}' and '{right}'"))?;
                    info!("Step {step_no}: merged into '{output}' ({} row(s))", merged.row_count());
                    run.tables.insert(output.clone(), merged);
                }
                Step::Match {
                    main,
                    lookup: lookup_name,
                    main_key,
                    lookup_key,
                    fields,
                    output,
                } => {
                    let specs = fields.iter().map(AggregationSpec::from).collect::<Vec<_>>();
                    let result = matching::match_tables(
                        lookup(&run.tables, main, step_no)?,
                        main_key,
                        lookup(&run.tables, lookup_name, step_no)?,
                        lookup_key,
                        &specs,
                    )
                    .with_context(|| format!("Step {step_no}: matching '{main}' against '{lookup_name}'"))?;
                    let target = output.clone().unwrap_or_else(|| main.clone());
                    info!(
                        "Step {step_no}: matched {}/{} row(s) ({:.2}%) into '{target}'",
                        result.matched_row_count,
                        result.total_row_count,
                        result.match_rate() * 100.0
                    );
                    run.matches.push((target.clone(), result.summary()));
                    run.tables.insert(target, result.table);
                }
                Step::Clean { input, ops, output } => {
                    let cleaned = clean::apply_all(lookup(&run.tables, input, step_no)?, ops)
                        .with_context(|| format!("Step {step_no}: cleaning '{input}'"))?;
                    let target = output.clone().unwrap_or_else(|| input.clone());
                    info!(
                        "Step {step_no}: applied {} operation(s) into '{target}' ({} row(s))",
                        ops.len(),
                        cleaned.row_count()
                    );
                    run.tables.insert(target, cleaned);
                }
            }
        }
        Ok(run)
    }

    pub fn write_outputs(&self, run: &RecipeRun, base_dir: &Path) -> Result<()> {
        for target in &self.outputs {
            let table = run
                .tables
                .get(&target.table)
                .ok_or_else(|| anyhow!("Output refers to unknown table '{}'", target.table))?;
            let path = resolve_path(base_dir, &target.path);
            let delimiter = target
                .delimiter
                .as_deref()
                .map(io_utils::parse_delimiter)
                .transpose()
                .map_err(|err| anyhow!("Output '{}': {err}", target.table))?;
            let encoding = io_utils::resolve_encoding(target.encoding.as_deref())?;
            io_utils::write_table(table, Some(&path), delimiter, encoding)
                .with_context(|| format!("Writing table '{}' to {path:?}", target.table))?;
            info!("Wrote '{}' ({} row(s)) to {path:?}", target.table, table.row_count());
        }
        Ok(())
    }
}

fn lookup<'a>(tables: &'a BTreeMap<String, Table>, name: &str, step: usize) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| anyhow!("Step {step} refers to unknown table '{name}'"))
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || io_utils::is_dash(path) {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Loads, runs and writes a recipe file.
pub fn run_recipe(path: &Path) -> Result<RecipeRun> {
    let recipe = Recipe::load(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tables = recipe.load_inputs(base_dir)?;
    let run = recipe.execute(tables)?;
    recipe.write_outputs(&run, base_dir)?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::Value, merge::JoinMode, table::Column};

    const RECIPE: &str = r#"
inputs:
  orders: { path: orders.csv }
  rates: { path: rates.csv, infer_types: false }
steps:
  - kind: match
    main: orders
    lookup: rates
    main_key: sku
    lookup_key: sku
    fields:
      - { field: price, method: first }
    output: priced
  - kind: clean
    input: priced
    ops:
      - { op: fill, column: "匹配_price", strategy: { constant: "n/a" } }
      - { op: sort, column: sku, ascending: false }
outputs:
  - { table: priced, path: out/priced.csv }
"#;

    fn tables() -> BTreeMap<String, Table> {
        let orders = Table::new(vec![Column::strings("sku", &["a", "b", "c"])]).unwrap();
        let rates = Table::new(vec![
            Column::strings("sku", &["a", "c", "c"]),
            Column::strings("price", &["1.5", "2", "3"]),
        ])
        .unwrap();
        BTreeMap::from([("orders".to_string(), orders), ("rates".to_string(), rates)])
    }

    #[test]
    fn recipe_parses_tagged_steps() {
        let recipe = Recipe::from_yaml(RECIPE).unwrap();
        assert_eq!(recipe.inputs.len(), 2);
        assert!(!recipe.inputs["rates"].infer_types);
        assert!(matches!(recipe.steps[0], Step::Match { .. }));
        assert_eq!(recipe.outputs[0].path, PathBuf::from("out/priced.csv"));
    }

    #[test]
    fn execute_chains_steps_and_records_match_summaries() {
        let recipe = Recipe::from_yaml(RECIPE).unwrap();
        let run = recipe.execute(tables()).unwrap();
        let priced = &run.tables["priced"];
        assert_eq!(
            priced.column("匹配_price").unwrap().values(),
            &[
                Some(Value::String("2".into())),
                Some(Value::String("n/a".into())),
                Some(Value::String("1.5".into())),
            ]
        );
        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.matches[0].1.matched_row_count, 2);
    }

    #[test]
    fn merge_step_accepts_tagged_spec() {
        let recipe = Recipe::from_yaml(
            r#"
inputs: {}
steps:
  - kind: merge
    left: orders
    right: rates
    spec: { mode: key, left_key: sku, join: outer }
    output: both
"#,
        )
        .unwrap();
        let Step::Merge { spec, .. } = &recipe.steps[0] else {
            panic!("expected merge step");
        };
        assert_eq!(
            spec,
            &MergeSpec::Key {
                left_key: Some("sku".into()),
                right_key: None,
                join: JoinMode::Outer,
                suffixes: Default::default(),
            }
        );
        let run = recipe.execute(tables()).unwrap();
        assert_eq!(run.tables["both"].row_count(), 4);
    }

    #[test]
    fn unknown_table_names_are_reported() {
        let recipe = Recipe::from_yaml(
            "inputs: {}\nsteps:\n  - { kind: clean, input: ghost, ops: [] }\n",
        )
        .unwrap();
        let err = recipe.execute(BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown table 'ghost'"));
    }

    #[test]
    fn unknown_recipe_fields_are_rejected() {
        assert!(Recipe::from_yaml("inputs: {}\nstepz: []\n").is_err());
    }
}
