use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    aggregate::{AggregationMethod, AggregationSpec},
    clean::CleanOp,
    io_utils::parse_delimiter,
    merge::JoinMode,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Merge, match and clean tabular CSV data",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer column types and report how each column was read
    Probe(ProbeArgs),
    /// Preview the first few rows of a file in a formatted table
    Preview(PreviewArgs),
    /// Combine two files by rows, by columns, or on a key
    Merge(MergeArgs),
    /// Enrich a main file with aggregated values from a lookup file
    Match(MatchArgs),
    /// Apply an ordered list of cleaning steps
    Clean(CleanArgs),
    /// Summarize row, missing and duplicate counts
    Stats(StatsArgs),
    /// Execute a YAML recipe of merge, match and clean steps
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InputOptions {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct OutputOptions {
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter to use for output (defaults by output extension)
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input CSV file to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub input_options: InputOptions,
    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input CSV file to preview
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    /// CSV delimiter character
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum MergeMode {
    RowAppend,
    ColumnConcat,
    Key,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    #[value(alias = "full")]
    Outer,
}

impl From<JoinKind> for JoinMode {
    fn from(kind: JoinKind) -> Self {
        match kind {
            JoinKind::Inner => JoinMode::Inner,
            JoinKind::Left => JoinMode::Left,
            JoinKind::Right => JoinMode::Right,
            JoinKind::Outer => JoinMode::Outer,
        }
    }
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Left CSV input
    #[arg(long = "left")]
    pub left: PathBuf,
    /// Right CSV input
    #[arg(long = "right")]
    pub right: PathBuf,
    /// How the two tables are combined
    #[arg(long, value_enum, default_value = "key")]
    pub mode: MergeMode,
    /// Join type for key merges
    #[arg(long = "join", value_enum, default_value = "inner")]
    pub join: JoinKind,
    /// Key column in the left file (defaults to the first shared column)
    #[arg(long = "left-key")]
    pub left_key: Option<String>,
    /// Key column in the right file (defaults to --left-key)
    #[arg(long = "right-key")]
    pub right_key: Option<String>,
    /// Suffixes for colliding column names, as `LEFT,RIGHT`
    #[arg(long, value_parser = parse_suffixes)]
    pub suffixes: Option<(String, String)>,
    #[command(flatten)]
    pub input_options: InputOptions,
    #[command(flatten)]
    pub output: OutputOptions,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Main CSV input; every row is kept
    #[arg(long = "main")]
    pub main: PathBuf,
    /// Lookup CSV input supplying values
    #[arg(long = "lookup")]
    pub lookup: PathBuf,
    /// Key column in the main file
    #[arg(long = "main-key")]
    pub main_key: String,
    /// Key column in the lookup file (defaults to --main-key)
    #[arg(long = "lookup-key")]
    pub lookup_key: Option<String>,
    /// Field to bring over as `FIELD:METHOD[:OUTPUT]`
    /// (methods: first, sum, mean, max, min, count, concat_distinct, concat_unique)
    #[arg(long = "field", required = true, action = clap::ArgAction::Append, value_parser = parse_field)]
    pub fields: Vec<AggregationSpec>,
    /// Print the match statistics as JSON (instead of the CSV when -o is absent)
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub input_options: InputOptions,
    #[command(flatten)]
    pub output: OutputOptions,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Input CSV file to clean
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Cleaning step such as `dedup`, `sort:amount:desc` or `fill:price:mean`;
    /// repeat to chain steps in order
    #[arg(long = "step", required = true, action = clap::ArgAction::Append, value_parser = parse_step)]
    pub steps: Vec<CleanOp>,
    /// Keep every column as text instead of inferring types first
    #[arg(long = "no-infer")]
    pub no_infer: bool,
    #[command(flatten)]
    pub input_options: InputOptions,
    #[command(flatten)]
    pub output: OutputOptions,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Input CSV file to profile
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Also list per-column counts, ranges and means
    #[arg(long)]
    pub columns: bool,
    /// Emit the statistics as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub input_options: InputOptions,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML recipe describing inputs, steps and outputs
    #[arg(short = 'r', long = "recipe")]
    pub recipe: PathBuf,
}

/// Parses `FIELD:METHOD[:OUTPUT]`.
pub fn parse_field(value: &str) -> Result<AggregationSpec, String> {
    let parts = value.split(':').collect::<Vec<_>>();
    let parse_method = |raw: &str| raw.parse::<AggregationMethod>().map_err(|err| err.to_string());
    match parts.as_slice() {
        [field, method] if !field.trim().is_empty() => {
            Ok(AggregationSpec::new(field.trim(), parse_method(method)?))
        }
        [field, method, output] if !field.trim().is_empty() && !output.trim().is_empty() => Ok(
            AggregationSpec::new(field.trim(), parse_method(method)?).with_output_name(output.trim()),
        ),
        _ => Err(format!("Expected FIELD:METHOD[:OUTPUT], got '{value}'")),
    }
}

pub fn parse_step(value: &str) -> Result<CleanOp, String> {
    value.parse::<CleanOp>().map_err(|err| err.to_string())
}

pub fn parse_suffixes(value: &str) -> Result<(String, String), String> {
    match value.split_once(',') {
        Some((left, right)) if !left.is_empty() || !right.is_empty() => {
            Ok((left.to_string(), right.to_string()))
        }
        _ => Err("Suffixes must be given as LEFT,RIGHT".to_string()),
    }
}
