use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::{CleanArgs, InputOptions, MatchArgs, MergeArgs, MergeMode, OutputOptions, ProbeArgs, RunArgs, StatsArgs},
    clean, harmonize, io_utils,
    matching,
    merge::{self, MergeSpec, Suffixes},
    pipeline,
    preview,
    stats::TableStats,
    table::Table,
};

fn load(path: &std::path::Path, options: &InputOptions) -> Result<Table> {
    load_with_report(path, options).map(|(table, _)| table)
}

fn load_with_report(
    path: &std::path::Path,
    options: &InputOptions,
) -> Result<(Table, harmonize::CoercionReport)> {
    let encoding = io_utils::resolve_encoding(options.input_encoding.as_deref())?;
    let raw = io_utils::read_table(path, options.delimiter, encoding)?;
    let (table, report) = harmonize::infer_with_report(&raw);
    for coercion in report.retyped() {
        if coercion.coerced_to_missing > 0 {
            warn!(
                "{path:?}: {} value(s) in '{}' could not be read as {} and became missing",
                coercion.coerced_to_missing, coercion.column, coercion.to
            );
        }
    }
    Ok((table, report))
}

fn save(table: &Table, options: &OutputOptions) -> Result<()> {
    let encoding = io_utils::resolve_encoding(options.output_encoding.as_deref())?;
    io_utils::write_table(
        table,
        options.output.as_deref(),
        options.output_delimiter,
        encoding,
    )
}

pub fn probe(args: &ProbeArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_options.input_encoding.as_deref())?;
    let raw = io_utils::read_table(&args.input, args.input_options.delimiter, encoding)?;
    let (table, report) = harmonize::infer_with_report(&raw);
    if args.json {
        let payload = serde_json::json!({
            "rows": table.row_count(),
            "columns": table.type_info(),
            "coercions": report.columns,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        let headers = ["column", "type", "missing", "distinct", "coerced_to_missing"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let rows = table
            .type_info()
            .into_iter()
            .zip(&report.columns)
            .map(|(info, coercion)| {
                vec![
                    info.name,
                    info.column_type.to_string(),
                    info.missing_count.to_string(),
                    info.distinct_count.to_string(),
                    coercion.coerced_to_missing.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        preview::print_table(&headers, &rows);
    }
    info!(
        "Probed {:?}: {} row(s), {} column(s), {} value(s) coerced to missing",
        args.input,
        table.row_count(),
        table.column_count(),
        report.coerced_to_missing()
    );
    Ok(())
}

pub fn merge(args: &MergeArgs) -> Result<()> {
    let left = load(&args.left, &args.input_options)
        .with_context(|| format!("Loading left input {:?}", args.left))?;
    let right = load(&args.right, &args.input_options)
        .with_context(|| format!("Loading right input {:?}", args.right))?;
    let spec = match args.mode {
        MergeMode::RowAppend => MergeSpec::RowAppend,
        MergeMode::ColumnConcat => MergeSpec::ColumnConcat,
        MergeMode::Key => MergeSpec::Key {
            left_key: args.left_key.clone(),
            right_key: args.right_key.clone(),
            join: args.join.into(),
            suffixes: args
                .suffixes
                .clone()
                .map(|(left, right)| Suffixes { left, right })
                .unwrap_or_default(),
        },
    };
    let merged = merge::merge(&left, &right, &spec)?;
    save(&merged, &args.output)?;
    info!(
        "Merged {} and {} row(s) into {} row(s) x {} column(s)",
        left.row_count(),
        right.row_count(),
        merged.row_count(),
        merged.column_count()
    );
    Ok(())
}

pub fn match_files(args: &MatchArgs) -> Result<()> {
    let main = load(&args.main, &args.input_options)
        .with_context(|| format!("Loading main input {:?}", args.main))?;
    let lookup = load(&args.lookup, &args.input_options)
        .with_context(|| format!("Loading lookup input {:?}", args.lookup))?;
    let lookup_key = args.lookup_key.as_deref().unwrap_or(&args.main_key);
    let result = matching::match_tables(&main, &args.main_key, &lookup, lookup_key, &args.fields)?;

    let summary = result.summary();
    match (&args.output.output, args.json) {
        // Without -o the enriched CSV owns stdout unless JSON was requested.
        (None, false) => save(&result.table, &args.output)?,
        (None, true) => println!("{}", serde_json::to_string_pretty(&summary)?),
        (Some(_), json) => {
            save(&result.table, &args.output)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let stats = TableStats::with_match(&result);
                preview::print_table(&TableStats::summary_headers(), &stats.render_rows());
            }
        }
    }
    info!(
        "Matched {}/{} row(s) ({:.2}%) on '{}' = '{lookup_key}'",
        summary.matched_row_count,
        summary.total_row_count,
        summary.match_rate * 100.0,
        args.main_key
    );
    Ok(())
}

pub fn clean(args: &CleanArgs) -> Result<()> {
    let table = if args.no_infer {
        let encoding = io_utils::resolve_encoding(args.input_options.input_encoding.as_deref())?;
        io_utils::read_table(&args.input, args.input_options.delimiter, encoding)?
    } else {
        load(&args.input, &args.input_options)?
    };
    let cleaned = clean::apply_all(&table, &args.steps)?;
    save(&cleaned, &args.output)?;
    info!(
        "Applied {} step(s): {} -> {} row(s)",
        args.steps.len(),
        table.row_count(),
        cleaned.row_count()
    );
    Ok(())
}

pub fn stats(args: &StatsArgs) -> Result<()> {
    let (table, report) = load_with_report(&args.input, &args.input_options)?;
    let stats = TableStats::of(&table).with_coercions(&report);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        preview::print_table(&TableStats::summary_headers(), &stats.render_rows());
        if args.columns {
            println!();
            preview::print_table(&TableStats::column_headers(), &stats.render_column_rows());
        }
    }
    info!("Computed statistics for {:?}", args.input);
    Ok(())
}

pub fn run_recipe(args: &RunArgs) -> Result<()> {
    let run = pipeline::run_recipe(&args.recipe)
        .with_context(|| format!("Running recipe {:?}", args.recipe))?;
    for (table, summary) in &run.matches {
        info!(
            "'{table}': matched {}/{} row(s) ({:.2}%)",
            summary.matched_row_count,
            summary.total_row_count,
            summary.match_rate * 100.0
        );
    }
    info!("Recipe produced {} table(s)", run.tables.len());
    Ok(())
}
