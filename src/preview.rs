use std::borrow::Cow;
use std::fmt::Write as _;

use anyhow::Result;
use log::info;
use unicode_width::UnicodeWidthStr;

use crate::{cli::PreviewArgs, harmonize, io_utils, table::Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let table = harmonize::infer(&io_utils::read_table(&args.input, args.delimiter, encoding)?);
    print!("{}", render_preview(&table, args.rows));
    info!(
        "Displayed {} of {} row(s) from {:?}",
        table.row_count().min(args.rows),
        table.row_count(),
        args.input
    );
    Ok(())
}

/// First `limit` rows of a table, numeric columns right-aligned.
pub fn render_preview(table: &Table, limit: usize) -> String {
    let align = table
        .columns()
        .iter()
        .map(|c| {
            if c.column_type().is_numeric() {
                Align::Right
            } else {
                Align::Left
            }
        })
        .collect::<Vec<_>>();
    render_aligned(&table.column_names(), &table.display_rows(limit), &align)
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    render_aligned(headers, rows, &[])
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn render_aligned(headers: &[String], rows: &[Vec<String>], align: &[Align]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths, &[]));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths, &[]));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, align));
    }
    output
}

fn format_row(values: &[String], widths: &[usize], align: &[Align]) -> String {
    let cells = values
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(idx, (value, width))| {
            let cell = sanitize_cell(value);
            let padding = " ".repeat(width.saturating_sub(display_width(&cell)));
            match align.get(idx) {
                Some(Align::Right) => format!("{padding}{cell}"),
                _ => format!("{cell}{padding}"),
            }
        })
        .collect::<Vec<_>>();
    cells.join("  ").trim_end().to_string()
}

/// Terminal columns occupied by `value`.
fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
