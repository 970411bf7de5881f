//! Loading and saving tables as delimited text.
//!
//! Input is decoded with `encoding_rs` (UTF-8 by default, BOM sniffed) and
//! parsed with `csv`. Every cell loads as text; an empty field is Missing.
//! Type inference is left to [`crate::harmonize`]. The `-` path reads
//! stdin or writes stdout.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{data::Value, table::Table};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn resolve_output_delimiter(path: Option<&Path>, provided: Option<u8>) -> u8 {
    if let Some(delim) = provided {
        return delim;
    }
    match path.and_then(|p| p.extension()).and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    }
}

/// Accepts `,`, `tab`, `;`, `|`, their names, or any single ASCII character.
pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!("Failed to decode text with encoding {}", used.name()))
    } else {
        Ok(text.into_owned())
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading standard input")?;
    } else {
        File::open(path)
            .with_context(|| format!("Opening input file {path:?}"))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    Ok(bytes)
}

/// Parses delimited text whose first record is the header row.
pub fn parse_table(text: &str, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .context("Reading header row")?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let mut rows: Vec<Vec<Option<Value>>> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", idx + 2))?;
        rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| Value::String(field.to_string())))
                .collect(),
        );
    }
    Ok(Table::from_rows(&headers, rows)?)
}

pub fn read_table(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Result<Table> {
    let delimiter = resolve_input_delimiter(path, delimiter);
    let bytes = read_source(path)?;
    let text = decode_bytes(&bytes, encoding).with_context(|| format!("Decoding {path:?}"))?;
    let table = parse_table(&text, delimiter).with_context(|| format!("Parsing {path:?}"))?;
    debug!(
        "Loaded {} row(s) x {} column(s) from {path:?}",
        table.row_count(),
        table.column_count()
    );
    Ok(table)
}

/// Renders a table as delimited UTF-8 text. Missing cells are empty and
/// dates use `%Y-%m-%d`.
pub fn render_csv(table: &Table, delimiter: u8) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    for row in table.rows() {
        writer.write_record(
            row.iter()
                .map(|cell| cell.as_ref().map(Value::as_display).unwrap_or_default()),
        )?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing CSV output: {}", err.error()))?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_table(
    table: &Table,
    path: Option<&Path>,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<()> {
    let delimiter = resolve_output_delimiter(path, delimiter);
    let text = render_csv(table, delimiter)?;
    let (encoded, _, had_errors) = encoding.encode(&text);
    if had_errors {
        return Err(anyhow!("Failed to encode output using {}", encoding.name()));
    }
    let mut sink: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => {
            if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Creating output directory {parent:?}"))?;
            }
            Box::new(BufWriter::new(
                File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
            ))
        }
        _ => Box::new(io::stdout().lock()),
    };
    sink.write_all(encoded.as_ref())?;
    sink.flush()?;
    if let Some(p) = path.filter(|p| !is_dash(p)) {
        debug!("Wrote {} row(s) to {p:?}", table.row_count());
    }
    Ok(())
}
