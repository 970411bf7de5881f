//! Reconcile tabular data: infer column types, merge tables, enrich a main
//! table from an aggregated lookup table, and clean the result.
//!
//! The engine modules ([`table`], [`harmonize`], [`merge`], [`aggregate`],
//! [`matching`], [`clean`], [`stats`]) work purely on in-memory [`Table`]s
//! and return [`ReconcileError`]. File handling, recipes and the command line
//! sit on top of them.

pub mod aggregate;
pub mod clean;
pub mod cli;
pub mod commands;
pub mod data;
pub mod error;
pub mod expr;
pub mod harmonize;
pub mod io_utils;
pub mod matching;
pub mod merge;
pub mod pipeline;
pub mod preview;
pub mod stats;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

pub use crate::{
    aggregate::{AggregationMethod, AggregationSpec},
    data::Value,
    error::ReconcileError,
    matching::MatchResult,
    merge::{JoinMode, MergeSpec},
    table::{Column, ColumnType, Table},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => commands::probe(&args),
        Commands::Preview(args) => preview::execute(&args),
        Commands::Merge(args) => commands::merge(&args),
        Commands::Match(args) => commands::match_files(&args),
        Commands::Clean(args) => commands::clean(&args),
        Commands::Stats(args) => commands::stats(&args),
        Commands::Run(args) => commands::run_recipe(&args),
    }
}
