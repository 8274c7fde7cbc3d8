//! Command-line parsing for the FAEN → CDE uploader.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the API clients and pipeline code.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::domain::DatasetSelection;

pub mod confirm;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "faen-cde", version, about = "Upload FAEN energy and weather data into CDE datasets")]
pub struct Cli {
    /// Debug-level logging (request details, raw record previews).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only warnings and errors on stderr.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch from FAEN, create the CDE dataset(s) and upload every datapoint.
    ///
    /// This is the default when no subcommand is given.
    Run(RunArgs),
    /// Fetch and transform only; print the dataset document(s) without touching CDE.
    Preview(PreviewArgs),
    /// Check that the CDE API is reachable and healthy.
    Health,
}

/// Data selection shared by `run` and `preview`.
#[derive(Debug, Args, Clone)]
pub struct SelectionArgs {
    /// Which dataset(s) to build.
    #[arg(short, long, value_enum, default_value_t = DatasetSelection::Consumption)]
    pub dataset: DatasetSelection,

    /// First day included (YYYY-MM-DD). Defaults to 7 days before --end.
    #[arg(long, value_name = "DATE")]
    pub start: Option<NaiveDate>,

    /// First day *not* included (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long, value_name = "DATE")]
    pub end: Option<NaiveDate>,

    /// Maximum records fetched per FAEN endpoint.
    #[arg(short, long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: u32,

    /// Override the generated dataset name.
    #[arg(long)]
    pub name: Option<String>,

    /// Write each dataset document (JSON-LD) into this directory.
    #[arg(long, value_name = "DIR")]
    pub save_definition: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Answer yes to every confirmation (unattended mode).
    #[arg(short, long)]
    pub yes: bool,

    /// Datapoints per CSV upload; 0 posts them one by one. Defaults to DEFAULT_BATCH_SIZE.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}
