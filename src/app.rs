//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads configuration and builds the API clients
//! - runs the upload pipeline (or a preview / health check)
//! - prints reports and maps the outcome to an exit code

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Command, PreviewArgs, RunArgs, SelectionArgs};
use crate::config::Config;
use crate::data::{CdeClient, FaenClient, SourceApi};
use crate::domain::{DatasetType, DateRange};
use crate::error::{
    AppError, EXIT_ABORTED, EXIT_DECLINED, EXIT_INTERRUPTED, EXIT_PARTIAL, EXIT_USAGE,
};
use crate::logging::Verbosity;

pub mod pipeline;

use pipeline::{Checkpoint, Orchestrator, RunOptions};

/// Days covered when no `--start` is given.
const DEFAULT_RANGE_DAYS: i64 = 7;

/// Entry point for the `faen-cde` binary.
pub fn run() -> Result<(), AppError> {
    // We want `faen-cde --dataset both ...` to behave like `faen-cde run ...`.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of the
    // argv list before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    crate::logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Preview(args) => handle_preview(args),
        Command::Health => handle_health(),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = Config::from_env()?;
    let options = run_options(&args.selection, Some(args.batch_size.unwrap_or(config.batch_size)), &config)?;
    let dataset_types = args.selection.dataset.dataset_types();
    info!(source = %config.source.base_url, sink = %config.sink.base_url, range = %options.range, "starting run");

    let mut source = FaenClient::new(&config.source.base_url, config.source.credentials(), config.http_timeout)?;
    let sink = CdeClient::new(&config.sink.base_url, config.http_timeout)?;

    let interrupt = install_interrupt_handler();

    let confirm: Box<dyn FnMut(Checkpoint, DatasetType) -> bool> = if args.yes {
        Box::new(|_, _| true)
    } else {
        let prompt_options = options.clone();
        let prompt_interrupt = Arc::clone(&interrupt);
        Box::new(move |checkpoint, dataset_type| {
            crate::cli::confirm::prompt_yes_no(
                &checkpoint.prompt(dataset_type, &prompt_options),
                true,
                &prompt_interrupt,
            )
        })
    };

    let report = Orchestrator::new(&mut source, &sink, confirm, options)
        .with_interrupt(interrupt)
        .run(&dataset_types);

    println!("{}", crate::report::format_run_report(&report));

    match report.exit_code() {
        0 => Ok(()),
        code => Err(AppError::new(code, exit_message(code))),
    }
}

fn handle_preview(args: PreviewArgs) -> Result<(), AppError> {
    let config = Config::from_env()?;
    let options = run_options(&args.selection, None, &config)?;

    let mut source = FaenClient::new(&config.source.base_url, config.source.credentials(), config.http_timeout)?;
    source.login()?;

    for dataset_type in args.selection.dataset.dataset_types() {
        let (parsed, fetched) = pipeline::fetch_records(&mut source, dataset_type, &options)?;
        let description = pipeline::describe(&parsed, dataset_type, &options)
            .map_err(|e| AppError::new(EXIT_ABORTED, e.to_string()))?;

        println!(
            "{}",
            crate::report::format_description_summary(&description, fetched, parsed.skipped.len())
        );
        let document = serde_json::to_string_pretty(&description.to_jsonld())
            .map_err(|e| AppError::new(EXIT_ABORTED, format!("Failed to render dataset document: {e}")))?;
        println!("{document}\n");

        if let Some(dir) = &options.save_definition {
            let path = crate::io::write_definition_json(dir, &description)?;
            info!(path = %path.display(), "saved dataset definition");
        }
    }
    Ok(())
}

fn handle_health() -> Result<(), AppError> {
    let sink_config = Config::sink_from_env()?;
    let sink = CdeClient::new(&sink_config.base_url, sink_config.http_timeout)?;
    let report = sink.health()?;
    println!("{}", crate::report::format_health(&report));
    Ok(())
}

fn run_options(selection: &SelectionArgs, batch_size: Option<usize>, config: &Config) -> Result<RunOptions, AppError> {
    let today = Utc::now().date_naive();
    Ok(RunOptions {
        range: resolve_range(selection.start, selection.end, today)?,
        limit: selection.limit as usize,
        name: selection.name.clone(),
        batch_size: batch_size.unwrap_or(0),
        save_definition: selection.save_definition.clone(),
        preview_records: config.sample_records_display,
    })
}

/// Half-open range from optional `--start` / `--end`.
///
/// Defaults to the last 7 full days before `today`. Reversed dates are
/// swapped; equal dates select nothing and are rejected.
pub fn resolve_range(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Result<DateRange, AppError> {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or(end - chrono::Duration::days(DEFAULT_RANGE_DAYS));

    let (start, end) = if start > end {
        warn!(%start, %end, "start date is after end date, swapping");
        (end, start)
    } else {
        (start, end)
    };

    DateRange::new(start, end).ok_or_else(|| {
        AppError::new(
            EXIT_USAGE,
            format!("Empty date range: --start and --end are both {start} (the end date is exclusive)."),
        )
    })
}

/// Shown on the first Ctrl-C. A pending prompt only returns once Enter is pressed.
const INTERRUPT_NOTICE: &str =
    "\nInterrupt received; stopping after the current step. At a prompt press Enter to stop, or Ctrl-C again to quit now.";

/// First Ctrl-C asks the pipeline to stop after the current step; a second one exits.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    let installed = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "{INTERRUPT_NOTICE}");
        let _ = stderr.flush();
    });
    if let Err(err) = installed {
        warn!(%err, "could not install Ctrl-C handler");
    }
    flag
}

fn exit_message(code: u8) -> String {
    match code {
        EXIT_PARTIAL => "Some datapoints were rejected by CDE (see the summary above).".to_string(),
        EXIT_ABORTED => "At least one dataset type was aborted (see the summary above).".to_string(),
        EXIT_DECLINED => "Stopped at a confirmation prompt.".to_string(),
        EXIT_INTERRUPTED => "Interrupted.".to_string(),
        other => format!("Run finished with exit code {other}."),
    }
}

/// Rewrite argv so `faen-cde` defaults to `faen-cde run`.
///
/// Rules:
/// - `faen-cde`                         -> `faen-cde run`
/// - `faen-cde --dataset both ...`      -> `faen-cde run --dataset both ...`
/// - `faen-cde -v --yes`                -> `faen-cde -v run --yes`
/// - `faen-cde --help/--version/-h`     -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    // Leading global flags may precede the subcommand.
    let pos = argv
        .iter()
        .skip(1)
        .position(|a| !matches!(a.as_str(), "-v" | "--verbose" | "-q" | "--quiet"))
        .map_or(argv.len(), |p| p + 1);

    let Some(arg) = argv.get(pos).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(arg.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    let is_subcommand = matches!(arg.as_str(), "run" | "preview" | "health");
    if is_top_level_help_or_version || is_subcommand {
        return argv;
    }

    // If the token is a flag, treat it as "run flags".
    if arg.starts_with('-') {
        argv.insert(pos, "run".to_string());
    }

    // Otherwise, leave as-is (clap reports the unknown subcommand).
    argv
}
