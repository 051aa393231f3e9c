//! Binary entry point for the Sifter command-line tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use sifter::{
    cli::workload::{run_workload, WorkloadReport},
    Engine, EngineOptions, QueryId,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "sifter",
    version,
    about = "Approximate-match document filtering engine",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SIFTER_CONFIG",
        help = "TOML file with engine options"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Override the number of worker threads")]
    workers: Option<usize>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Replay a workload file and check expected results")]
    Run {
        #[arg(value_name = "WORKLOAD")]
        workload: PathBuf,
    },

    #[command(about = "Load and validate an options file")]
    CheckConfig {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    install_tracing_subscriber();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Returns `false` when a workload produced mismatches.
fn run() -> Result<bool, Box<dyn Error>> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Run { workload } => {
            let options = load_options(cli.config.as_deref(), cli.workers)?;
            let engine = Engine::new(options)?;
            let report = run_workload(&engine, workload)?;
            emit(&cli.format, &report, print_report_text)?;
            Ok(report.mismatches.is_empty())
        }
        Command::CheckConfig { file } => {
            let options = load_options(Some(file), cli.workers)?;
            emit(&cli.format, &options, |options| {
                println!("ok: {}", file.display());
                println!(
                    "  block_size={} words={}..={} workers={} slot_arena_bytes={}",
                    options.block_size,
                    options.min_word_len,
                    options.max_word_len,
                    options.workers,
                    options.slot_arena_bytes
                );
                println!(
                    "  dedup_capacity={} max_query_id={} max_query_words={}",
                    options.dedup_capacity, options.max_query_id, options.max_query_words
                );
            })?;
            Ok(true)
        }
    }
}

fn load_options(path: Option<&Path>, workers: Option<usize>) -> Result<EngineOptions, Box<dyn Error>> {
    let mut options = match path {
        Some(path) => EngineOptions::load(path)?,
        None => EngineOptions::default(),
    };
    if let Some(workers) = workers {
        options = options.workers(workers);
        options.validate()?;
    }
    Ok(options)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(&T),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(value),
    }
    Ok(())
}

fn print_report_text(report: &WorkloadReport) {
    println!(
        "documents={} queries_started={} queries_ended={} checked={} mismatches={}",
        report.documents,
        report.queries_started,
        report.queries_ended,
        report.checked,
        report.mismatches.len()
    );
    for mismatch in &report.mismatches {
        let render = |ids: &[QueryId]| {
            ids.iter().map(|q| q.to_string()).collect::<Vec<_>>().join(" ")
        };
        println!(
            "  doc {}: expected [{}] got [{}]",
            mismatch.doc_id,
            render(mismatch.expected.as_slice()),
            mismatch
                .actual
                .as_deref()
                .map_or_else(|| "unmatched".to_string(), render)
        );
    }
}
