//! digipipe CLI: Run container processing pipelines over JSON event files.
//!
//! This binary reads a pipeline description and a list of events, runs every
//! event through the configured actions and writes the output segments.
#![allow(
    clippy::uninlined_format_args,
    clippy::redundant_closure_for_method_calls,
    clippy::too_many_lines
)]

mod pipeline;

use clap::{Parser, Subcommand};
use log::info;
use pipeline::{load_events, write_events, EventRecord, PipelineFile};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Processing error: {0}")]
    Core(#[from] digipipe_core::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Per-event container processing driver.
#[derive(Parser)]
#[command(name = "digipipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over an event file
    Run {
        /// Pipeline description (JSON)
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Input events (JSON)
        #[arg(short, long)]
        events: PathBuf,

        /// Output file for the processed output segments
        #[arg(short, long)]
        output: PathBuf,

        /// Override the number of worker threads (0 = sequential)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about an event file
    Info {
        /// Input events (JSON)
        #[arg(short, long)]
        events: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            events,
            output,
            threads,
            verbose,
        } => {
            init_logging(verbose);
            let mut description = PipelineFile::load(&pipeline)?;
            if let Some(threads) = threads {
                description.num_threads = threads;
            }
            let (event_loop, output_segments) = description.build()?;
            info!(
                "pipeline {}: {} actions",
                pipeline.display(),
                event_loop.len()
            );

            let start = Instant::now();
            let contexts = load_events(&events)?
                .into_iter()
                .map(EventRecord::into_context)
                .collect::<Result<Vec<_>>>()?;
            let processed = event_loop.run(contexts)?;
            let records: Vec<EventRecord> = processed
                .iter()
                .map(|context| EventRecord::from_context(context, &output_segments))
                .collect();
            write_events(&output, &records)?;

            if verbose {
                let elapsed = start.elapsed();
                eprintln!("Processed {} events in {:.2?}", records.len(), elapsed);
                eprintln!("Output written to: {}", output.display());
            }
        }

        Commands::Info { events } => {
            init_logging(false);
            let records = load_events(&events)?;
            println!("File: {}", events.display());
            println!("Events: {}", records.len());
            for record in records {
                println!("Event {}", record.event_number);
                for segment in &record.segments {
                    println!("  Segment '{}': {} containers", segment.name, segment.containers.len());
                    for container in &segment.containers {
                        let energy: f64 = container.deposits.iter().map(|d| d.deposit.energy).sum();
                        println!(
                            "    {} (mask {}, {:?}): {} deposits, total energy {:.4}",
                            container.name,
                            container.mask,
                            container.kind,
                            container.deposits.len(),
                            energy
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
