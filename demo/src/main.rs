//! VIGIL event engine demo CLI
//!
//! Builds the environment described by an engine config and runs events
//! through it on the worker pool.
//!
//! Usage:
//!   cargo run -p demo -- run --config demo/config/engine.toml
//!   cargo run -p demo -- run --config demo/config/engine.toml --events demo/config/events.jsonl --trace
//!   cargo run -p demo -- graph --config demo/config/engine.toml
//!   cargo run -p demo -- graph --config demo/config/engine.toml --expression

use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_builder::{DirCatalog, Environment, Registry};
use vigil_contracts::{
    error::{VigilError, VigilResult},
    Event, ProcessedEvent,
};
use vigil_kvdb::MemoryKvdbManager;
use vigil_runtime::{Dispatcher, EngineConfig, EnvironmentSlot, ThreadPool};

// ── CLI definition ────────────────────────────────────────────────────────────

/// VIGIL: security event decoding and detection engine demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "VIGIL event engine demo",
    long_about = "Builds a VIGIL environment from a catalog directory and evaluates\n\
                  JSON events against it on a worker thread pool."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate newline-delimited JSON events and print the processed events.
    Run {
        /// Engine configuration file (TOML).
        #[arg(long)]
        config: PathBuf,
        /// Events file, one JSON object per line. Reads stdin when omitted.
        #[arg(long)]
        events: Option<PathBuf>,
        /// Print each event's evaluation trace.
        #[arg(long)]
        trace: bool,
    },
    /// Print the environment's graphs in Graphviz format.
    Graph {
        #[arg(long)]
        config: PathBuf,
        /// Print the composed expression tree instead.
        #[arg(long)]
        expression: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { config, events, trace } => run(&config, events.as_deref(), trace),
        Command::Graph { config, expression } => graph(&config, expression),
    };

    if let Err(e) = result {
        eprintln!("Demo error: {}", e);
        std::process::exit(1);
    }
}

// ── Bootstrap ─────────────────────────────────────────────────────────────────

fn build_environment(config: &EngineConfig) -> VigilResult<Environment> {
    let kvdb = Arc::new(MemoryKvdbManager::new());
    config.seed_kvdb(&kvdb)?;

    let registry = Registry::builtin(kvdb)?;
    let catalog = DirCatalog::new(config.catalog.root.clone());
    let document = config.load_environment_document()?;

    Environment::build(&config.engine.name, &document, &catalog, &registry)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn graph(config_path: &Path, expression: bool) -> VigilResult<()> {
    let config = EngineConfig::from_file(config_path)?;
    let environment = build_environment(&config)?;

    if expression {
        print!("{}", environment.expression());
    } else {
        print!("{}", environment.graphviz());
    }
    Ok(())
}

fn run(config_path: &Path, events_path: Option<&Path>, show_trace: bool) -> VigilResult<()> {
    let config = EngineConfig::from_file(config_path)?;

    let slot = Arc::new(EnvironmentSlot::new());
    slot.reload(|| build_environment(&config))?;

    let pool = Arc::new(ThreadPool::new(config.engine.threads)?);
    let dispatcher = Dispatcher::new(pool, slot);

    let reader: Box<dyn BufRead> = match events_path {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path).map_err(|e| {
            VigilError::Config {
                reason: format!("failed to open events '{}': {}", path.display(), e),
            }
        })?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let (tx, rx) = mpsc::channel::<(usize, ProcessedEvent)>();
    let mut dispatched = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| VigilError::Runtime {
            reason: format!("failed to read events: {}", e),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match Event::parse(&line) {
            Ok(event) => event,
            Err(e) => {
                eprintln!("line {}: skipped, not valid JSON: {}", line_no + 1, e);
                continue;
            }
        };

        let tx = tx.clone();
        let index = line_no + 1;
        dispatcher.dispatch(event, move |processed| {
            let _ = tx.send((index, processed));
        })?;
        dispatched += 1;
    }
    drop(tx);

    info!(events = dispatched, "events dispatched");

    let mut results: Vec<(usize, ProcessedEvent)> = rx.iter().take(dispatched).collect();
    results.sort_by_key(|(index, _)| *index);

    for (index, processed) in &results {
        print_processed(*index, processed, show_trace);
    }

    dispatcher.shutdown();
    Ok(())
}

fn print_processed(index: usize, processed: &ProcessedEvent, show_trace: bool) {
    println!("── event {} ({}) ──", index, processed.processed_at.to_rfc3339());
    match serde_json::to_string_pretty(&processed.event) {
        Ok(json) => println!("{}", json),
        Err(e) => println!("<unprintable event: {}>", e),
    }

    if show_trace {
        for entry in processed.trace.entries() {
            let mark = if entry.success { "ok  " } else { "FAIL" };
            println!("  [{}] {}", mark, entry.message);
        }
    }
    println!();
}
