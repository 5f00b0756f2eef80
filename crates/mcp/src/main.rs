//! `roux` — thin CLI shell over `roux_store`/`roux_mcp`. Per spec.md §1 the
//! CLI commands themselves are out of scope for behavioural specification;
//! this exists so the workspace has a real, linkable binary entry point.

use clap::{Parser, Subcommand};
use roux_core::error::RouxError;
use roux_core::types::{Config, NodeFilter};
use roux_mcp::dispatch::run_stdio_loop;
use roux_store::Store;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "roux", version, about = "Local-first markdown knowledge graph engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the cache for a source directory and exit.
    Init {
        source: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Sync, start the watcher, and run the MCP server over stdio.
    Serve {
        source: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Sync once and report node counts.
    Status {
        source: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Render a graph visualization. Stubbed: out of scope per spec.md §1.
    Viz {
        source: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Init { source, config } => run_init(source, config),
        Command::Serve { source, config } => run_serve(source, config),
        Command::Status { source, config } => run_status(source, config),
        Command::Viz { source, config } => run_viz(source, config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "roux exited with an error");
        std::process::exit(1);
    }
}

fn load_config(source: Option<PathBuf>, config: Option<PathBuf>) -> Result<Config, RouxError> {
    match config {
        Some(path) => roux_store::config::load(&path),
        None => {
            let source = source
                .ok_or_else(|| RouxError::invalid_input("either a source path or --config is required"))?;
            Ok(roux_store::config::default_for_source(&source.to_string_lossy()))
        }
    }
}

fn run_init(source: PathBuf, config: Option<PathBuf>) -> Result<(), RouxError> {
    let cfg = load_config(Some(source), config)?;
    let store = Store::open(cfg)?;
    store.close()?;
    println!("initialized .roux cache");
    Ok(())
}

fn run_status(source: PathBuf, config: Option<PathBuf>) -> Result<(), RouxError> {
    let cfg = load_config(Some(source), config)?;
    let store = Store::open(cfg)?;
    let (_, total) = store.list_nodes(&NodeFilter::default(), 0, 1)?;
    println!("{total} nodes indexed");
    store.close()
}

fn run_viz(source: PathBuf, config: Option<PathBuf>) -> Result<(), RouxError> {
    let cfg = load_config(Some(source), config)?;
    let store = Store::open(cfg)?;
    println!("visualization not implemented");
    store.close()
}

fn run_serve(source: Option<PathBuf>, config: Option<PathBuf>) -> Result<(), RouxError> {
    let cfg = load_config(source, config)?;
    let store = Arc::new(Store::open(cfg)?);
    store.start_watching()?;
    run_stdio_loop(&store);
    store.close()
}
