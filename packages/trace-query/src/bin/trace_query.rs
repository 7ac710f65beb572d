//! trace-query CLI - run structural queries against a directory archive
//!
//! Usage:
//!   trace-query --store-root /data/archive query --query request.json
//!   trace-query --store-root /data/archive services
//!   trace-query --store-root /data/archive locate <trace-id> --start 0 --end 2000
//!
//! Logging goes to stderr and honours `RUST_LOG` (default: info).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trace_query::{FsStore, QueryConfig, QueryRequest, TimeWindow, TraceQueryEngine};

#[derive(Debug, Parser)]
#[command(name = "trace-query", version, about = "Structural queries over a trace archive")]
struct Cli {
    /// Root directory of the archive (one subdirectory per bucket)
    #[arg(long)]
    store_root: PathBuf,

    /// JSON engine config; defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a query and print one projected value per line
    Query {
        /// JSON `QueryRequest`
        #[arg(long)]
        query: PathBuf,
        /// Print a JSON summary instead of bare values
        #[arg(long)]
        json: bool,
    },
    /// List services with span data
    Services,
    /// Find the batches holding a trace
    Locate {
        trace_id: String,
        #[arg(long, default_value_t = 0)]
        start: u64,
        #[arg(long, default_value_t = u64::MAX)]
        end: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => QueryConfig::read_from(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => QueryConfig::default(),
    };
    let store = FsStore::open(&cli.store_root)
        .with_context(|| format!("opening archive {}", cli.store_root.display()))?;
    let engine = TraceQueryEngine::new(Arc::new(store), config);

    match cli.command {
        Command::Query { query, json } => {
            let text = std::fs::read_to_string(&query)
                .with_context(|| format!("reading query {}", query.display()))?;
            let request: QueryRequest = serde_json::from_str(&text)
                .with_context(|| format!("parsing query {}", query.display()))?;
            let outcome = engine
                .execute(&request)
                .await
                .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;
            if json {
                let summary = serde_json::json!({
                    "values": outcome.values,
                    "structuralMatches": outcome.structural_matches,
                    "candidates": outcome.candidates,
                    "passed": outcome.passed.len(),
                    "shards": outcome.shards.len(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for value in outcome.values {
                    println!("{}", value);
                }
            }
        }
        Command::Services => {
            for service in engine.list_services().await? {
                println!("{}", service);
            }
        }
        Command::Locate { trace_id, start, end } => {
            let window = TimeWindow::new(start, end)?;
            for batch in engine.locate_trace(&trace_id, window).await? {
                println!("{}", batch);
            }
        }
    }
    Ok(())
}
