//! # docqa CLI
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa serve` | Start the HTTP server |
//! | `docqa chat <session> "<text>"` | Run one chat exchange through the queue |
//! | `docqa retrieve "<query>"` | Print the retrieved sources |
//! | `docqa ingest <files>...` | Ingest local files |
//! | `docqa ingest-staged` | Ingest everything left in the staging directory |
//! | `docqa history <session>` | Print a session's visible history |
//! | `docqa stats` | Per-day response counts and latencies |
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use docqa::app::App;
use docqa::core::history::visible_history;
use docqa::core::retrieval::RetrievalMode;
use docqa::{config, logging, migrate, server};

/// docqa: question answering over ingested documents.
#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Ask one question in a session.
    Chat {
        /// Session identifier; history is kept per session.
        session: String,
        /// The question.
        input: String,
    },

    /// Show which sources a query would retrieve.
    Retrieve {
        query: String,

        /// `similarity` (embedding) or `keyword` (phrase / all-token match).
        #[arg(long, default_value = "similarity")]
        mode: RetrievalMode,

        /// Number of results; defaults to `retrieval.default_k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Ingest local files (copied into the staging directory first).
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ingest files left in the staging directory.
    IngestStaged,

    /// Print a session's history without the system turn.
    History { session: String },

    /// Print per-day response counts and latencies, newest first.
    Stats {
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        command => {
            let app = App::build(&cfg).await?;
            let result = run_command(&app, command).await;
            app.shutdown().await;
            result?;
        }
    }

    Ok(())
}

async fn run_command(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Chat { session, input } => {
            let reply = app.queue.submit(&session, &input).await?.await?;
            print_json(&reply)?;
        }
        Commands::Retrieve { query, mode, k } => {
            let refs = app.retriever.retrieve(&query, mode, k).await?;
            print_json(&refs)?;
        }
        Commands::Ingest { files } => {
            let mut outcomes = Vec::with_capacity(files.len());
            for path in files {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("Invalid file path: {}", path.display()))?
                    .to_string();
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                outcomes.push(app.ingest.ingest(bytes, &filename).await?);
            }
            print_json(&outcomes)?;
        }
        Commands::IngestStaged => {
            let report = app.ingest.ingest_staged().await?;
            print_json(&report)?;
        }
        Commands::History { session } => {
            let turns = visible_history(app.history.as_ref(), &session).await?;
            print_json(&turns)?;
        }
        Commands::Stats { days } => {
            let stats = app.metrics.daily(days).await?;
            print_json(&stats)?;
        }
        Commands::Init | Commands::Serve => {}
    }
    Ok(())
}
