//! `sqlsandbox` command line
//!
//! One-shot access to the engine for operators and smoke tests.
//!
//! ## Usage
//!
//! ```bash
//! # Check a query without touching the database
//! sqlsandbox validate "SELECT * FROM employees"
//!
//! # Run a query as an anonymous session
//! sqlsandbox execute "SELECT name FROM departments" --assignment a1 --session s42
//!
//! # Inspect a table
//! sqlsandbox describe employees --sample 3
//! ```
//!
//! Tracing is off unless `SQLSANDBOX_TRACE=1`; see `init_tracing`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlsandbox::config::LoggingConfig;
use sqlsandbox::{ActorIdentity, Config, QueryEngine, QueryRequest, Validator};
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "sqlsandbox", version, about = "Sandboxed read-only SQL execution")]
struct Cli {
    /// Configuration file (defaults to sqlsandbox.toml + sqlsandbox.local.toml + env)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a query without executing it
    Validate { query: String },

    /// Validate, execute and record a query
    Execute {
        query: String,
        #[arg(long)]
        assignment: String,
        #[command(flatten)]
        actor: ActorArgs,
    },

    /// Show columns and sample rows of a table
    Describe {
        table: String,
        #[arg(long)]
        sample: Option<usize>,
    },

    /// Recent attempts on an assignment
    History {
        #[arg(long)]
        assignment: String,
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Attempt statistics for a user
    Stats {
        #[arg(long)]
        user: String,
    },
}

#[derive(clap::Args, Debug)]
struct ActorArgs {
    /// Authenticated user id
    #[arg(long, conflicts_with = "session")]
    user: Option<String>,

    /// Anonymous session id
    #[arg(long)]
    session: Option<String>,
}

impl ActorArgs {
    fn identity(&self) -> Result<ActorIdentity> {
        Ok(ActorIdentity::from_parts(
            self.user.as_deref(),
            self.session.as_deref(),
        )?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    init_tracing(&config.logging);

    // Validation needs no database
    if let Command::Validate { query } = &cli.command {
        let validator = Validator::new(config.execution.max_query_length);
        let response = sqlsandbox::ValidationResponse::from(&validator.validate(query));
        return print_json(&response);
    }

    let engine = QueryEngine::from_config(&config)
        .await
        .context("starting query engine")?;

    let result = run(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &QueryEngine<sqlsandbox::pool::PgManager>, command: Command) -> Result<()> {
    match command {
        Command::Validate { query } => print_json(&engine.validate(Some(&query))),
        Command::Execute {
            query,
            assignment,
            actor,
        } => {
            let request = QueryRequest::new(query, assignment, actor.identity()?)?;
            let outcome = engine.execute(&request).await;
            print_json(&outcome.to_response())
        }
        Command::Describe { table, sample } => match engine.describe_table(&table, sample).await {
            Ok(description) => print_json(&description),
            Err(failure) => anyhow::bail!("{}: {}", failure.category, failure.message),
        },
        Command::History {
            assignment,
            actor,
            limit,
        } => {
            let attempts = engine
                .history(&actor.identity()?, &assignment, limit)
                .await?;
            print_json(&attempts)
        }
        Command::Stats { user } => {
            let summary = engine.stats(&ActorIdentity::User(user)).await?;
            print_json(&summary)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(logging_config: &LoggingConfig) {
    // Environment variables take precedence over config file values
    let enabled = env::var("SQLSANDBOX_TRACE").ok().is_some_and(|v| v != "0");
    if !enabled {
        return;
    }

    let json = env::var("SQLSANDBOX_TRACE_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("SQLSANDBOX_TRACE_LEVEL")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let (non_blocking, guard) = match env::var("SQLSANDBOX_TRACE_FILE") {
        Ok(log_path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open SQLSANDBOX_TRACE_FILE '{log_path}': {e}");
                    return;
                }
            };
            tracing_appender::non_blocking(file)
        }
        Err(_) => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_writer(non_blocking)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
