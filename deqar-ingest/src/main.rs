//! deqar-ingest - Submission ingest command
//!
//! Feeds JSON submission files through the reconciliation core and prints
//! one JSON outcome per unit. Also creates the registry database and loads
//! reference data.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deqar_common::config::IngestConfig;
use deqar_common::db::init_database_with_timeout;
use deqar_common::EventBus;
use deqar_ingest::orchestrator::{SubmissionMode, SubmissionOrchestrator};
use deqar_ingest::reference_import::{load_reference_bundle, ReferenceBundle};
use tracing::info;

/// Command-line arguments for deqar-ingest
#[derive(Parser, Debug)]
#[command(name = "deqar-ingest")]
#[command(about = "Reconcile report submissions into the DEQAR registry")]
#[command(version)]
struct Args {
    /// Registry database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Configuration file (defaults to ~/.config/deqar/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema and seed the vocabulary
    Init,

    /// Load countries, agencies, activities and ETER/OrgReg records from JSON
    LoadReference {
        file: PathBuf,
    },

    /// Process a JSON submission object or list
    Submit {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = SubmissionMode::Upsert)]
        mode: SubmissionMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = IngestConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    // RUST_LOG overrides the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let db_path = config.resolve_database_path(args.database.as_deref());
    info!("Database: {}", db_path.display());

    let pool = init_database_with_timeout(&db_path, config.busy_timeout_ms)
        .await
        .context("Failed to open database")?;

    match args.command {
        Command::Init => {
            info!("Database schema is up to date");
        }

        Command::LoadReference { file } => {
            let bundle = ReferenceBundle::from_file(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = load_reference_bundle(&pool, &bundle).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Submit { file, mode } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let input: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;

            let events = EventBus::new(config.event_capacity);
            let orchestrator = SubmissionOrchestrator::new(pool.clone(), events, &config);
            let outcomes = orchestrator.submit_batch(input, mode).await;

            let failed = outcomes.iter().filter(|o| !o.is_success()).count();
            for outcome in &outcomes {
                println!("{}", serde_json::to_string(outcome)?);
            }
            info!(units = outcomes.len(), failed, "Submission file processed");
        }
    }

    pool.close().await;
    Ok(())
}
