//! scribe-gc: integrity check and orphan sweep for the image store.
//!
//! Reads `DATABASE_URL`, `SCRIBE_STORAGE_PATH`, `SCRIBE_STORAGE_BACKEND`,
//! `SCRIBE_DB_MAX_CONNECTIONS` and `SCRIBE_ORPHAN_MIN_AGE_MINUTES` from the
//! environment (or a `.env` file). Logging follows `RUST_LOG` and
//! `LOG_FORMAT` ("json" or "text").
//!
//! Safe to run next to live writers: the sweep takes the same database
//! advisory lock that writers hold while storing payloads.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Duration;
use clap::{Parser, Subcommand};
use scribe_db::{
    defaults, ContentAddressedStore, Database, FilesystemBackend, PoolConfig, StorageBackendKind,
    StorageConfig,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scribe-gc")]
#[command(author, version, about = "Image store maintenance for scribe")]
#[command(propagate_version = true)]
struct Cli {
    /// Override SCRIBE_STORAGE_PATH
    #[arg(long, global = true)]
    storage_path: Option<PathBuf>,

    /// Override DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report dangling references and orphaned payloads
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete payloads that no note references
    Sweep {
        /// List what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,

        /// Spare orphans written more recently than this
        /// (default: SCRIBE_ORPHAN_MIN_AGE_MINUTES)
        #[arg(long)]
        min_age_minutes: Option<i64>,
    },
}

fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| defaults::LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = StorageConfig::from_env();
    if let Some(path) = cli.storage_path {
        config.storage_path = path;
    }
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    if config.backend != StorageBackendKind::Filesystem {
        bail!(
            "storage backend '{}' is process-local; nothing to maintain",
            config.backend
        );
    }
    FilesystemBackend::new(&config.storage_path)
        .validate()
        .await
        .map_err(anyhow::Error::msg)
        .context("storage path failed validation")?;

    let db = Database::connect_with_config(
        &config.database_url,
        PoolConfig::from_storage_config(&config),
    )
    .await
        .context("failed to connect to database")?;
    let store = Arc::new(ContentAddressedStore::from_config(&config));
    let lifecycle = db.lifecycle(store);

    match cli.command {
        Commands::Verify { json } => {
            let report = lifecycle.verify().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("referenced: {}", report.referenced);
                println!("stored:     {}", report.stored);
                for digest in &report.dangling {
                    println!("dangling  {}", digest);
                }
                for digest in &report.orphaned {
                    println!("orphaned  {}", digest);
                }
            }
            Ok(report.is_clean())
        }
        Commands::Sweep {
            dry_run,
            min_age_minutes,
        } => {
            if let Some(minutes) = min_age_minutes {
                if minutes < 0 {
                    bail!("--min-age-minutes must not be negative");
                }
            }
            let min_age = Duration::minutes(min_age_minutes.unwrap_or(config.orphan_min_age_minutes));

            if dry_run {
                let candidates = lifecycle.sweep_candidates(min_age).await?;
                for digest in &candidates {
                    println!("would delete {}", digest);
                }
                info!(
                    subsystem = "gc",
                    op = "sweep",
                    dry_run = true,
                    orphaned = candidates.len(),
                    "Dry run complete"
                );
            } else {
                for digest in &lifecycle.sweep_orphans(min_age).await? {
                    println!("deleted {}", digest);
                }
            }
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
