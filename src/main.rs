//! Episode pertinence command line.
//!
//! Trains, scores and manages model versions against a SQLite database and an
//! artifact directory. Every command prints JSON on stdout.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use pertinence::common::config::AppCfg;
use pertinence::common::db::{create_pool, run_migrations};
use pertinence::common::log;
use pertinence::data::domain::{EpisodeRecord, FeatureSchema};
use pertinence::data::repo_sqlite::SqliteEpisodeSource;
use pertinence::training::domain::Stage;
use pertinence::{PertinenceService, Session};

#[derive(Parser)]
#[command(name = "pertinence")]
#[command(about = "Train and serve the hospital episode pertinence classifier")]
#[command(version)]
struct Cli {
    /// Human readable logs instead of JSON lines
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the episode and registry tables
    Migrate,

    /// Load episodes from a JSON array file into the database
    Import {
        /// File holding an array of episode objects with a `diagnostics` list
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Train a new version for a stage and register it
    Train {
        #[arg(short, long, value_parser = parse_stage)]
        stage: Stage,
    },

    /// Score one episode with the stage's active version
    Predict {
        /// Defaults to PERTINENCE_INFERENCE_STAGE
        #[arg(short, long, value_parser = parse_stage)]
        stage: Option<Stage>,

        /// File holding one episode JSON object
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Inspect and manage registered versions
    Versions {
        #[command(subcommand)]
        action: VersionAction,
    },
}

#[derive(Subcommand)]
enum VersionAction {
    /// List versions, newest first
    List {
        #[arg(short, long, value_parser = parse_stage)]
        stage: Option<Stage>,
    },
    /// Make a version the active one for its stage
    Activate { version: String },
    /// Delete a version and its artifacts
    Delete { version: String },
}

fn parse_stage(raw: &str) -> Result<Stage, String> {
    raw.parse().map_err(|e: pertinence::PipelineError| e.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppCfg::load()?;
    log::init(&cfg.log_filter, !cli.pretty);

    let schema = Arc::new(FeatureSchema::episodes());
    let pool = create_pool(&cfg.database_url)
        .await
        .with_context(|| format!("opening {}", cfg.database_url))?;

    match cli.command {
        Commands::Migrate => {
            run_migrations(&pool, &schema).await?;
            info!("migrations completed");
        }
        Commands::Import { input } => {
            let raw = fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
            let Value::Array(items) = serde_json::from_str::<Value>(&raw)? else {
                bail!("{} must contain a JSON array of episodes", input.display());
            };
            let source = SqliteEpisodeSource::new(pool, schema.clone());
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                let mut episode = EpisodeRecord::from_json(&schema, item)?;
                let diagnoses = match episode.values.remove(&schema.multicategorical) {
                    Some(Value::Array(codes)) => codes
                        .into_iter()
                        .filter_map(|c| c.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                ids.push(source.insert_episode(&episode, &diagnoses).await?);
            }
            info!(rows = ids.len(), "episodes imported");
            print_json(&serde_json::json!({ "imported": ids.len() }))?;
        }
        Commands::Train { stage } => {
            let service = PertinenceService::new(cfg, schema.clone(), Session::sqlite(pool, schema));
            print_json(&service.train(stage).await?)?;
        }
        Commands::Predict { stage, input } => {
            let raw = fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
            let payload: Value = serde_json::from_str(&raw)?;
            let service = PertinenceService::new(cfg, schema.clone(), Session::sqlite(pool, schema));
            print_json(&service.predict(payload, stage).await?)?;
        }
        Commands::Versions { action } => {
            let service = PertinenceService::new(cfg, schema.clone(), Session::sqlite(pool, schema));
            match action {
                VersionAction::List { stage } => print_json(&service.list_versions(stage).await?)?,
                VersionAction::Activate { version } => print_json(&service.activate(&version).await?)?,
                VersionAction::Delete { version } => print_json(&service.delete(&version).await?)?,
            }
        }
    }

    Ok(())
}
