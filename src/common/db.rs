//! SQLite connection pool and schema migrations.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::common::error::PipelineResult;
use crate::data::domain::FeatureSchema;

/// Open a pool for `database_url`, creating the database file when missing.
///
/// In-memory databases get a single long-lived connection so every query sees
/// the same database.
pub async fn create_pool(database_url: &str) -> PipelineResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };
    Ok(pool)
}

/// DDL statements for the episode tables and the version registry.
pub fn migrations(schema: &FeatureSchema) -> Vec<String> {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY".to_string(),
        format!("{} TEXT", schema.label),
    ];
    columns.extend(schema.numeric.iter().map(|c| format!("{c} REAL")));
    columns.extend(schema.binary.iter().map(|c| format!("{c} BOOLEAN")));
    columns.extend(schema.categorical.iter().map(|c| format!("{c} TEXT")));

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS episodes (\n    {}\n)",
            columns.join(",\n    ")
        ),
        "CREATE TABLE IF NOT EXISTS diagnostics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cie_code TEXT NOT NULL UNIQUE
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS episode_diagnostic (
            episode_id INTEGER NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
            diagnostic_id INTEGER NOT NULL REFERENCES diagnostics(id) ON DELETE RESTRICT,
            PRIMARY KEY (episode_id, diagnostic_id)
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS model_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL UNIQUE,
            stage TEXT NOT NULL,
            metric TEXT NOT NULL,
            metric_value REAL NOT NULL,
            trained_at TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_model_versions_stage ON model_versions(stage)".to_string(),
        // At most one active row per stage.
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_model_versions_active_stage
            ON model_versions(stage) WHERE active = 1"
            .to_string(),
    ]
}

/// Apply every migration; statements are idempotent.
pub async fn run_migrations(pool: &SqlitePool, schema: &FeatureSchema) -> PipelineResult<()> {
    let statements = migrations(schema);
    for sql in &statements {
        sqlx::query(sql).execute(pool).await?;
    }
    info!(statements = statements.len(), "migrations applied");
    Ok(())
}
