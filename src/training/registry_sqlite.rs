//! SQLite-backed version registry over the `model_versions` table.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::common::error::{PipelineError, PipelineResult};

use super::domain::{ModelVersionRecord, ModelVersionRepository, NewModelVersion, Stage, VersionLabel, VersionPatch};

const DATE_FORMAT: &str = "%Y-%m-%d";

const COLUMNS: &str = "id, version, stage, metric, metric_value, trained_at, active";

pub struct SqliteVersionRegistry {
    pool: SqlitePool,
}

impl SqliteVersionRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &SqliteRow) -> PipelineResult<ModelVersionRecord> {
    let version: String = row.try_get("version")?;
    let stage: String = row.try_get("stage")?;
    let trained_at: String = row.try_get("trained_at")?;
    let active: i64 = row.try_get("active")?;
    Ok(ModelVersionRecord {
        id: row.try_get("id")?,
        version: version.parse()?,
        stage: stage.parse()?,
        metric: row.try_get("metric")?,
        metric_value: row.try_get("metric_value")?,
        trained_at: NaiveDate::parse_from_str(&trained_at, DATE_FORMAT)
            .map_err(|e| PipelineError::storage(format!("bad trained_at '{trained_at}': {e}")))?,
        active: active != 0,
    })
}

impl SqliteVersionRegistry {
    async fn fetch_optional(&self, sql: &str, bind: &str) -> PipelineResult<Option<ModelVersionRecord>> {
        let row = sqlx::query(sql).bind(bind).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn fetch_by_id(&self, id: i64) -> PipelineResult<Option<ModelVersionRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM model_versions WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }
}

#[async_trait]
impl ModelVersionRepository for SqliteVersionRegistry {
    async fn create(&self, new: NewModelVersion) -> PipelineResult<ModelVersionRecord> {
        let id = sqlx::query(
            "INSERT INTO model_versions (version, stage, metric, metric_value, trained_at, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(new.version.to_string())
        .bind(new.stage().as_str())
        .bind(&new.metric)
        .bind(new.metric_value)
        .bind(new.trained_at.format(DATE_FORMAT).to_string())
        .bind(i64::from(new.active))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.fetch_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::storage(format!("inserted row {id} vanished")))
    }

    async fn get_by_version(&self, version: &VersionLabel) -> PipelineResult<Option<ModelVersionRecord>> {
        self.fetch_optional(
            &format!("SELECT {COLUMNS} FROM model_versions WHERE version = ?1"),
            &version.to_string(),
        )
        .await
    }

    async fn get_active_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>> {
        self.fetch_optional(
            &format!("SELECT {COLUMNS} FROM model_versions WHERE stage = ?1 AND active = 1"),
            stage.as_str(),
        )
        .await
    }

    async fn get_latest_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>> {
        // Numeric order on the sequence suffix; text order would put v10 before v9.
        self.fetch_optional(
            &format!(
                "SELECT {COLUMNS} FROM model_versions WHERE stage = ?1 \
                 ORDER BY CAST(substr(version, instr(version, '_v') + 2) AS INTEGER) DESC LIMIT 1"
            ),
            stage.as_str(),
        )
        .await
    }

    async fn list_all(&self) -> PipelineResult<Vec<ModelVersionRecord>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM model_versions ORDER BY id DESC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn list_by_stage(&self, stage: Stage) -> PipelineResult<Vec<ModelVersionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM model_versions WHERE stage = ?1 ORDER BY id DESC"
        ))
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn update_partial(&self, id: i64, patch: VersionPatch) -> PipelineResult<ModelVersionRecord> {
        if patch != VersionPatch::default() {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE model_versions SET ");
            let mut sets = qb.separated(", ");
            if let Some(metric) = &patch.metric {
                sets.push("metric = ").push_bind_unseparated(metric.clone());
            }
            if let Some(value) = patch.metric_value {
                sets.push("metric_value = ").push_bind_unseparated(value);
            }
            if let Some(date) = patch.trained_at {
                sets.push("trained_at = ")
                    .push_bind_unseparated(date.format(DATE_FORMAT).to_string());
            }
            if let Some(active) = patch.active {
                sets.push("active = ").push_bind_unseparated(i64::from(active));
            }
            qb.push(" WHERE id = ").push_bind(id);
            qb.build().execute(&self.pool).await?;
        }

        self.fetch_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::storage(format!("model version row {id} not found")))
    }

    async fn delete_by_version(&self, version: &VersionLabel) -> PipelineResult<bool> {
        let result = sqlx::query("DELETE FROM model_versions WHERE version = ?1")
            .bind(version.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_stage(&self, stage: Stage) -> PipelineResult<u64> {
        let result = sqlx::query("DELETE FROM model_versions WHERE stage = ?1")
            .bind(stage.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
