//! SQLite-backed episode source.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::common::error::PipelineResult;

use super::cleaner::{categorical_value, map_binary, numeric_value};
use super::domain::{EpisodeRecord, EpisodeSource, FeatureSchema};

/// Keeps the `IN (...)` list under SQLite's bound-parameter limit.
const ID_CHUNK: usize = 500;

/// Reads episodes from the `episodes`, `diagnostics` and `episode_diagnostic` tables.
pub struct SqliteEpisodeSource {
    pool: SqlitePool,
    schema: Arc<FeatureSchema>,
}

impl SqliteEpisodeSource {
    pub fn new(pool: SqlitePool, schema: Arc<FeatureSchema>) -> Self {
        Self { pool, schema }
    }

    fn select_sql(&self) -> String {
        let schema = &self.schema;
        let mut cols = vec!["id".to_string(), schema.label.clone()];
        cols.extend(schema.numeric.iter().map(|c| format!("CAST({c} AS REAL) AS {c}")));
        cols.extend(schema.binary.iter().map(|c| format!("CAST({c} AS INTEGER) AS {c}")));
        cols.extend(schema.categorical.iter().map(|c| format!("CAST({c} AS TEXT) AS {c}")));
        format!(
            "SELECT {} FROM episodes WHERE {} IS NOT NULL ORDER BY id",
            cols.join(", "),
            schema.label
        )
    }

    fn decode(&self, row: &SqliteRow) -> PipelineResult<EpisodeRecord> {
        let schema = &self.schema;
        let id: i64 = row.try_get("id")?;
        let label: Option<String> = row.try_get(schema.label.as_str())?;
        let mut record = EpisodeRecord::new(Some(id), label);

        for col in &schema.numeric {
            let v: Option<f64> = row.try_get(col.as_str())?;
            record = record.with(col, v.map_or(Value::Null, Value::from));
        }
        for col in &schema.binary {
            let v: Option<i64> = row.try_get(col.as_str())?;
            record = record.with(col, v.map_or(Value::Null, |flag| Value::Bool(flag != 0)));
        }
        for col in &schema.categorical {
            let v: Option<String> = row.try_get(col.as_str())?;
            record = record.with(col, v.map_or(Value::Null, Value::String));
        }
        Ok(record)
    }

    /// Insert an episode and link its diagnosis codes, creating unknown codes.
    pub async fn insert_episode(
        &self,
        episode: &EpisodeRecord,
        diagnoses: &[String],
    ) -> PipelineResult<i64> {
        let schema = &self.schema;
        let mut tx = self.pool.begin().await?;

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO episodes (");
        let mut names = Vec::new();
        if episode.id.is_some() {
            names.push("id".to_string());
        }
        names.push(schema.label.clone());
        names.extend(schema.numeric.iter().cloned());
        names.extend(schema.binary.iter().cloned());
        names.extend(schema.categorical.iter().cloned());
        qb.push(names.join(", "));
        qb.push(") VALUES (");

        let mut values = qb.separated(", ");
        if let Some(id) = episode.id {
            values.push_bind(id);
        }
        values.push_bind(episode.label.clone());
        for col in &schema.numeric {
            values.push_bind(numeric_value(episode.get(col)));
        }
        for col in &schema.binary {
            let v = episode.get(col);
            let flag = match v {
                Value::Null => None,
                Value::String(s) if s.trim().is_empty() => None,
                other => Some(map_binary(other) == 1.0),
            };
            values.push_bind(flag);
        }
        for col in &schema.categorical {
            values.push_bind(categorical_value(episode.get(col)));
        }
        values.push_unseparated(")");

        let id = qb.build().execute(&mut *tx).await?.last_insert_rowid();

        for code in diagnoses {
            sqlx::query("INSERT OR IGNORE INTO diagnostics (cie_code) VALUES (?1)")
                .bind(code)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO episode_diagnostic (episode_id, diagnostic_id) \
                 SELECT ?1, id FROM diagnostics WHERE cie_code = ?2",
            )
            .bind(id)
            .bind(code)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl EpisodeSource for SqliteEpisodeSource {
    async fn fetch_validated_episodes(&self) -> PipelineResult<Vec<EpisodeRecord>> {
        let rows = sqlx::query(&self.select_sql())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| self.decode(row)).collect()
    }

    async fn fetch_diagnostics_map(
        &self,
        episode_ids: &[i64],
    ) -> PipelineResult<BTreeMap<i64, Vec<String>>> {
        let mut map: BTreeMap<i64, Vec<String>> = BTreeMap::new();

        for chunk in episode_ids.chunks(ID_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT ed.episode_id, d.cie_code FROM episode_diagnostic ed \
                 JOIN diagnostics d ON ed.diagnostic_id = d.id \
                 WHERE ed.episode_id IN (",
            );
            let mut ids = qb.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            ids.push_unseparated(") ORDER BY ed.episode_id, d.id");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in rows {
                let episode_id: i64 = row.try_get(0)?;
                let code: String = row.try_get(1)?;
                map.entry(episode_id).or_default().push(code);
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::common::db::{create_pool, run_migrations};

    async fn source() -> SqliteEpisodeSource {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let schema = Arc::new(FeatureSchema::episodes());
        run_migrations(&pool, &schema).await.unwrap();
        SqliteEpisodeSource::new(pool, schema)
    }

    #[tokio::test]
    async fn round_trips_typed_columns_and_diagnoses() {
        let source = source().await;
        let episode = EpisodeRecord::new(Some(10), Some("PERTINENTE".into()))
            .with("sodio", 140)
            .with("pcr", "12.5")
            .with("dva", "Sí")
            .with("dialisis", false)
            .with("triage", 3)
            .with("tipo", "Urgencia");
        source
            .insert_episode(&episode, &["I21".to_string(), "E11".to_string()])
            .await
            .unwrap();
        source
            .insert_episode(&EpisodeRecord::new(Some(11), None), &[])
            .await
            .unwrap();

        let rows = source.fetch_validated_episodes().await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, Some(10));
        assert_eq!(row.get("sodio"), &json!(140.0));
        assert_eq!(row.get("pcr"), &json!(12.5));
        assert_eq!(row.get("dva"), &json!(true));
        assert_eq!(row.get("dialisis"), &json!(false));
        assert_eq!(row.get("ecg_alterado"), &Value::Null);
        assert_eq!(row.get("triage"), &json!("3"));
        assert_eq!(row.get("tipo"), &json!("Urgencia"));

        let map = source.fetch_diagnostics_map(&[10, 11]).await.unwrap();
        assert_eq!(map[&10], vec!["I21".to_string(), "E11".to_string()]);
        assert!(!map.contains_key(&11));
    }
}
