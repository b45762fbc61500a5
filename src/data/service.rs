//! Ingestion of validated episodes with their diagnoses attached.

use std::time::Instant;

use serde_json::Value;
use tracing::info;

use crate::common::error::PipelineResult;
use crate::common::time;

use super::domain::{EpisodeRecord, EpisodeSource, FeatureSchema};

/// Reads the historical validated-episode batch used for training and as the
/// live imputation reference at inference.
pub struct DataLoader<'a> {
    source: &'a dyn EpisodeSource,
    schema: &'a FeatureSchema,
}

impl<'a> DataLoader<'a> {
    pub fn new(source: &'a dyn EpisodeSource, schema: &'a FeatureSchema) -> Self {
        Self { source, schema }
    }

    /// Fetch every labelled episode and attach its diagnosis codes, resolved
    /// in a separate query keyed by episode id.
    pub async fn fetch_all_episodes(&self) -> PipelineResult<Vec<EpisodeRecord>> {
        let start = Instant::now();
        let mut episodes = self.source.fetch_validated_episodes().await?;
        if episodes.is_empty() {
            info!(rows = 0, "loaded validated episodes");
            return Ok(episodes);
        }

        let ids: Vec<i64> = episodes.iter().filter_map(|e| e.id).collect();
        let mut diagnostics = self.source.fetch_diagnostics_map(&ids).await?;

        for episode in &mut episodes {
            let codes = episode
                .id
                .and_then(|id| diagnostics.remove(&id))
                .unwrap_or_default();
            episode.values.insert(
                self.schema.multicategorical.clone(),
                Value::Array(codes.into_iter().map(Value::String).collect()),
            );
        }

        info!(
            rows = episodes.len(),
            dur_ms = time::elapsed_ms(start) as u64,
            "loaded validated episodes"
        );
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::data::repo_memory::InMemoryEpisodeSource;

    #[tokio::test]
    async fn attaches_diagnoses_per_episode() {
        let schema = FeatureSchema::episodes();
        let source = InMemoryEpisodeSource::new();
        source
            .insert(
                EpisodeRecord::new(Some(1), Some("PERTINENTE".into())).with("sodio", 140),
                vec!["I21".into(), "E11".into()],
            )
            .await;
        source
            .insert(EpisodeRecord::new(Some(2), Some("NO PERTINENTE".into())), vec![])
            .await;
        source.insert(EpisodeRecord::new(Some(3), None), vec!["X".into()]).await;

        let loader = DataLoader::new(&source, &schema);
        let rows = loader.fetch_all_episodes().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("diagnostics"), &json!(["I21", "E11"]));
        assert_eq!(rows[1].get("diagnostics"), &json!([]));
        assert_eq!(rows[0].get("sodio"), &json!(140));
    }
}
