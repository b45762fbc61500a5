//! In-memory episode source for tests and embedding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::error::PipelineResult;

use super::domain::{EpisodeRecord, EpisodeSource};

/// Holds episodes and their diagnoses in memory. All reads are linear scans.
#[derive(Default)]
pub struct InMemoryEpisodeSource {
    episodes: RwLock<Vec<EpisodeRecord>>,
    diagnostics: RwLock<BTreeMap<i64, Vec<String>>>,
}

impl InMemoryEpisodeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an episode; its diagnosis codes are kept in the separate join map.
    pub async fn insert(&self, episode: EpisodeRecord, diagnoses: Vec<String>) {
        if let Some(id) = episode.id {
            self.diagnostics.write().await.insert(id, diagnoses);
        }
        self.episodes.write().await.push(episode);
    }
}

#[async_trait]
impl EpisodeSource for InMemoryEpisodeSource {
    async fn fetch_validated_episodes(&self) -> PipelineResult<Vec<EpisodeRecord>> {
        let episodes = self.episodes.read().await;
        Ok(episodes
            .iter()
            .filter(|e| e.label.is_some())
            .cloned()
            .collect())
    }

    async fn fetch_diagnostics_map(
        &self,
        episode_ids: &[i64],
    ) -> PipelineResult<BTreeMap<i64, Vec<String>>> {
        let diagnostics = self.diagnostics.read().await;
        Ok(episode_ids
            .iter()
            .filter_map(|id| diagnostics.get(id).map(|codes| (*id, codes.clone())))
            .collect())
    }
}
