//! In-memory version registry for tests and embedding.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::error::{PipelineError, PipelineResult};

use super::domain::{ModelVersionRecord, ModelVersionRepository, NewModelVersion, Stage, VersionLabel, VersionPatch};

#[derive(Default)]
struct State {
    next_id: i64,
    rows: Vec<ModelVersionRecord>,
}

impl State {
    fn check_single_active(&self, stage: Stage, except_id: Option<i64>) -> PipelineResult<()> {
        let clash = self
            .rows
            .iter()
            .any(|r| r.stage == stage && r.active && Some(r.id) != except_id);
        if clash {
            return Err(PipelineError::RegistryIntegrity(format!(
                "stage '{stage}' already has an active version"
            )));
        }
        Ok(())
    }
}

/// Registry that keeps rows in a vector behind an async lock.
#[derive(Default)]
pub struct InMemoryVersionRegistry {
    state: RwLock<State>,
}

impl InMemoryVersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut rows: Vec<ModelVersionRecord>) -> Vec<ModelVersionRecord> {
    rows.sort_by(|a, b| b.id.cmp(&a.id));
    rows
}

#[async_trait]
impl ModelVersionRepository for InMemoryVersionRegistry {
    async fn create(&self, new: NewModelVersion) -> PipelineResult<ModelVersionRecord> {
        let mut state = self.state.write().await;
        if state.rows.iter().any(|r| r.version == new.version) {
            return Err(PipelineError::RegistryIntegrity(format!(
                "version '{}' already exists",
                new.version
            )));
        }
        if new.active {
            state.check_single_active(new.stage(), None)?;
        }
        state.next_id += 1;
        let record = ModelVersionRecord {
            id: state.next_id,
            stage: new.stage(),
            version: new.version,
            metric: new.metric,
            metric_value: new.metric_value,
            trained_at: new.trained_at,
            active: new.active,
        };
        state.rows.push(record.clone());
        Ok(record)
    }

    async fn get_by_version(&self, version: &VersionLabel) -> PipelineResult<Option<ModelVersionRecord>> {
        let state = self.state.read().await;
        Ok(state.rows.iter().find(|r| &r.version == version).cloned())
    }

    async fn get_active_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>> {
        let state = self.state.read().await;
        Ok(state.rows.iter().find(|r| r.stage == stage && r.active).cloned())
    }

    async fn get_latest_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.stage == stage)
            .max_by_key(|r| r.version.sequence)
            .cloned())
    }

    async fn list_all(&self) -> PipelineResult<Vec<ModelVersionRecord>> {
        let state = self.state.read().await;
        Ok(newest_first(state.rows.clone()))
    }

    async fn list_by_stage(&self, stage: Stage) -> PipelineResult<Vec<ModelVersionRecord>> {
        let state = self.state.read().await;
        Ok(newest_first(
            state.rows.iter().filter(|r| r.stage == stage).cloned().collect(),
        ))
    }

    async fn update_partial(&self, id: i64, patch: VersionPatch) -> PipelineResult<ModelVersionRecord> {
        let mut state = self.state.write().await;
        let Some(pos) = state.rows.iter().position(|r| r.id == id) else {
            return Err(PipelineError::storage(format!("model version row {id} not found")));
        };
        let mut updated = state.rows[pos].clone();
        patch.apply(&mut updated);
        if updated.active {
            state.check_single_active(updated.stage, Some(id))?;
        }
        state.rows[pos] = updated.clone();
        Ok(updated)
    }

    async fn delete_by_version(&self, version: &VersionLabel) -> PipelineResult<bool> {
        let mut state = self.state.write().await;
        let before = state.rows.len();
        state.rows.retain(|r| &r.version != version);
        Ok(state.rows.len() != before)
    }

    async fn delete_by_stage(&self, stage: Stage) -> PipelineResult<u64> {
        let mut state = self.state.write().await;
        let before = state.rows.len();
        state.rows.retain(|r| r.stage != stage);
        Ok((before - state.rows.len()) as u64)
    }
}
