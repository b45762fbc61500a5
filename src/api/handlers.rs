//! Boundary facade translating pipeline calls into response envelopes.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::common::config::AppCfg;
use crate::common::error::{ErrorCode, PipelineError};
use crate::data::domain::{EpisodeRecord, FeatureSchema};
use crate::inference::domain::PredictionResult;
use crate::inference::service::InferenceEngine;
use crate::session::Session;
use crate::training::domain::{ModelVersionRecord, Stage, VersionLabel};
use crate::training::repo_fs::ArtifactStore;
use crate::training::service::TrainingOrchestrator;
use crate::training::versioner::{ModelVersioner, StageLocks};

pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_UNPROCESSABLE: u16 = 422;
pub const STATUS_INTERNAL: u16 = 500;

/// Error body returned to callers.
#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[error("{message} (status {status}, code {code})")]
pub struct ApiError {
    pub status: u16,
    pub code: u32,
    pub message: String,
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let code = err.code();
        let status = match code {
            ErrorCode::InvalidInput => STATUS_UNPROCESSABLE,
            ErrorCode::VersionNotFound => STATUS_NOT_FOUND,
            _ => STATUS_INTERNAL,
        };
        if status == STATUS_INTERNAL {
            error!(code = code as u32, error = %err, "pipeline call failed");
        }
        Self {
            status,
            code: code as u32,
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Outcome of deleting a version.
#[derive(Clone, Debug, Serialize)]
pub struct DeleteOutcome {
    pub deleted: VersionLabel,
    pub artifacts_removed: usize,
    /// Version re-activated because the deleted one was active.
    pub reactivated: Option<ModelVersionRecord>,
}

/// Entry points for training, prediction and version management.
pub struct PertinenceService {
    cfg: AppCfg,
    schema: Arc<FeatureSchema>,
    session: Session,
    locks: StageLocks,
}

impl PertinenceService {
    pub fn new(cfg: AppCfg, schema: Arc<FeatureSchema>, session: Session) -> Self {
        Self {
            cfg,
            schema,
            session,
            locks: StageLocks::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn train(&self, stage: Stage) -> ApiResult<ModelVersionRecord> {
        let orchestrator =
            TrainingOrchestrator::from_config(&self.cfg, self.schema.clone(), stage, self.locks.clone());
        Ok(orchestrator.run(&self.session).await?)
    }

    /// Score a JSON episode; `stage` defaults to the configured inference stage.
    pub async fn predict(&self, payload: Value, stage: Option<Stage>) -> ApiResult<PredictionResult> {
        let episode = EpisodeRecord::from_json(&self.schema, payload)?;
        let stage = stage.unwrap_or(self.cfg.inference_stage);
        let engine = InferenceEngine::from_config(&self.cfg, self.schema.clone(), stage);
        Ok(engine.run(&self.session, &episode).await?)
    }

    pub async fn list_versions(&self, stage: Option<Stage>) -> ApiResult<Vec<ModelVersionRecord>> {
        let rows = match stage {
            Some(stage) => self.session.registry.list_by_stage(stage).await?,
            None => self.session.registry.list_all().await?,
        };
        Ok(rows)
    }

    pub async fn activate(&self, version: &str) -> ApiResult<ModelVersionRecord> {
        let version: VersionLabel = version.parse()?;
        let _guard = self.locks.acquire(version.stage).await?;
        let versioner = ModelVersioner::new(self.session.registry.as_ref());
        Ok(versioner.activate_version(&version).await?)
    }

    /// Delete the registry row and the artifacts of `version`.
    pub async fn delete(&self, version: &str) -> ApiResult<DeleteOutcome> {
        let version: VersionLabel = version.parse()?;
        let _guard = self.locks.acquire(version.stage).await?;
        let versioner = ModelVersioner::new(self.session.registry.as_ref());
        let reactivated = versioner.delete_version(&version).await?;
        let artifacts_removed = ArtifactStore::new(&self.cfg.artifacts_root).remove_version(&version)?;
        Ok(DeleteOutcome {
            deleted: version,
            artifacts_removed,
            reactivated,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn status_follows_error_class() {
        let e: ApiError = PipelineError::invalid("bad payload").into();
        assert_eq!((e.status, e.code), (422, 6));

        let e: ApiError = PipelineError::VersionNotFound("dev_v9".into()).into();
        assert_eq!(e.status, 404);
        assert!(e.message.contains("dev_v9"));

        let e: ApiError = PipelineError::NoTrainedVersion { stage: Stage::Dev }.into();
        assert_eq!((e.status, e.code), (500, 2));

        let e: ApiError = PipelineError::ArtifactNotFound {
            version: "prod_v1".into(),
            path: PathBuf::from("x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert_eq!((e.status, e.code), (500, 1));
    }

    #[tokio::test]
    async fn malformed_payload_and_label_are_unprocessable() {
        let (session, _) = Session::in_memory();
        let service = PertinenceService::new(AppCfg::default(), Arc::new(FeatureSchema::episodes()), session);

        let err = service.predict(Value::from(3), None).await.unwrap_err();
        assert_eq!(err.status, 422);

        let err = service.activate("staging_v1").await.unwrap_err();
        assert_eq!(err.status, 422);

        let err = service.delete("dev_v7").await.unwrap_err();
        assert_eq!(err.status, 404);
    }
}
