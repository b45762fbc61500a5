//! Version labelling and the per-stage promotion state machine.
//!
//! Per stage: no versions, versions without an active one, one active version.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::common::error::{PipelineError, PipelineResult};
use crate::evaluation::domain::MetricInfo;

use super::domain::{ModelVersionRecord, ModelVersionRepository, NewModelVersion, Stage, VersionLabel, VersionPatch};

/// Outcome of comparing a new metric against the stage's current state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Promotion {
    /// Stage had no versions; the first one is always active.
    FirstVersion,
    /// Stage had versions but none active.
    NoActiveVersion,
    /// New metric met or beat the active one, which gets deactivated.
    Replace { previous_id: i64 },
    /// New metric was worse; the row is kept inactive for history.
    KeepInactive,
}

impl Promotion {
    pub fn activates(&self) -> bool {
        !matches!(self, Promotion::KeepInactive)
    }
}

/// Pure promotion decision. Equal metrics promote the newer version.
pub fn decide_promotion(
    has_versions: bool,
    active: Option<&ModelVersionRecord>,
    new_value: f64,
) -> Promotion {
    match (has_versions, active) {
        (false, _) => Promotion::FirstVersion,
        (true, None) => Promotion::NoActiveVersion,
        (true, Some(current)) if new_value >= current.metric_value => Promotion::Replace {
            previous_id: current.id,
        },
        (true, Some(_)) => Promotion::KeepInactive,
    }
}

/// Generates labels and applies promotion against a registry.
pub struct ModelVersioner<'a> {
    registry: &'a dyn ModelVersionRepository,
}

impl<'a> ModelVersioner<'a> {
    pub fn new(registry: &'a dyn ModelVersionRepository) -> Self {
        Self { registry }
    }

    /// Next label after the stage's highest sequence, or `{stage}_v1`.
    pub async fn generate_new_version_label(&self, stage: Stage) -> PipelineResult<VersionLabel> {
        let label = match self.registry.get_latest_version_for_stage(stage).await? {
            Some(latest) => latest.version.next(),
            None => VersionLabel::first(stage),
        };
        info!(%stage, version = %label, "generated version label");
        Ok(label)
    }

    /// Register a trained version and promote it when it qualifies.
    pub async fn save_model_metrics(
        &self,
        metric: &MetricInfo,
        version: VersionLabel,
        trained_at: NaiveDate,
    ) -> PipelineResult<ModelVersionRecord> {
        let stage = version.stage;
        let has_versions = !self.registry.list_by_stage(stage).await?.is_empty();
        let active = self.registry.get_active_version_for_stage(stage).await?;
        let decision = decide_promotion(has_versions, active.as_ref(), metric.value);

        if let Promotion::Replace { previous_id } = decision {
            self.registry
                .update_partial(previous_id, VersionPatch::active(false))
                .await?;
        }

        let created = self
            .registry
            .create(NewModelVersion {
                version,
                metric: metric.metric.clone(),
                metric_value: metric.value,
                trained_at,
                active: decision.activates(),
            })
            .await;

        let record = match (created, decision) {
            (Ok(record), _) => record,
            (Err(err), Promotion::Replace { previous_id }) => {
                // Put the previous version back so the stage keeps serving.
                if let Err(restore) = self
                    .registry
                    .update_partial(previous_id, VersionPatch::active(true))
                    .await
                {
                    warn!(%stage, error = %restore, "failed to restore previous active version");
                }
                return Err(err);
            }
            (Err(err), _) => return Err(err),
        };

        info!(
            %stage,
            version = %record.version,
            metric = %record.metric,
            value = record.metric_value,
            previous = active.as_ref().map(|a| a.metric_value),
            decision = ?decision,
            active = record.active,
            "registered model version"
        );
        Ok(record)
    }

    /// Manually make `version` the active one for its stage.
    pub async fn activate_version(&self, version: &VersionLabel) -> PipelineResult<ModelVersionRecord> {
        let target = self
            .registry
            .get_by_version(version)
            .await?
            .ok_or_else(|| PipelineError::VersionNotFound(version.to_string()))?;
        if target.active {
            return Ok(target);
        }
        if let Some(current) = self.registry.get_active_version_for_stage(target.stage).await? {
            self.registry
                .update_partial(current.id, VersionPatch::active(false))
                .await?;
        }
        let record = self
            .registry
            .update_partial(target.id, VersionPatch::active(true))
            .await?;
        info!(stage = %record.stage, version = %record.version, "version activated");
        Ok(record)
    }

    /// Hard delete. Deleting the active row re-activates the remaining row
    /// with the best `(metric_value, trained_at)`; returns the new active row.
    pub async fn delete_version(&self, version: &VersionLabel) -> PipelineResult<Option<ModelVersionRecord>> {
        let target = self
            .registry
            .get_by_version(version)
            .await?
            .ok_or_else(|| PipelineError::VersionNotFound(version.to_string()))?;
        self.registry.delete_by_version(version).await?;
        info!(stage = %target.stage, %version, was_active = target.active, "version deleted");

        if !target.active {
            return Ok(None);
        }

        let best = self
            .registry
            .list_by_stage(target.stage)
            .await?
            .into_iter()
            .max_by(|a, b| {
                a.metric_value
                    .total_cmp(&b.metric_value)
                    .then(a.trained_at.cmp(&b.trained_at))
                    .then(a.id.cmp(&b.id))
            });

        match best {
            Some(best) => {
                let record = self
                    .registry
                    .update_partial(best.id, VersionPatch::active(true))
                    .await?;
                info!(stage = %record.stage, version = %record.version, "re-activated best remaining version");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

/// One async mutex per stage, held across a whole training run so two runs
/// on the same stage cannot compute the same label.
#[derive(Clone, Default)]
pub struct StageLocks {
    locks: Arc<std::sync::Mutex<HashMap<Stage, Arc<Mutex<()>>>>>,
}

impl StageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, stage: Stage) -> PipelineResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| PipelineError::internal("stage lock table poisoned"))?;
            locks.entry(stage).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }
}
