//! Loads the persisted artifacts of one version.

use tracing::debug;

use crate::common::error::PipelineResult;
use crate::data::cleaner::ImputationStats;
use crate::training::domain::VersionLabel;
use crate::training::repo_fs::ArtifactStore;

use super::domain::ArtifactBundle;

#[derive(Clone, Debug)]
pub struct ArtifactsLoader {
    store: ArtifactStore,
}

impl ArtifactsLoader {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    /// Blocking: read the model and the three encoders of `version`.
    ///
    /// Any missing file fails with `ArtifactNotFound` naming the version.
    pub fn run(&self, version: &VersionLabel) -> PipelineResult<ArtifactBundle> {
        let model = self.store.load_model(version)?;
        let encoders = self.store.load_encoders(version)?;
        let multilabel_classes = encoders.multilabel.classes.clone();
        debug!(%version, features = model.feature_names_in.len(), "artifacts loaded");
        Ok(ArtifactBundle {
            version: *version,
            model,
            categorical: encoders.categorical,
            multilabel: encoders.multilabel,
            numerical: encoders.numerical,
            multilabel_classes,
        })
    }

    /// Blocking: statistics frozen by the training run of `version`.
    pub fn load_imputation_stats(&self, version: &VersionLabel) -> PipelineResult<ImputationStats> {
        self.store.load_imputation_stats(version)
    }
}
