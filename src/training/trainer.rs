//! Fits the fixed model family and persists it under its version label.

use std::time::Instant;

use tracing::info;

use crate::common::error::PipelineResult;
use crate::common::time;
use crate::data::domain::FeatureMatrix;

use super::domain::VersionLabel;
use super::forest::{ForestConfig, RandomForestClassifier};
use super::repo_fs::ArtifactStore;

pub struct ModelTrainer<'a> {
    config: ForestConfig,
    store: &'a ArtifactStore,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(config: ForestConfig, store: &'a ArtifactStore) -> Self {
        Self { config, store }
    }

    /// Blocking: fits every tree on the calling thread, then writes the model.
    pub fn train_model(
        &self,
        x_train: &FeatureMatrix,
        y_train: &[String],
        version: &VersionLabel,
    ) -> PipelineResult<RandomForestClassifier> {
        let start = Instant::now();
        let model = RandomForestClassifier::fit(self.config, x_train, y_train)?;
        let path = self.store.save_model(version, &model)?;
        info!(
            %version,
            trees = model.n_trees(),
            features = model.feature_names_in.len(),
            path = %path.display(),
            dur_ms = time::elapsed_ms(start) as u64,
            "model trained"
        );
        Ok(model)
    }
}
