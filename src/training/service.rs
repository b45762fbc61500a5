//! Orchestrates one training run end to end for a single stage.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, Instrument};

use crate::common::config::AppCfg;
use crate::common::error::{PipelineError, PipelineResult};
use crate::common::time;
use crate::common::workers::run_blocking;
use crate::data::cleaner::DataCleaner;
use crate::data::domain::{EpisodeRecord, FeatureSchema};
use crate::data::encoder::DataEncoder;
use crate::data::service::DataLoader;
use crate::data::splitter::DataSplitter;
use crate::evaluation::domain::MetricInfo;
use crate::evaluation::service::ModelEvaluator;
use crate::session::Session;

use super::domain::{ModelVersionRecord, Stage, VersionLabel};
use super::forest::ForestConfig;
use super::repo_fs::ArtifactStore;
use super::trainer::ModelTrainer;
use super::versioner::{ModelVersioner, StageLocks};

/// Runs label, load, clean, split, encode, train, evaluate and register.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    stage: Stage,
    schema: Arc<FeatureSchema>,
    store: ArtifactStore,
    splitter: DataSplitter,
    forest: ForestConfig,
    locks: StageLocks,
}

impl TrainingOrchestrator {
    pub fn new(
        stage: Stage,
        schema: Arc<FeatureSchema>,
        store: ArtifactStore,
        splitter: DataSplitter,
        forest: ForestConfig,
        locks: StageLocks,
    ) -> Self {
        Self {
            stage,
            schema,
            store,
            splitter,
            forest,
            locks,
        }
    }

    pub fn from_config(cfg: &AppCfg, schema: Arc<FeatureSchema>, stage: Stage, locks: StageLocks) -> Self {
        Self::new(
            stage,
            schema,
            ArtifactStore::new(&cfg.artifacts_root),
            cfg.splitter(),
            cfg.forest,
            locks,
        )
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Train and register a new version. The stage lock is held for the
    /// whole run so label generation and registration cannot interleave.
    pub async fn run(&self, session: &Session) -> PipelineResult<ModelVersionRecord> {
        let start = Instant::now();
        let _guard = self.locks.acquire(self.stage).await?;

        let versioner = ModelVersioner::new(session.registry.as_ref());
        let version = versioner.generate_new_version_label(self.stage).await?;

        let span = info_span!("training", stage = %self.stage, %version);
        async {
            let episodes = DataLoader::new(session.episodes.as_ref(), &self.schema)
                .fetch_all_episodes()
                .await?;

            let fit = self.clone();
            let metric = run_blocking(move || fit.fit_and_persist(&episodes, &version)).await?;

            let record = versioner
                .save_model_metrics(&metric, version, time::today())
                .await?;
            info!(
                active = record.active,
                value = record.metric_value,
                dur_ms = time::elapsed_ms(start) as u64,
                "training run finished"
            );
            Ok::<_, PipelineError>(record)
        }
        .instrument(span)
        .await
    }

    /// Blocking part of a run: everything from cleaning to evaluation,
    /// writing the five artifacts of `version` on the way.
    fn fit_and_persist(&self, episodes: &[EpisodeRecord], version: &VersionLabel) -> PipelineResult<MetricInfo> {
        let cleaned = DataCleaner::new(self.schema.clone()).run_preprocessing(episodes);
        self.store.save_imputation_stats(version, &cleaned.stats)?;

        let split = self.splitter.build_train_test_data(&cleaned.records)?;

        let encoded = DataEncoder::new(self.schema.clone()).encode(&split.x_train, &split.x_test)?;
        self.store.save_encoders(version, &encoded.encoders)?;

        let model = ModelTrainer::new(self.forest, &self.store).train_model(
            &encoded.x_train,
            &split.y_train,
            version,
        )?;

        ModelEvaluator::new().evaluate_model(&model, &encoded.x_test, &split.y_test)
    }
}
