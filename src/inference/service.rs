//! Scores one incoming episode with the active version of a stage.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, Instrument};

use crate::common::config::AppCfg;
use crate::common::error::{PipelineError, PipelineResult};
use crate::common::time;
use crate::common::workers::run_blocking;
use crate::data::cleaner::{DataCleaner, ImputationMode};
use crate::data::domain::{CleanRecord, EpisodeRecord, FeatureSchema};
use crate::data::encoder::DataEncoder;
use crate::data::service::DataLoader;
use crate::session::Session;
use crate::training::domain::Stage;
use crate::training::repo_fs::ArtifactStore;

use super::artifacts::ArtifactsLoader;
use super::domain::{round2, ArtifactBundle, PredictionResult};

/// Artifacts of the active version and the cleaned incoming episode.
#[derive(Clone, Debug)]
pub struct PreparedEpisode {
    pub bundle: ArtifactBundle,
    pub record: CleanRecord,
}

#[derive(Clone)]
pub struct InferenceEngine {
    stage: Stage,
    schema: Arc<FeatureSchema>,
    loader: ArtifactsLoader,
    mode: ImputationMode,
}

impl InferenceEngine {
    pub fn new(stage: Stage, schema: Arc<FeatureSchema>, store: ArtifactStore, mode: ImputationMode) -> Self {
        Self {
            stage,
            schema,
            loader: ArtifactsLoader::new(store),
            mode,
        }
    }

    pub fn from_config(cfg: &AppCfg, schema: Arc<FeatureSchema>, stage: Stage) -> Self {
        Self::new(
            stage,
            schema,
            ArtifactStore::new(&cfg.artifacts_root),
            cfg.imputation_mode,
        )
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Score `episode` with the stage's active version.
    ///
    /// Fails with `NoTrainedVersion` or `NoActiveVersion` before touching any
    /// artifact.
    pub async fn run(&self, session: &Session, episode: &EpisodeRecord) -> PipelineResult<PredictionResult> {
        let start = Instant::now();
        let prepared = self.prepare(session, episode).await?;

        let span = info_span!("inference", stage = %self.stage, version = %prepared.bundle.version);
        async {
            let engine = self.clone();
            let result = run_blocking(move || engine.score(&prepared)).await?;
            info!(
                label = %result.label,
                probability = result.probability,
                dur_ms = time::elapsed_ms(start) as u64,
                "episode scored"
            );
            Ok::<_, PipelineError>(result)
        }
        .instrument(span)
        .await
    }

    /// Resolve the active version, load its artifacts and clean `episode`
    /// with live or frozen statistics.
    pub async fn prepare(&self, session: &Session, episode: &EpisodeRecord) -> PipelineResult<PreparedEpisode> {
        let stage = self.stage;

        if session.registry.list_by_stage(stage).await?.is_empty() {
            return Err(PipelineError::NoTrainedVersion { stage });
        }
        let active = session
            .registry
            .get_active_version_for_stage(stage)
            .await?
            .ok_or(PipelineError::NoActiveVersion { stage })?;
        let version = active.version;

        let span = info_span!("prepare", %stage, %version, mode = %self.mode);
        async {
            let loader = self.loader.clone();
            let bundle = run_blocking(move || loader.run(&version)).await?;

            let reference = match self.mode {
                ImputationMode::Live => Some(
                    DataLoader::new(session.episodes.as_ref(), &self.schema)
                        .fetch_all_episodes()
                        .await?,
                ),
                ImputationMode::Frozen => None,
            };

            let engine = self.clone();
            let episode = episode.clone();
            run_blocking(move || {
                let record = engine.clean(&bundle, reference.as_deref(), &episode)?;
                Ok(PreparedEpisode { bundle, record })
            })
            .await
        }
        .instrument(span)
        .await
    }

    /// Clean with live or frozen statistics.
    fn clean(
        &self,
        bundle: &ArtifactBundle,
        reference: Option<&[EpisodeRecord]>,
        episode: &EpisodeRecord,
    ) -> PipelineResult<CleanRecord> {
        let cleaner = DataCleaner::new(self.schema.clone());
        let known = bundle.known_labels();
        match reference {
            Some(reference) => Ok(cleaner.clean_for_inference(reference, episode, &known)),
            None => {
                let stats = self.loader.load_imputation_stats(&bundle.version)?;
                Ok(cleaner.clean_with_stats(episode, &stats, &known))
            }
        }
    }

    fn score(&self, prepared: &PreparedEpisode) -> PipelineResult<PredictionResult> {
        let bundle = &prepared.bundle;
        let x = DataEncoder::new(self.schema.clone()).encode_for_inference(
            &prepared.record,
            &bundle.encoders(),
            &bundle.model.feature_names_in,
        )?;

        let model = &bundle.model;
        let label = model
            .predict(&x)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::internal("model returned no prediction"))?;
        let proba = model
            .predict_proba(&x)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::internal("model returned no probabilities"))?;
        let index = model
            .classes
            .iter()
            .position(|c| *c == label)
            .ok_or_else(|| PipelineError::internal(format!("label '{label}' is not a model class")))?;

        Ok(PredictionResult {
            prediction: index,
            probability: round2(proba[index]),
            label,
        })
    }
}

