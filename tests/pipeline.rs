//! End-to-end tests of the training and inference pipeline.
//!
//! Each test:
//! 1. Seeds an in-memory episode source with a separable synthetic batch
//! 2. Trains through the service facade into a temporary artifact root
//! 3. Scores episodes and inspects the registry and the artifact tree

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use pertinence::common::config::AppCfg;
use pertinence::common::ErrorCode;
use pertinence::data::cleaner::ImputationMode;
use pertinence::data::domain::{EpisodeRecord, FeatureSchema};
use pertinence::data::repo_memory::InMemoryEpisodeSource;
use pertinence::inference::InferenceEngine;
use pertinence::training::domain::{Stage, VersionLabel, VersionPatch};
use pertinence::training::forest::ForestConfig;
use pertinence::training::repo_fs::{ArtifactStore, EncoderKind};
use pertinence::{PertinenceService, Session};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(root: &Path, mode: ImputationMode) -> AppCfg {
    AppCfg {
        artifacts_root: root.to_path_buf(),
        forest: ForestConfig {
            n_estimators: 12,
            ..ForestConfig::default()
        },
        imputation_mode: mode,
        inference_stage: Stage::Dev,
        ..AppCfg::default()
    }
}

/// Pertinent episodes have high pcr, vasoactive drugs and an I21 diagnosis.
async fn seed(source: &InMemoryEpisodeSource, n: i64) {
    for i in 0..n {
        let pertinent = i % 2 == 0;
        let label = if pertinent { "PERTINENTE" } else { "NO PERTINENTE" };
        let mut episode = EpisodeRecord::new(Some(i + 1), Some(label.to_string()))
            .with("sodio", 135 + i % 7)
            .with("dva", if pertinent { "Si" } else { "No" })
            .with("tipo", if pertinent { "urgencia" } else { "electivo" })
            .with("triage", i % 5);
        // Leave some gaps for the imputer.
        if i % 6 != 0 {
            episode = episode.with("pcr", if pertinent { 120.0 + i as f64 } else { 4.0 + (i % 3) as f64 });
        }
        let diagnoses = if pertinent {
            vec!["I21".to_string(), "E11".to_string()]
        } else {
            vec!["Z00".to_string()]
        };
        source.insert(episode, diagnoses).await;
    }
}

async fn service(root: &Path, mode: ImputationMode) -> PertinenceService {
    seeded_service(root, mode).await.0
}

/// Like `service`, also handing back the episode source for later inserts.
async fn seeded_service(root: &Path, mode: ImputationMode) -> (PertinenceService, Arc<InMemoryEpisodeSource>) {
    let (session, source) = Session::in_memory();
    seed(&source, 40).await;
    let service = PertinenceService::new(config(root, mode), Arc::new(FeatureSchema::episodes()), session);
    (service, source)
}

fn engine(root: &Path, mode: ImputationMode) -> InferenceEngine {
    InferenceEngine::new(
        Stage::Dev,
        Arc::new(FeatureSchema::episodes()),
        ArtifactStore::new(root),
        mode,
    )
}

fn column(names: &[String], wanted: &str) -> usize {
    names.iter().position(|c| c == wanted).unwrap()
}

fn pertinent_payload() -> Value {
    json!({
        "id_episodio": 999,
        "pcr": "150",
        "sodio": null,
        "dva": "Sí",
        "tipo": "Urgencia",
        "triage": 2,
        "diagnostics": ["I21", "UNSEEN"]
    })
}

// ---------------------------------------------------------------------------
// Training and promotion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retraining_on_same_data_promotes_newer_version() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;

    let v1 = service.train(Stage::Dev).await.unwrap();
    assert_eq!(v1.version.to_string(), "dev_v1");
    assert!(v1.active);
    assert_eq!(v1.metric, "f1_score");
    assert!(v1.metric_value > 0.9, "separable data should score high: {}", v1.metric_value);

    // Same seed and batch give the same metric; the tie goes to the newer version.
    let v2 = service.train(Stage::Dev).await.unwrap();
    assert_eq!(v2.version.to_string(), "dev_v2");
    assert_eq!(v2.metric_value, v1.metric_value);
    assert!(v2.active);

    let rows = service.list_versions(Some(Stage::Dev)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|r| r.active).count(), 1);
    assert!(service.list_versions(Some(Stage::Prod)).await.unwrap().is_empty());
}

#[tokio::test]
async fn training_writes_all_version_artifacts() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    let record = service.train(Stage::Prod).await.unwrap();

    let store = ArtifactStore::new(dir.path());
    assert!(store.model_path(&record.version).is_file());
    for kind in EncoderKind::ALL {
        assert!(store.encoder_path(&record.version, kind).is_file(), "{kind:?} missing");
    }
    let model = store.load_model(&record.version).unwrap();
    assert_eq!(model.classes, vec!["NO PERTINENTE", "PERTINENTE"]);
    assert!(model.feature_names_in.contains(&"diagnostics_I21".to_string()));
}

#[tokio::test]
async fn stages_train_concurrently_without_label_clashes() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;

    let (a, b, c) = tokio::join!(
        service.train(Stage::Dev),
        service.train(Stage::Dev),
        service.train(Stage::Prod)
    );
    let mut dev = vec![a.unwrap().version.to_string(), b.unwrap().version.to_string()];
    dev.sort();
    assert_eq!(dev, vec!["dev_v1", "dev_v2"]);
    assert_eq!(c.unwrap().version.to_string(), "prod_v1");
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prediction_is_deterministic_and_well_formed() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    service.train(Stage::Dev).await.unwrap();

    let first = service.predict(pertinent_payload(), None).await.unwrap();
    let second = service.predict(pertinent_payload(), Some(Stage::Dev)).await.unwrap();
    assert_eq!(first, second);

    assert_eq!(first.label, "PERTINENTE");
    assert_eq!(first.prediction, 1);
    assert!((0.0..=1.0).contains(&first.probability));
    assert_eq!((first.probability * 100.0).round_ties_even() / 100.0, first.probability);
}

#[tokio::test]
async fn frozen_mode_scores_with_training_statistics() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Frozen).await;
    service.train(Stage::Dev).await.unwrap();

    let result = service
        .predict(json!({ "pcr": 3.0, "dva": "No", "tipo": "electivo", "diagnostics": ["Z00"] }), None)
        .await
        .unwrap();
    assert_eq!(result.label, "NO PERTINENTE");
    assert_eq!(result.prediction, 0);

    let again = service
        .predict(json!({ "pcr": 3.0, "dva": "No", "tipo": "electivo", "diagnostics": ["Z00"] }), None)
        .await
        .unwrap();
    assert_eq!(result, again);
}

#[tokio::test]
async fn frozen_statistics_ignore_episodes_added_after_training() {
    let dir = TempDir::new().unwrap();
    let (service, source) = seeded_service(dir.path(), ImputationMode::Live).await;
    let record = service.train(Stage::Dev).await.unwrap();
    let stats = ArtifactStore::new(dir.path())
        .load_imputation_stats(&record.version)
        .unwrap();

    let schema = FeatureSchema::episodes();
    let pcr = column(&schema.numeric, "pcr");
    let dva = column(&schema.binary, "dva");
    let tipo = column(&schema.categorical, "tipo");

    let blank = EpisodeRecord::new(None, None).with("dva", "NULL");
    let frozen = engine(dir.path(), ImputationMode::Frozen);
    let live = engine(dir.path(), ImputationMode::Live);
    let session = service.session();

    let frozen_before = frozen.prepare(session, &blank).await.unwrap().record;
    assert_eq!(frozen_before.numeric[pcr], stats.numeric_means["pcr"]);
    assert_eq!(frozen_before.binary[dva], stats.binary_modes["dva"]);
    assert_eq!(frozen_before.categorical[tipo], stats.categorical_modes["tipo"].to_uppercase());
    assert_eq!(live.prepare(session, &blank).await.unwrap().record, frozen_before);

    // Shift the pcr mean and the dva and tipo modes of the stored batch.
    for i in 0..25 {
        let episode = EpisodeRecord::new(Some(1000 + i), Some("PERTINENTE".to_string()))
            .with("pcr", 1000.0)
            .with("dva", "Si")
            .with("tipo", "traslado");
        source.insert(episode, vec!["I21".to_string()]).await;
    }

    let frozen_after = frozen.prepare(session, &blank).await.unwrap().record;
    assert_eq!(frozen_after, frozen_before);

    let live_after = live.prepare(session, &blank).await.unwrap().record;
    assert!(
        live_after.numeric[pcr] > frozen_before.numeric[pcr] + 100.0,
        "live mean should follow the new batch: {}",
        live_after.numeric[pcr]
    );
    assert_eq!(live_after.binary[dva], 1.0);
    assert_eq!(live_after.categorical[tipo], "TRASLADO");
    assert_ne!(frozen_after.binary[dva], 1.0);
    assert_ne!(frozen_after.categorical[tipo], "TRASLADO");

    // Both modes still score.
    service.predict(json!({ "dva": "NULL" }), None).await.unwrap();
    frozen.run(session, &blank).await.unwrap();
}

#[tokio::test]
async fn inference_without_versions_reports_no_trained_version() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    let err = service.predict(pertinent_payload(), Some(Stage::Prod)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoTrainedVersion as u32);
    assert_eq!(err.status, 500);
}

#[tokio::test]
async fn inference_without_active_version_reports_no_active_version() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    let record = service.train(Stage::Dev).await.unwrap();
    service
        .session()
        .registry
        .update_partial(record.id, VersionPatch::active(false))
        .await
        .unwrap();

    let err = service.predict(pertinent_payload(), None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NoActiveVersion as u32);
}

#[tokio::test]
async fn missing_artifact_names_version_and_remedy() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    let record = service.train(Stage::Dev).await.unwrap();

    let store = ArtifactStore::new(dir.path());
    std::fs::remove_file(store.encoder_path(&record.version, EncoderKind::Numerical)).unwrap();

    let err = service.predict(pertinent_payload(), None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ArtifactNotFound as u32);
    assert!(err.message.contains("dev_v1"));
    assert!(err.message.contains("train or activate another version"));
}

// ---------------------------------------------------------------------------
// Version management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleting_active_version_falls_back_and_removes_files() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    service.train(Stage::Dev).await.unwrap();
    let v2 = service.train(Stage::Dev).await.unwrap();
    assert!(v2.active);

    let outcome = service.delete("dev_v2").await.unwrap();
    assert_eq!(outcome.deleted, VersionLabel::new(Stage::Dev, 2));
    assert_eq!(outcome.artifacts_removed, 5);
    let reactivated = outcome.reactivated.unwrap();
    assert_eq!(reactivated.version.to_string(), "dev_v1");

    // Scoring keeps working on the re-activated version.
    service.predict(pertinent_payload(), None).await.unwrap();

    // The next label continues from the highest remaining sequence.
    let v = service.train(Stage::Dev).await.unwrap();
    assert_eq!(v.version.to_string(), "dev_v2");
}

#[tokio::test]
async fn manual_activation_switches_serving_version() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), ImputationMode::Live).await;
    service.train(Stage::Dev).await.unwrap();
    service.train(Stage::Dev).await.unwrap();

    let activated = service.activate("dev_v1").await.unwrap();
    assert!(activated.active);
    let active: Vec<String> = service
        .list_versions(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.active)
        .map(|r| r.version.to_string())
        .collect();
    assert_eq!(active, vec!["dev_v1"]);

    let err = service.activate("dev_v9").await.unwrap_err();
    assert_eq!(err.status, 404);
}
