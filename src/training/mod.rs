//! Training domain: model fitting, artifact persistence and the version registry.

pub mod domain;
pub mod forest;
pub mod registry_memory;
pub mod registry_sqlite;
pub mod repo_fs;
pub mod service;
pub mod trainer;
pub mod versioner;

pub use domain::{ModelVersionRecord, ModelVersionRepository, Stage, VersionLabel};
pub use forest::{ForestConfig, RandomForestClassifier};
pub use repo_fs::ArtifactStore;
pub use service::TrainingOrchestrator;
pub use versioner::{ModelVersioner, StageLocks};
