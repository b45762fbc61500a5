//! Runtime configuration loaded from the environment and an optional `.env` file.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::common::error::{PipelineError, PipelineResult};
use crate::data::cleaner::ImputationMode;
use crate::data::splitter::DataSplitter;
use crate::training::domain::Stage;
use crate::training::forest::ForestConfig;

const PREFIX: &str = "PERTINENCE_";

/// Snapshot of configuration values consumed by the pipeline.
#[derive(Clone, Debug)]
pub struct AppCfg {
    pub database_url: String,
    /// Directory holding `models_repository/` and `encoders_repository/`.
    pub artifacts_root: PathBuf,
    pub log_filter: String,
    pub train_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestConfig,
    pub imputation_mode: ImputationMode,
    pub inference_stage: Stage,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            database_url: "sqlite://pertinence.db".to_string(),
            artifacts_root: PathBuf::from("./artifacts"),
            log_filter: "info".to_string(),
            train_fraction: DataSplitter::DEFAULT_TRAIN_FRACTION,
            split_seed: DataSplitter::DEFAULT_SEED,
            forest: ForestConfig::default(),
            imputation_mode: ImputationMode::Live,
            inference_stage: Stage::Prod,
        }
    }
}

impl AppCfg {
    /// Create a configuration snapshot from the process environment.
    pub fn load() -> PipelineResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a snapshot from an arbitrary key lookup; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("{PREFIX}{key}"));
        let defaults = Self::default();

        let train_fraction = parse_or(&get, "TRAIN_FRACTION", defaults.train_fraction)?;
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(PipelineError::Config(format!(
                "{PREFIX}TRAIN_FRACTION must be in (0, 1), got {train_fraction}"
            )));
        }

        let forest = ForestConfig {
            n_estimators: parse_or(&get, "N_ESTIMATORS", defaults.forest.n_estimators)?,
            max_depth: parse_or(&get, "MAX_DEPTH", defaults.forest.max_depth)?,
            seed: parse_or(&get, "MODEL_SEED", defaults.forest.seed)?,
            ..defaults.forest
        };
        if forest.n_estimators == 0 {
            return Err(PipelineError::Config(format!(
                "{PREFIX}N_ESTIMATORS must be positive"
            )));
        }

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            artifacts_root: get("ARTIFACTS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_root),
            log_filter: get("LOG").unwrap_or(defaults.log_filter),
            train_fraction,
            split_seed: parse_or(&get, "SPLIT_SEED", defaults.split_seed)?,
            forest,
            imputation_mode: parse_or(&get, "IMPUTATION_MODE", defaults.imputation_mode)?,
            inference_stage: parse_or(&get, "INFERENCE_STAGE", defaults.inference_stage)?,
        })
    }

    pub fn splitter(&self) -> DataSplitter {
        DataSplitter::new(self.train_fraction, self.split_seed)
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> PipelineResult<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            PipelineError::Config(format!("{PREFIX}{key}={raw:?} is invalid: {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = AppCfg::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.train_fraction, 0.8);
        assert_eq!(cfg.split_seed, 23);
        assert_eq!(cfg.forest.n_estimators, 100);
        assert_eq!(cfg.forest.max_depth, 10);
        assert_eq!(cfg.imputation_mode, ImputationMode::Live);
        assert_eq!(cfg.inference_stage, Stage::Prod);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = AppCfg::from_lookup(lookup(&[
            ("PERTINENCE_IMPUTATION_MODE", "frozen"),
            ("PERTINENCE_INFERENCE_STAGE", "dev"),
            ("PERTINENCE_N_ESTIMATORS", "7"),
            ("PERTINENCE_ARTIFACTS_ROOT", "/tmp/art"),
        ]))
        .unwrap();
        assert_eq!(cfg.imputation_mode, ImputationMode::Frozen);
        assert_eq!(cfg.inference_stage, Stage::Dev);
        assert_eq!(cfg.forest.n_estimators, 7);
        assert_eq!(cfg.artifacts_root, PathBuf::from("/tmp/art"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppCfg::from_lookup(lookup(&[("PERTINENCE_TRAIN_FRACTION", "1.5")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = AppCfg::from_lookup(lookup(&[("PERTINENCE_INFERENCE_STAGE", "qa")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
