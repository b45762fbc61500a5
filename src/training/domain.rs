//! Domain types for model versions and the version registry.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::common::error::{PipelineError, PipelineResult};

/// Deployment track; each stage has its own version sequence and active version.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Dev,
    Prod,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Stage::Dev),
            "prod" => Ok(Stage::Prod),
            other => Err(PipelineError::invalid(format!(
                "unknown stage '{other}', expected 'dev' or 'prod'"
            ))),
        }
    }
}

/// Composite version key rendered as `{stage}_v{sequence}`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionLabel {
    pub stage: Stage,
    pub sequence: u32,
}

impl VersionLabel {
    pub fn new(stage: Stage, sequence: u32) -> Self {
        Self { stage, sequence }
    }

    /// First label of a stage.
    pub fn first(stage: Stage) -> Self {
        Self::new(stage, 1)
    }

    pub fn next(&self) -> Self {
        Self::new(self.stage, self.sequence + 1)
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_v{}", self.stage, self.sequence)
    }
}

impl FromStr for VersionLabel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::invalid(format!("malformed version label '{s}'"));
        let (stage, sequence) = s.rsplit_once("_v").ok_or_else(invalid)?;
        let sequence: u32 = sequence.parse().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }
        Ok(Self::new(stage.parse()?, sequence))
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionLabel> for String {
    fn from(value: VersionLabel) -> Self {
        value.to_string()
    }
}

/// Durable registry row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelVersionRecord {
    pub id: i64,
    pub version: VersionLabel,
    pub stage: Stage,
    pub metric: String,
    pub metric_value: f64,
    pub trained_at: NaiveDate,
    pub active: bool,
}

/// Insert payload for the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct NewModelVersion {
    pub version: VersionLabel,
    pub metric: String,
    pub metric_value: f64,
    pub trained_at: NaiveDate,
    pub active: bool,
}

impl NewModelVersion {
    pub fn stage(&self) -> Stage {
        self.version.stage
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionPatch {
    pub metric: Option<String>,
    pub metric_value: Option<f64>,
    pub trained_at: Option<NaiveDate>,
    pub active: Option<bool>,
}

impl VersionPatch {
    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            ..Self::default()
        }
    }

    pub fn apply(&self, record: &mut ModelVersionRecord) {
        if let Some(metric) = &self.metric {
            record.metric = metric.clone();
        }
        if let Some(value) = self.metric_value {
            record.metric_value = value;
        }
        if let Some(date) = self.trained_at {
            record.trained_at = date;
        }
        if let Some(active) = self.active {
            record.active = active;
        }
    }
}

/// Persistence contract for the version registry.
///
/// Implementations reject a duplicate version label and a second active row
/// for the same stage with `RegistryIntegrity`.
#[async_trait]
pub trait ModelVersionRepository: Send + Sync {
    async fn create(&self, new: NewModelVersion) -> PipelineResult<ModelVersionRecord>;

    async fn get_by_version(&self, version: &VersionLabel) -> PipelineResult<Option<ModelVersionRecord>>;

    async fn get_active_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>>;

    /// Row with the highest sequence number for the stage.
    async fn get_latest_version_for_stage(&self, stage: Stage) -> PipelineResult<Option<ModelVersionRecord>>;

    /// Every row, newest id first.
    async fn list_all(&self) -> PipelineResult<Vec<ModelVersionRecord>>;

    /// Rows of one stage, newest id first.
    async fn list_by_stage(&self, stage: Stage) -> PipelineResult<Vec<ModelVersionRecord>>;

    async fn update_partial(&self, id: i64, patch: VersionPatch) -> PipelineResult<ModelVersionRecord>;

    /// Hard delete; returns whether a row was removed.
    async fn delete_by_version(&self, version: &VersionLabel) -> PipelineResult<bool>;

    /// Returns the number of removed rows.
    async fn delete_by_stage(&self, stage: Stage) -> PipelineResult<u64>;
}
