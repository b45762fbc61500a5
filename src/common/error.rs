//! Error handling primitives shared across the pipeline.
//!
//! Every failure propagates to the calling boundary untouched; nothing in the
//! core retries or recovers locally.

use std::io;
use std::path::PathBuf;

use crate::training::domain::Stage;

/// Stable error codes surfaced by the boundary alongside the message.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// A version's model or encoder file is missing on disk.
    ArtifactNotFound = 1,
    /// No registry rows exist for the requested stage.
    NoTrainedVersion = 2,
    /// Rows exist for the stage but none is active.
    NoActiveVersion = 3,
    /// Encoded record lacks a feature the model was trained on.
    FeatureAlignment = 4,
    /// Duplicate version label or second active row for a stage.
    RegistryIntegrity = 5,
    /// Input failed validation.
    InvalidInput = 6,
    /// Storage collaborator failure.
    Storage = 7,
    /// Catch-all for bugs, IO and serialization failures.
    Internal = 8,
    /// Requested version label has no registry row.
    VersionNotFound = 9,
}

/// Canonical error type for the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(
        "artifacts for model version {version} could not be loaded from {}; \
         train or activate another version for this stage ({source})",
        path.display()
    )]
    ArtifactNotFound {
        version: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no trained model versions exist for stage '{stage}'; train a model before running inference")]
    NoTrainedVersion { stage: Stage },

    #[error("no active model version exists for stage '{stage}'; activate a version before running inference")]
    NoActiveVersion { stage: Stage },

    #[error("encoded record is missing feature '{missing}' expected by the model")]
    FeatureAlignment { missing: String },

    #[error("model version '{0}' is not registered")]
    VersionNotFound(String),

    #[error("registry integrity violation: {0}")]
    RegistryIntegrity(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Machine parsable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::ArtifactNotFound { .. } => ErrorCode::ArtifactNotFound,
            PipelineError::NoTrainedVersion { .. } => ErrorCode::NoTrainedVersion,
            PipelineError::NoActiveVersion { .. } => ErrorCode::NoActiveVersion,
            PipelineError::FeatureAlignment { .. } => ErrorCode::FeatureAlignment,
            PipelineError::VersionNotFound(_) => ErrorCode::VersionNotFound,
            PipelineError::RegistryIntegrity(_) => ErrorCode::RegistryIntegrity,
            PipelineError::InvalidInput(_) => ErrorCode::InvalidInput,
            PipelineError::Storage(_) => ErrorCode::Storage,
            PipelineError::Config(_)
            | PipelineError::Training(_)
            | PipelineError::Serialization(_)
            | PipelineError::Io(_)
            | PipelineError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Validation helper.
    pub fn invalid(msg: impl Into<String>) -> Self {
        PipelineError::InvalidInput(msg.into())
    }

    /// Storage helper.
    pub fn storage(msg: impl Into<String>) -> Self {
        PipelineError::Storage(msg.into())
    }

    /// Internal error helper.
    pub fn internal(msg: impl Into<String>) -> Self {
        PipelineError::Internal(msg.into())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PipelineError::RegistryIntegrity(db.message().to_string())
            }
            _ => PipelineError::Storage(err.to_string()),
        }
    }
}
