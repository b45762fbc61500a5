//! Inference: scoring single episodes with a stage's active version.

pub mod artifacts;
pub mod domain;
pub mod service;

pub use artifacts::ArtifactsLoader;
pub use domain::{ArtifactBundle, PredictionResult};
pub use service::{InferenceEngine, PreparedEpisode};
