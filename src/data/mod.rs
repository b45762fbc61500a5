//! Data domain: ingestion, cleaning, splitting and encoding of episodes.

pub mod cleaner;
pub mod domain;
pub mod encoder;
pub mod repo_memory;
pub mod repo_sqlite;
pub mod service;
pub mod splitter;

pub use cleaner::{DataCleaner, ImputationMode, ImputationStats};
pub use domain::{CleanRecord, EpisodeRecord, EpisodeSource, FeatureMatrix, FeatureSchema};
pub use encoder::{DataEncoder, EncoderBundle};
pub use service::DataLoader;
pub use splitter::{DataSplitter, TrainTestSplit};
