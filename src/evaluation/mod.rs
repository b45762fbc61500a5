//! Model evaluation on the held-out partition.

pub mod domain;
pub mod service;

pub use domain::{ClassScore, MetricInfo, F1_SCORE};
pub use service::ModelEvaluator;
