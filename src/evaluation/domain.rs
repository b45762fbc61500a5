//! Metric records produced by model evaluation.

use serde::{Deserialize, Serialize};

/// Name under which the selection metric is stored in the registry.
pub const F1_SCORE: &str = "f1_score";

/// A named scalar metric computed on the held-out partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    pub metric: String,
    pub value: f64,
}

impl MetricInfo {
    pub fn f1(value: f64) -> Self {
        Self {
            metric: F1_SCORE.to_string(),
            value,
        }
    }
}

/// Per-class precision, recall, f1 and support.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}
