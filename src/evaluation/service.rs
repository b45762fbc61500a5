//! Scoring of a fitted model on the held-out partition.

use std::collections::BTreeSet;

use tracing::info;

use crate::common::error::{PipelineError, PipelineResult};
use crate::data::domain::FeatureMatrix;
use crate::training::forest::RandomForestClassifier;

use super::domain::{ClassScore, MetricInfo};

/// Computes the support-weighted F1 score of a model on a test split.
#[derive(Clone, Debug, Default)]
pub struct ModelEvaluator;

impl ModelEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate_model(
        &self,
        model: &RandomForestClassifier,
        x_test: &FeatureMatrix,
        y_test: &[String],
    ) -> PipelineResult<MetricInfo> {
        if y_test.is_empty() {
            return Err(PipelineError::invalid("cannot evaluate on an empty test partition"));
        }
        let y_pred = model.predict(x_test)?;
        let metric = MetricInfo::f1(weighted_f1(y_test, &y_pred));
        info!(metric = %metric.metric, value = metric.value, rows = y_test.len(), "model evaluated");
        Ok(metric)
    }
}

/// Precision/recall/F1 per label over the union of true and predicted labels.
/// An undefined ratio (zero denominator) counts as 0.
pub fn class_scores(y_true: &[String], y_pred: &[String]) -> Vec<ClassScore> {
    let labels: BTreeSet<&String> = y_true.iter().chain(y_pred).collect();
    labels
        .into_iter()
        .map(|label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (t, p) in y_true.iter().zip(y_pred) {
                match (t == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            ClassScore {
                label: label.clone(),
                precision,
                recall,
                f1,
                support: tp + fn_,
            }
        })
        .collect()
}

/// Mean of per-class F1 weighted by each class's true support.
pub fn weighted_f1(y_true: &[String], y_pred: &[String]) -> f64 {
    let total = y_true.len();
    if total == 0 {
        return 0.0;
    }
    class_scores(y_true, y_pred)
        .iter()
        .map(|s| s.f1 * s.support as f64)
        .sum::<f64>()
        / total as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn perfect_predictions_score_one() {
        let y = labels(&["A", "B", "A"]);
        assert_eq!(weighted_f1(&y, &y), 1.0);
    }

    #[test]
    fn weights_by_true_support() {
        let y_true = labels(&["A", "A", "A", "B"]);
        let y_pred = labels(&["A", "A", "B", "B"]);
        // A: p=1, r=2/3, f1=0.8 (support 3). B: p=0.5, r=1, f1=2/3 (support 1).
        let expected = (0.8 * 3.0 + (2.0 / 3.0)) / 4.0;
        assert!((weighted_f1(&y_true, &y_pred) - expected).abs() < 1e-12);
    }

    #[test]
    fn predicted_only_label_contributes_nothing() {
        let y_true = labels(&["A", "A"]);
        let y_pred = labels(&["A", "C"]);
        let scores = class_scores(&y_true, &y_pred);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[1].label, "C");
        assert_eq!(scores[1].support, 0);
        // A: p=1, r=0.5, f1=2/3.
        assert!((weighted_f1(&y_true, &y_pred) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn all_wrong_scores_zero() {
        let y_true = labels(&["A", "B"]);
        let y_pred = labels(&["B", "A"]);
        assert_eq!(weighted_f1(&y_true, &y_pred), 0.0);
    }
}
