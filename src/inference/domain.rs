//! Inference inputs and outputs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::data::encoder::{EncoderBundle, MinMaxScaler, MultiLabelBinarizer, OneHotEncoder};
use crate::training::domain::VersionLabel;
use crate::training::forest::RandomForestClassifier;

/// Score for one episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Index of `label` within the model's sorted classes.
    pub prediction: usize,
    pub label: String,
    /// Probability of the predicted class, rounded to two decimals.
    pub probability: f64,
}

/// Everything persisted for one version that inference needs.
#[derive(Clone, Debug)]
pub struct ArtifactBundle {
    pub version: VersionLabel,
    pub model: RandomForestClassifier,
    pub categorical: OneHotEncoder,
    pub multilabel: MultiLabelBinarizer,
    pub numerical: MinMaxScaler,
    /// Diagnosis codes known to the multi-label encoder.
    pub multilabel_classes: Vec<String>,
}

impl ArtifactBundle {
    pub fn encoders(&self) -> EncoderBundle {
        EncoderBundle {
            categorical: self.categorical.clone(),
            multilabel: self.multilabel.clone(),
            numerical: self.numerical.clone(),
        }
    }

    pub fn known_labels(&self) -> BTreeSet<String> {
        self.multilabel_classes.iter().cloned().collect()
    }
}

/// Round to two decimals, halves to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_two_decimals() {
        assert_eq!(round2(0.666_666), 0.67);
        assert_eq!(round2(0.5), 0.5);
        assert_eq!(round2(1.0), 1.0);
        assert_eq!(round2(0.004), 0.0);
    }

    #[test]
    fn exact_halves_round_to_even() {
        assert_eq!(round2(0.125), 0.12);
        assert_eq!(round2(0.625), 0.62);
        assert_eq!(round2(0.375), 0.38);
        assert_eq!(round2(0.875), 0.88);
    }
}
