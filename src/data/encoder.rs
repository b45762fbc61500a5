//! Feature encoders fitted on the training split and replayed at inference.
//!
//! Output column order is numeric, binary, one-hot, multi-label. The order is
//! not load-bearing: inference re-aligns against the model's feature names.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::error::{PipelineError, PipelineResult};

use super::domain::{CleanRecord, FeatureMatrix, FeatureSchema};

/// One-hot encoder; unknown categories encode as all zeros.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub columns: Vec<String>,
    /// Sorted categories per column.
    pub categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    pub fn fit(columns: &[String], rows: &[&[String]]) -> Self {
        let categories = (0..columns.len())
            .map(|c| {
                rows.iter()
                    .map(|row| row[c].clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .collect();
        Self {
            columns: columns.to_vec(),
            categories,
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .zip(&self.categories)
            .flat_map(|(col, cats)| cats.iter().map(move |cat| format!("{col}_{cat}")))
            .collect()
    }

    pub fn transform(&self, row: &[String]) -> Vec<f64> {
        self.categories
            .iter()
            .zip(row)
            .flat_map(|(cats, value)| cats.iter().map(move |cat| f64::from(u8::from(cat == value))))
            .collect()
    }
}

/// One column per known diagnosis code; unknown codes are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiLabelBinarizer {
    pub column: String,
    /// Sorted label universe seen at fit time.
    pub classes: Vec<String>,
}

impl MultiLabelBinarizer {
    pub fn fit(column: &str, rows: &[&[String]]) -> Self {
        let classes = rows
            .iter()
            .flat_map(|codes| codes.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            column: column.to_string(),
            classes,
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .map(|cls| format!("{}_{cls}", self.column))
            .collect()
    }

    pub fn known_labels(&self) -> BTreeSet<String> {
        self.classes.iter().cloned().collect()
    }

    pub fn transform(&self, codes: &[String]) -> Vec<f64> {
        self.classes
            .iter()
            .map(|cls| f64::from(u8::from(codes.contains(cls))))
            .collect()
    }
}

/// Min-max scaler to `[0, 1]` over the training range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub columns: Vec<String>,
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit(columns: &[String], rows: &[&[f64]]) -> Self {
        let mut data_min = vec![f64::INFINITY; columns.len()];
        let mut data_max = vec![f64::NEG_INFINITY; columns.len()];
        for row in rows {
            for (c, &v) in row.iter().enumerate() {
                data_min[c] = data_min[c].min(v);
                data_max[c] = data_max[c].max(v);
            }
        }
        for c in 0..columns.len() {
            if !data_min[c].is_finite() {
                data_min[c] = 0.0;
                data_max[c] = 0.0;
            }
        }
        Self {
            columns: columns.to_vec(),
            data_min,
            data_max,
        }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(c, &v)| {
                let range = self.data_max[c] - self.data_min[c];
                // Constant columns keep a unit scale.
                let scale = if range == 0.0 { 1.0 } else { range };
                (v - self.data_min[c]) / scale
            })
            .collect()
    }
}

/// The three fitted transforms of one model version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderBundle {
    pub categorical: OneHotEncoder,
    pub multilabel: MultiLabelBinarizer,
    pub numerical: MinMaxScaler,
}

impl EncoderBundle {
    /// Fit every transform on the training partition only.
    pub fn fit(schema: &FeatureSchema, train: &[CleanRecord]) -> PipelineResult<Self> {
        if train.is_empty() {
            return Err(PipelineError::invalid("cannot fit encoders on an empty partition"));
        }
        let categorical: Vec<&[String]> = train.iter().map(|r| r.categorical.as_slice()).collect();
        let diagnostics: Vec<&[String]> = train.iter().map(|r| r.diagnostics.as_slice()).collect();
        let numeric: Vec<&[f64]> = train.iter().map(|r| r.numeric.as_slice()).collect();

        Ok(Self {
            categorical: OneHotEncoder::fit(&schema.categorical, &categorical),
            multilabel: MultiLabelBinarizer::fit(&schema.multicategorical, &diagnostics),
            numerical: MinMaxScaler::fit(&schema.numeric, &numeric),
        })
    }

    pub fn feature_names(&self, schema: &FeatureSchema) -> Vec<String> {
        self.numerical
            .columns
            .iter()
            .cloned()
            .chain(schema.binary.iter().cloned())
            .chain(self.categorical.feature_names())
            .chain(self.multilabel.feature_names())
            .collect()
    }

    /// Apply the already-fitted transforms; never refits.
    pub fn transform(&self, schema: &FeatureSchema, records: &[CleanRecord]) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::new(self.feature_names(schema));
        matrix.rows = records
            .iter()
            .map(|r| {
                let mut row = self.numerical.transform(&r.numeric);
                row.extend_from_slice(&r.binary);
                row.extend(self.categorical.transform(&r.categorical));
                row.extend(self.multilabel.transform(&r.diagnostics));
                row
            })
            .collect();
        matrix
    }
}

/// Training-mode encoding output.
#[derive(Clone, Debug)]
pub struct EncodedSplit {
    pub encoders: EncoderBundle,
    pub x_train: FeatureMatrix,
    pub x_test: FeatureMatrix,
}

/// Encodes cleaned records into model-ready matrices.
#[derive(Clone, Debug)]
pub struct DataEncoder {
    schema: Arc<FeatureSchema>,
}

impl DataEncoder {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    /// Training mode: fit on `train`, apply to both partitions.
    pub fn encode(&self, train: &[CleanRecord], test: &[CleanRecord]) -> PipelineResult<EncodedSplit> {
        let encoders = EncoderBundle::fit(&self.schema, train)?;
        let x_train = encoders.transform(&self.schema, train);
        let x_test = encoders.transform(&self.schema, test);
        info!(
            train_rows = x_train.n_rows(),
            test_rows = x_test.n_rows(),
            features = x_train.n_cols(),
            "encoded train/test partitions"
        );
        Ok(EncodedSplit {
            encoders,
            x_train,
            x_test,
        })
    }

    /// Inference mode: apply fitted encoders to one record and align the
    /// columns to the model's training-time feature names.
    pub fn encode_for_inference(
        &self,
        record: &CleanRecord,
        encoders: &EncoderBundle,
        feature_names_in: &[String],
    ) -> PipelineResult<FeatureMatrix> {
        let encoded = encoders.transform(&self.schema, std::slice::from_ref(record));
        align_features(&encoded, feature_names_in)
    }
}

/// Restrict/reorder to the model's expected columns.
pub fn align_features(encoded: &FeatureMatrix, feature_names_in: &[String]) -> PipelineResult<FeatureMatrix> {
    encoded.align(feature_names_in)
}
