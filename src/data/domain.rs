//! Core episode record definitions and the shared feature schema.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::error::{PipelineError, PipelineResult};

/// Immutable description of the column groups consumed by the pipeline.
///
/// Built once and shared by `Arc` between training and inference so both
/// sides always agree on the column sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub numeric: Vec<String>,
    pub binary: Vec<String>,
    pub categorical: Vec<String>,
    /// Categorical columns upper-cased after imputation.
    pub uppercase: Vec<String>,
    pub multicategorical: String,
    pub label: String,
    pub id: String,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl FeatureSchema {
    /// Schema of the validated clinical episodes table.
    pub fn episodes() -> Self {
        Self {
            numeric: owned(&[
                "presion_sistolica",
                "presion_diastolica",
                "presion_media",
                "temperatura_c",
                "saturacion_o2",
                "frecuencia_cardiaca",
                "frecuencia_respiratoria",
                "glasgow_score",
                "fio2",
                "pcr",
                "hemoglobina",
                "creatinina",
                "nitrogeno_ureico",
                "sodio",
                "potasio",
            ]),
            binary: owned(&[
                "antecedentes_cardiaco",
                "antecedentes_diabetes",
                "antecedentes_hipertension",
                "fio2_ge_50",
                "ventilacion_mecanica",
                "cirugia_realizada",
                "cirugia_mismo_dia_ingreso",
                "hemodinamia",
                "hemodinamia_mismo_dia_ingreso",
                "endoscopia",
                "endoscopia_mismo_dia_ingreso",
                "dialisis",
                "trombolisis",
                "trombolisis_mismo_dia_ingreso",
                "troponinas_alteradas",
                "ecg_alterado",
                "rnm_protocolo_stroke",
                "dva",
                "transfusiones",
                "compromiso_conciencia",
                "dreo",
            ]),
            categorical: owned(&["tipo", "tipo_alerta_ugcc", "tipo_cama", "triage"]),
            uppercase: owned(&["tipo", "tipo_alerta_ugcc"]),
            multicategorical: "diagnostics".to_string(),
            label: "validacion".to_string(),
            id: "id_episodio".to_string(),
        }
    }

    pub fn is_uppercased(&self, column: &str) -> bool {
        self.uppercase.iter().any(|c| c == column)
    }
}

/// One raw clinical episode as read from storage or received for inference.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub id: Option<i64>,
    /// Validation label (`PERTINENTE` / `NO PERTINENTE`); absent at inference.
    pub label: Option<String>,
    /// Feature values keyed by column name, diagnoses included.
    pub values: Map<String, Value>,
}

impl EpisodeRecord {
    pub fn new(id: Option<i64>, label: Option<String>) -> Self {
        Self {
            id,
            label,
            values: Map::new(),
        }
    }

    /// Builder-style setter used by adapters and tests.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    /// Split a JSON object payload into id, label and feature values.
    pub fn from_json(schema: &FeatureSchema, payload: Value) -> PipelineResult<Self> {
        let Value::Object(mut values) = payload else {
            return Err(PipelineError::invalid("episode payload must be a JSON object"));
        };

        let id = values.remove(&schema.id).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        let label = values.remove(&schema.label).and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        });

        Ok(Self { id, label, values })
    }
}

/// Cleaned record with every value imputed and typed, in schema order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub id: Option<i64>,
    pub label: Option<String>,
    pub numeric: Vec<f64>,
    /// Binary flags mapped to 0.0 / 1.0.
    pub binary: Vec<f64>,
    pub categorical: Vec<String>,
    pub diagnostics: Vec<String>,
}

/// Dense row-major matrix with named columns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Restrict and reorder columns to exactly `expected`.
    ///
    /// Extra columns are dropped; a missing one is a `FeatureAlignment` error.
    pub fn align(&self, expected: &[String]) -> PipelineResult<FeatureMatrix> {
        let indices = expected
            .iter()
            .map(|name| {
                self.column_index(name)
                    .ok_or_else(|| PipelineError::FeatureAlignment {
                        missing: name.clone(),
                    })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i]).collect())
            .collect();

        Ok(FeatureMatrix {
            columns: expected.to_vec(),
            rows,
        })
    }
}

/// Read-only source of historical episodes.
#[async_trait]
pub trait EpisodeSource: Send + Sync {
    /// Every episode whose validation label is not null, without diagnoses.
    async fn fetch_validated_episodes(&self) -> PipelineResult<Vec<EpisodeRecord>>;

    /// Diagnosis codes per episode id; ids without diagnoses may be absent.
    async fn fetch_diagnostics_map(
        &self,
        episode_ids: &[i64],
    ) -> PipelineResult<BTreeMap<i64, Vec<String>>>;
}
