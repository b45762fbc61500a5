//! Missing-value imputation and value normalisation.
//!
//! Training cleans a whole historical batch with statistics computed from that
//! batch. Inference cleans one incoming record with statistics taken either
//! from a freshly re-queried batch (`live`) or from the training run that
//! produced the active version (`frozen`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::domain::{CleanRecord, EpisodeRecord, FeatureSchema};

/// String tokens treated as missing in numeric and categorical columns, and
/// in binary columns of an incoming inference record.
pub const NULL_LIKE: [&str; 9] = ["", " ", "\t", "nan", "NaN", "NULL", "null", "None", "none"];

/// Category imputed when a column has no observed value at all.
pub const MISSING_CATEGORY: &str = "MISSING";

const TRUE_TOKENS: [&str; 6] = ["SI", "Si", "Sí", "si", "sí", "True"];

/// Where inference takes its imputation statistics from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputationMode {
    /// Recompute from the current validated-episode batch on every call.
    #[default]
    Live,
    /// Reuse the statistics persisted with the active version.
    Frozen,
}

impl fmt::Display for ImputationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImputationMode::Live => "live",
            ImputationMode::Frozen => "frozen",
        })
    }
}

impl FromStr for ImputationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" | "live-statistics" => Ok(ImputationMode::Live),
            "frozen" | "frozen-statistics" => Ok(ImputationMode::Frozen),
            other => Err(format!("unknown imputation mode '{other}'")),
        }
    }
}

/// Per-column fill values derived from a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationStats {
    pub numeric_means: BTreeMap<String, f64>,
    /// Binary modes, already mapped to 0.0 / 1.0.
    pub binary_modes: BTreeMap<String, f64>,
    pub categorical_modes: BTreeMap<String, String>,
}

impl ImputationStats {
    /// Compute means and modes over the non-missing values of `records`.
    pub fn compute(schema: &FeatureSchema, records: &[EpisodeRecord]) -> Self {
        let mut stats = ImputationStats::default();

        for col in &schema.numeric {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| numeric_value(r.get(col)))
                .collect();
            let mean = if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
            stats.numeric_means.insert(col.clone(), mean);
        }

        for col in &schema.binary {
            let mode = mode_of(
                records
                    .iter()
                    .map(|r| r.get(col))
                    .filter(|v| !is_binary_missing(v))
                    .map(|v| (v.to_string(), v.clone())),
            );
            let mapped = mode.as_ref().map(map_binary).unwrap_or(0.0);
            stats.binary_modes.insert(col.clone(), mapped);
        }

        for col in &schema.categorical {
            let mode = mode_of(
                records
                    .iter()
                    .filter_map(|r| categorical_value(r.get(col)))
                    .map(|s| (s.clone(), s)),
            );
            if let Some(mode) = mode {
                stats.categorical_modes.insert(col.clone(), mode);
            }
        }

        stats
    }
}

/// Output of a training-mode cleaning pass.
#[derive(Clone, Debug)]
pub struct CleanedBatch {
    pub records: Vec<CleanRecord>,
    pub stats: ImputationStats,
}

/// Applies the imputation and encoding rules of every column group.
#[derive(Clone, Debug)]
pub struct DataCleaner {
    schema: Arc<FeatureSchema>,
}

impl DataCleaner {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    /// Training mode: clean a full historical batch with its own statistics.
    pub fn run_preprocessing(&self, records: &[EpisodeRecord]) -> CleanedBatch {
        let stats = ImputationStats::compute(&self.schema, records);
        let cleaned = records
            .iter()
            .map(|r| self.clean_record(r, &stats, None))
            .collect::<Vec<_>>();
        debug!(rows = cleaned.len(), "cleaned training batch");
        CleanedBatch {
            records: cleaned,
            stats,
        }
    }

    /// Inference mode with live statistics taken from `reference`.
    pub fn clean_for_inference(
        &self,
        reference: &[EpisodeRecord],
        record: &EpisodeRecord,
        known_labels: &BTreeSet<String>,
    ) -> CleanRecord {
        let stats = ImputationStats::compute(&self.schema, reference);
        self.clean_with_stats(record, &stats, known_labels)
    }

    /// Inference mode: clean one incoming record with precomputed statistics.
    ///
    /// Null-like tokens in binary columns count as missing, and diagnosis
    /// codes outside `known_labels` are dropped.
    pub fn clean_with_stats(
        &self,
        record: &EpisodeRecord,
        stats: &ImputationStats,
        known_labels: &BTreeSet<String>,
    ) -> CleanRecord {
        self.clean_record(record, stats, Some(known_labels))
    }

    /// Batch rows (`known_labels` is `None`) only treat null and blank binary
    /// cells as missing.
    fn clean_record(
        &self,
        record: &EpisodeRecord,
        stats: &ImputationStats,
        known_labels: Option<&BTreeSet<String>>,
    ) -> CleanRecord {
        let schema = &self.schema;
        let incoming = known_labels.is_some();

        let numeric = schema
            .numeric
            .iter()
            .map(|col| {
                numeric_value(record.get(col))
                    .or_else(|| stats.numeric_means.get(col).copied())
                    .unwrap_or(0.0)
            })
            .collect();

        let binary = schema
            .binary
            .iter()
            .map(|col| {
                let value = record.get(col);
                if is_binary_missing(value) || (incoming && is_null_like(value)) {
                    stats.binary_modes.get(col).copied().unwrap_or(0.0)
                } else {
                    map_binary(value)
                }
            })
            .collect();

        let categorical = schema
            .categorical
            .iter()
            .map(|col| {
                let value = categorical_value(record.get(col))
                    .or_else(|| stats.categorical_modes.get(col).cloned())
                    .unwrap_or_else(|| MISSING_CATEGORY.to_string());
                if schema.is_uppercased(col) {
                    value.to_uppercase()
                } else {
                    value
                }
            })
            .collect();

        let diagnostics = diagnosis_codes(record.get(&schema.multicategorical), known_labels);

        CleanRecord {
            id: record.id,
            label: record.label.clone(),
            numeric,
            binary,
            categorical,
            diagnostics,
        }
    }
}

fn is_binary_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_null_like(value: &Value) -> bool {
    matches!(value, Value::String(s) if NULL_LIKE.contains(&s.as_str()))
}

/// Map a boolean-like value to 0.0 / 1.0; anything unrecognised is 0.0.
pub fn map_binary(value: &Value) -> f64 {
    match value {
        Value::Bool(true) => 1.0,
        Value::String(s) if TRUE_TOKENS.contains(&s.as_str()) => 1.0,
        _ => 0.0,
    }
}

/// Parse a numeric cell; null-like tokens and unparsable strings are missing.
pub fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if NULL_LIKE.contains(&s.as_str()) => None,
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Render a categorical cell as a string; integral numbers lose their fraction.
pub fn categorical_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || NULL_LIKE.contains(&s.as_str()) {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| {
                    if f.fract() == 0.0 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

fn diagnosis_codes(value: &Value, known_labels: Option<&BTreeSet<String>>) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_str)
        .filter(|code| known_labels.map_or(true, |known| known.contains(*code)))
        .map(str::to_string)
        .collect()
}

/// Most frequent item by key; ties resolve to the smallest key.
fn mode_of<T>(items: impl Iterator<Item = (String, T)>) -> Option<T> {
    let mut counts: BTreeMap<String, (usize, T)> = BTreeMap::new();
    for (key, item) in items {
        counts.entry(key).or_insert((0, item)).0 += 1;
    }
    let mut best: Option<(usize, T)> = None;
    for (_, (count, item)) in counts {
        if best.as_ref().map_or(true, |(c, _)| count > *c) {
            best = Some((count, item));
        }
    }
    best.map(|(_, item)| item)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tiny_schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema {
            numeric: vec!["pcr".into()],
            binary: vec!["dva".into()],
            categorical: vec!["tipo".into(), "triage".into()],
            uppercase: vec!["tipo".into()],
            multicategorical: "diagnostics".into(),
            label: "validacion".into(),
            id: "id_episodio".into(),
        })
    }

    fn row(pcr: Value, dva: Value, tipo: Value, triage: Value) -> EpisodeRecord {
        EpisodeRecord::new(None, Some("PERTINENTE".into()))
            .with("pcr", pcr)
            .with("dva", dva)
            .with("tipo", tipo)
            .with("triage", triage)
    }

    #[test]
    fn numeric_null_takes_batch_mean() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![
            row(json!(10), json!("Si"), json!("a"), json!(1)),
            row(json!(20), json!("No"), json!("a"), json!(1)),
            row(Value::Null, json!(""), json!("a"), json!(1)),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        let pcr: Vec<f64> = cleaned.records.iter().map(|r| r.numeric[0]).collect();
        assert_eq!(pcr, vec![10.0, 20.0, 15.0]);
        assert_eq!(cleaned.stats.numeric_means["pcr"], 15.0);
    }

    #[test]
    fn binary_blank_takes_batch_mode_before_mapping() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![
            row(json!(1), json!("Si"), json!("a"), json!(1)),
            row(json!(1), json!("No"), json!("a"), json!(1)),
            row(json!(1), json!(""), json!("a"), json!(1)),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        let dva: Vec<f64> = cleaned.records.iter().map(|r| r.binary[0]).collect();
        // "No" and "Si" tie; the smaller value wins and maps to 0.
        assert_eq!(dva, vec![1.0, 0.0, 0.0]);

        let batch = vec![
            row(json!(1), json!("Sí"), json!("a"), json!(1)),
            row(json!(1), json!("Sí"), json!("a"), json!(1)),
            row(json!(1), json!(false), json!("a"), json!(1)),
            row(json!(1), Value::Null, json!("a"), json!(1)),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        let dva: Vec<f64> = cleaned.records.iter().map(|r| r.binary[0]).collect();
        assert_eq!(dva, vec![1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn binary_synonyms_map_to_flags() {
        assert_eq!(map_binary(&json!("Sí")), 1.0);
        assert_eq!(map_binary(&json!("True")), 1.0);
        assert_eq!(map_binary(&json!(true)), 1.0);
        assert_eq!(map_binary(&json!("No")), 0.0);
        assert_eq!(map_binary(&json!("None")), 0.0);
        assert_eq!(map_binary(&json!(false)), 0.0);
        assert_eq!(map_binary(&json!("maybe")), 0.0);
        assert_eq!(map_binary(&json!(1)), 0.0);
    }

    #[test]
    fn numeric_column_without_values_imputes_zero() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![
            row(json!("NaN"), json!(true), json!("a"), json!(1)),
            row(json!(""), json!(true), json!("a"), json!(1)),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        assert!(cleaned.records.iter().all(|r| r.numeric[0] == 0.0));
    }

    #[test]
    fn numeric_strings_are_parsed() {
        assert_eq!(numeric_value(&json!("50")), Some(50.0));
        assert_eq!(numeric_value(&json!(" 7.5 ")), Some(7.5));
        assert_eq!(numeric_value(&json!("null")), None);
        assert_eq!(numeric_value(&json!("abc")), None);
    }

    #[test]
    fn categorical_mode_upper_case_and_triage() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![
            row(json!(1), json!(true), json!("sin alerta"), json!(3)),
            row(json!(1), json!(true), json!("sin alerta"), json!(3.0)),
            row(json!(1), json!(true), Value::Null, json!("2")),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        assert_eq!(cleaned.records[2].categorical, vec!["SIN ALERTA", "2"]);
        assert_eq!(cleaned.records[1].categorical, vec!["SIN ALERTA", "3"]);
    }

    #[test]
    fn categorical_without_any_value_uses_sentinel() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![row(json!(1), json!(true), Value::Null, Value::Null)];
        let cleaned = cleaner.run_preprocessing(&batch);
        assert_eq!(
            cleaned.records[0].categorical,
            vec![MISSING_CATEGORY, MISSING_CATEGORY]
        );
    }

    #[test]
    fn inference_drops_unknown_diagnoses_and_uses_reference_stats() {
        let cleaner = DataCleaner::new(tiny_schema());
        let reference = vec![
            row(json!(4), json!("Si"), json!("urgencia"), json!(2)),
            row(json!(8), json!("Si"), json!("urgencia"), json!(2)),
        ];
        let incoming = EpisodeRecord::new(None, None)
            .with("pcr", "None")
            .with("dva", Value::Null)
            .with("diagnostics", json!(["A01", "ZZZ", null, 5]));
        let known: BTreeSet<String> = ["A01".to_string(), "B02".to_string()].into();

        let cleaned = cleaner.clean_for_inference(&reference, &incoming, &known);
        assert_eq!(cleaned.numeric, vec![6.0]);
        assert_eq!(cleaned.binary, vec![1.0]);
        assert_eq!(cleaned.categorical, vec!["URGENCIA", "2"]);
        assert_eq!(cleaned.diagnostics, vec!["A01"]);
    }

    #[test]
    fn null_like_binary_tokens_take_reference_mode_at_inference() {
        let cleaner = DataCleaner::new(tiny_schema());
        let reference = vec![
            row(json!(1), json!("Si"), json!("a"), json!(1)),
            row(json!(1), json!("Si"), json!("a"), json!(1)),
            row(json!(1), json!("Si"), json!("a"), json!(1)),
        ];
        let known = BTreeSet::new();
        for token in NULL_LIKE {
            let incoming = EpisodeRecord::new(None, None).with("dva", token);
            let cleaned = cleaner.clean_for_inference(&reference, &incoming, &known);
            assert_eq!(cleaned.binary, vec![1.0], "token {token:?}");
        }

        // Batch rows keep mapping unrecognised tokens to 0.
        let batch = vec![
            row(json!(1), json!("Si"), json!("a"), json!(1)),
            row(json!(1), json!("Si"), json!("a"), json!(1)),
            row(json!(1), json!("NULL"), json!("a"), json!(1)),
        ];
        let cleaned = cleaner.run_preprocessing(&batch);
        assert_eq!(cleaned.records[2].binary, vec![0.0]);
    }

    #[test]
    fn missing_diagnoses_become_empty() {
        let cleaner = DataCleaner::new(tiny_schema());
        let batch = vec![row(json!(1), json!(true), json!("a"), json!(1)).with("diagnostics", "A01")];
        let cleaned = cleaner.run_preprocessing(&batch);
        assert!(cleaned.records[0].diagnostics.is_empty());
    }

    #[test]
    fn imputation_mode_parses_both_spellings() {
        assert_eq!("frozen".parse::<ImputationMode>().unwrap(), ImputationMode::Frozen);
        assert_eq!(
            "live-statistics".parse::<ImputationMode>().unwrap(),
            ImputationMode::Live
        );
        assert!("sometimes".parse::<ImputationMode>().is_err());
    }
}
