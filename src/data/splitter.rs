//! Stratified train/test partition of cleaned records.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use crate::common::error::{PipelineError, PipelineResult};

use super::domain::CleanRecord;

/// Train and test partitions with their labels split off.
#[derive(Clone, Debug)]
pub struct TrainTestSplit {
    pub x_train: Vec<CleanRecord>,
    pub x_test: Vec<CleanRecord>,
    pub y_train: Vec<String>,
    pub y_test: Vec<String>,
}

#[derive(Copy, Clone, Debug)]
pub struct DataSplitter {
    train_fraction: f64,
    seed: u64,
}

impl Default for DataSplitter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TRAIN_FRACTION, Self::DEFAULT_SEED)
    }
}

impl DataSplitter {
    pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;
    pub const DEFAULT_SEED: u64 = 23;

    pub fn new(train_fraction: f64, seed: u64) -> Self {
        Self {
            train_fraction,
            seed,
        }
    }

    /// Split per label so both partitions keep the label balance.
    ///
    /// The test partition holds `ceil(rows * (1 - train_fraction))` rows,
    /// shared across labels by largest remainder with ties in label order.
    /// Every label needs at least two rows; each keeps at least one row on
    /// either side.
    pub fn build_train_test_data(&self, records: &[CleanRecord]) -> PipelineResult<TrainTestSplit> {
        if records.is_empty() {
            return Err(PipelineError::invalid("no validated episodes to train on"));
        }

        let mut by_label: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, record) in records.iter().enumerate() {
            let label = record.label.as_deref().ok_or_else(|| {
                PipelineError::invalid(format!("episode {:?} has no validation label", record.id))
            })?;
            by_label.entry(label).or_default().push(idx);
        }

        for (label, indices) in &by_label {
            let count = indices.len();
            if count < 2 {
                return Err(PipelineError::invalid(format!(
                    "label '{label}' has {count} episode(s); at least 2 are needed to stratify"
                )));
            }
        }

        let counts: Vec<usize> = by_label.values().map(Vec::len).collect();
        let n_test = self.test_rows(records.len(), counts.len());
        let allocation = allocate_test_rows(&counts, n_test);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut train_idx = Vec::new();
        let mut test_idx = Vec::new();

        for ((_, mut indices), n_test) in by_label.into_iter().zip(allocation) {
            indices.shuffle(&mut rng);
            test_idx.extend_from_slice(&indices[..n_test]);
            train_idx.extend_from_slice(&indices[n_test..]);
        }

        train_idx.shuffle(&mut rng);
        test_idx.shuffle(&mut rng);

        let take = |idx: &[usize]| -> (Vec<CleanRecord>, Vec<String>) {
            idx.iter()
                .map(|&i| {
                    let record = records[i].clone();
                    let label = record.label.clone().unwrap_or_default();
                    (record, label)
                })
                .unzip()
        };
        let (x_train, y_train) = take(&train_idx);
        let (x_test, y_test) = take(&test_idx);

        info!(
            train_rows = x_train.len(),
            test_rows = x_test.len(),
            "built train/test split"
        );

        Ok(TrainTestSplit {
            x_train,
            x_test,
            y_train,
            y_test,
        })
    }

    fn test_rows(&self, total: usize, n_labels: usize) -> usize {
        let wanted = (total as f64 * (1.0 - self.train_fraction) - 1e-9).ceil().max(0.0) as usize;
        wanted.clamp(n_labels, total - n_labels)
    }
}

/// Share `n_test` rows across label `counts` in proportion, keeping at least
/// one row per label on each side.
fn allocate_test_rows(counts: &[usize], n_test: usize) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let mut alloc: Vec<usize> = counts.iter().map(|&c| c * n_test / total).collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by_key(|&i| Reverse(counts[i] * n_test % total));
    let mut left = n_test - alloc.iter().sum::<usize>();
    for i in order {
        if left == 0 {
            break;
        }
        alloc[i] += 1;
        left -= 1;
    }

    for i in 0..alloc.len() {
        if alloc[i] == 0 {
            alloc[i] = 1;
            let donor = (0..alloc.len())
                .filter(|&j| j != i && alloc[j] > 1)
                .max_by_key(|&j| alloc[j]);
            if let Some(j) = donor {
                alloc[j] -= 1;
            }
        } else if alloc[i] >= counts[i] {
            alloc[i] = counts[i] - 1;
            let taker = (0..alloc.len())
                .filter(|&j| j != i && alloc[j] + 1 < counts[j])
                .max_by_key(|&j| counts[j] - alloc[j]);
            if let Some(j) = taker {
                alloc[j] += 1;
            }
        }
    }
    alloc
}
