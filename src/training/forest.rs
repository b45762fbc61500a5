//! Random forest classifier: a bagging ensemble of CART trees.
//!
//! Trees are grown sequentially from a single seeded generator, so a fixed
//! seed and identical input give an identical model.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::common::error::{PipelineError, PipelineResult};
use crate::data::domain::FeatureMatrix;

/// Fixed hyperparameters of the model factory.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            bootstrap: true,
            seed: 23,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Class distribution of the training samples that reached the leaf.
        proba: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Single CART tree stored as a node arena; node 0 is the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict_proba(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    max_features: usize,
    config: &'a ForestConfig,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn distribution(&self, samples: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += 1.0;
        }
        let total = samples.len().max(1) as f64;
        counts.iter_mut().for_each(|c| *c /= total);
        counts
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let proba = self.distribution(&samples);
        let pure = proba.iter().any(|&p| p == 1.0);
        if pure || depth >= self.config.max_depth || samples.len() < self.config.min_samples_split {
            return self.push(Node::Leaf { proba });
        }

        let Some((feature, threshold)) = self.best_split(&samples, rng) else {
            return self.push(Node::Leaf { proba });
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x[s][feature] <= threshold);

        // Reserve the split slot before children so the root stays at index 0.
        let idx = self.push(Node::Leaf { proba: Vec::new() });
        let left = self.build(left_samples, depth + 1, rng);
        let right = self.build(right_samples, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Best gini split over `max_features` randomly drawn features.
    ///
    /// Features constant within the node do not count towards the draw, so a
    /// node only becomes a leaf when no feature can separate it.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n_features = self.x[0].len();
        let mut candidates: Vec<usize> = (0..n_features).collect();
        candidates.shuffle(rng);
        let n = samples.len() as f64;

        let mut total = vec![0.0; self.n_classes];
        for &s in samples {
            total[self.y[s]] += 1.0;
        }
        let parent = gini(&total, n);

        let mut best: Option<(f64, usize, f64)> = None;
        let mut order: Vec<usize> = samples.to_vec();

        let mut visited = 0;

        for feature in candidates {
            if visited >= self.max_features {
                break;
            }
            order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            if self.x[order[0]][feature] == self.x[order[order.len() - 1]][feature] {
                continue;
            }
            visited += 1;

            let mut left = vec![0.0; self.n_classes];
            for i in 0..order.len() - 1 {
                left[self.y[order[i]]] += 1.0;
                let current = self.x[order[i]][feature];
                let next = self.x[order[i + 1]][feature];
                if current == next {
                    continue;
                }
                let n_left = (i + 1) as f64;
                let n_right = n - n_left;
                let right: Vec<f64> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let impurity =
                    (n_left / n) * gini(&left, n_left) + (n_right / n) * gini(&right, n_right);
                let gain = parent - impurity;
                if gain > 1e-12 && best.map_or(true, |(g, _, _)| gain > g) {
                    best = Some((gain, feature, current + (next - current) / 2.0));
                }
            }
        }

        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

fn gini(counts: &[f64], n: f64) -> f64 {
    if n == 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
}

/// Fitted ensemble; `classes` are sorted and index the probability vectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub config: ForestConfig,
    pub classes: Vec<String>,
    pub feature_names_in: Vec<String>,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    pub fn fit(config: ForestConfig, x: &FeatureMatrix, y: &[String]) -> PipelineResult<Self> {
        if x.is_empty() {
            return Err(PipelineError::Training("no training rows".to_string()));
        }
        if x.n_rows() != y.len() {
            return Err(PipelineError::Training(format!(
                "{} rows but {} labels",
                x.n_rows(),
                y.len()
            )));
        }
        if x.n_cols() == 0 {
            return Err(PipelineError::Training("no feature columns".to_string()));
        }

        let classes: Vec<String> = y.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let encoded: Vec<usize> = y
            .iter()
            .map(|label| classes.binary_search(label).unwrap_or_default())
            .collect();

        let n_rows = x.n_rows();
        let max_features = ((x.n_cols() as f64).sqrt().floor() as usize).max(1);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.n_estimators);

        for _ in 0..config.n_estimators {
            let samples: Vec<usize> = if config.bootstrap {
                (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect()
            } else {
                (0..n_rows).collect()
            };
            let mut builder = TreeBuilder {
                x: &x.rows,
                y: &encoded,
                n_classes: classes.len(),
                max_features,
                config: &config,
                nodes: Vec::new(),
            };
            builder.build(samples, 0, &mut rng);
            trees.push(DecisionTree {
                nodes: builder.nodes,
            });
        }

        Ok(Self {
            config,
            classes,
            feature_names_in: x.columns.clone(),
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    fn check_columns(&self, x: &FeatureMatrix) -> PipelineResult<()> {
        if x.columns != self.feature_names_in {
            let missing = self
                .feature_names_in
                .iter()
                .find(|name| x.column_index(name).is_none())
                .cloned()
                .unwrap_or_else(|| "<column order>".to_string());
            return Err(PipelineError::FeatureAlignment { missing });
        }
        Ok(())
    }

    /// Mean of the per-tree class distributions, one row per input row.
    pub fn predict_proba(&self, x: &FeatureMatrix) -> PipelineResult<Vec<Vec<f64>>> {
        self.check_columns(x)?;
        let n_trees = self.trees.len() as f64;
        Ok(x.rows
            .iter()
            .map(|row| {
                let mut acc = vec![0.0; self.classes.len()];
                for tree in &self.trees {
                    for (a, p) in acc.iter_mut().zip(tree.predict_proba(row)) {
                        *a += p;
                    }
                }
                acc.iter_mut().for_each(|a| *a /= n_trees);
                acc
            })
            .collect())
    }

    /// Class label with the highest mean probability; ties go to the first class.
    pub fn predict(&self, x: &FeatureMatrix) -> PipelineResult<Vec<String>> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|proba| self.classes[argmax(proba)].clone())
            .collect())
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (FeatureMatrix, Vec<String>) {
        let mut x = FeatureMatrix::new(vec!["signal".into(), "noise".into()]);
        let mut y = Vec::new();
        for i in 0..40 {
            let positive = i % 2 == 0;
            let signal = if positive { 0.8 } else { 0.2 } + (i as f64) * 0.001;
            x.rows.push(vec![signal, ((i * 7) % 11) as f64 / 11.0]);
            y.push(if positive { "PERTINENTE" } else { "NO PERTINENTE" }.to_string());
        }
        (x, y)
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_estimators: 15,
            ..ForestConfig::default()
        }
    }

    #[test]
    fn learns_a_separable_signal() {
        let (x, y) = separable();
        let model = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        assert_eq!(model.classes, vec!["NO PERTINENTE", "PERTINENTE"]);
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = separable();
        let model = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        for proba in model.predict_proba(&x).unwrap() {
            assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_same_model() {
        let (x, y) = separable();
        let a = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        let b = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_trees(), 15);
    }

    #[test]
    fn depth_is_bounded() {
        let (x, y) = separable();
        let config = ForestConfig {
            n_estimators: 5,
            max_depth: 1,
            ..ForestConfig::default()
        };
        let model = RandomForestClassifier::fit(config, &x, &y).unwrap();
        assert!(model.trees().iter().all(|t| t.depth() <= 1));
    }

    #[test]
    fn survives_serde_round_trip() {
        let (x, y) = separable();
        let model = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: RandomForestClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict_proba(&x).unwrap(), model.predict_proba(&x).unwrap());
    }

    #[test]
    fn rejects_misaligned_input() {
        let (x, y) = separable();
        let model = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        let shuffled = x.align(&["noise".to_string(), "signal".to_string()]).unwrap();
        assert!(matches!(
            model.predict(&shuffled),
            Err(PipelineError::FeatureAlignment { .. })
        ));
    }

    #[test]
    fn single_class_is_allowed() {
        let mut x = FeatureMatrix::new(vec!["a".into()]);
        x.rows = vec![vec![1.0], vec![2.0]];
        let y = vec!["PERTINENTE".to_string(); 2];
        let model = RandomForestClassifier::fit(small_config(), &x, &y).unwrap();
        assert_eq!(model.predict_proba(&x).unwrap()[0], vec![1.0]);
    }
}
