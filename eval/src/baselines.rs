// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Baseline classifiers for fairness evaluation
//!
//! Implements:
//! - Logistic regression (L2-regularised, full-batch gradient descent)
//! - Random forest (bagged CART trees with Gini impurity)
//!
//! Both are fitted with fixed configuration and a fixed seed, so metrics are
//! reproducible across runs on the same input.

use crate::error::{BiasError, Result};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LOGISTIC_REGRESSION: &str = "LogisticRegression";
pub const RANDOM_FOREST: &str = "RandomForest";

/// Identifiers of every model `train_models` produces
pub const MODEL_IDS: &[&str] = &[LOGISTIC_REGRESSION, RANDOM_FOREST];

/// Trait for all trained classifiers
pub trait Classifier: Send + Sync {
    /// Fit on encoded feature rows and binary targets
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]);

    /// P(y = 1 | x)
    fn predict_proba(&self, x: &[f64]) -> f64;

    /// Binary prediction for a single row
    fn predict(&self, x: &[f64]) -> u8 {
        u8::from(self.predict_proba(x) >= 0.5)
    }

    fn predict_batch(&self, x: &[Vec<f64>]) -> Vec<u8> {
        x.iter().map(|row| self.predict(row)).collect()
    }

    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// Iteration cap for gradient descent
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse regularisation strength (sklearn semantics)
    pub c: f64,
    /// Stop once the gradient norm drops below this
    pub tolerance: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            max_iter: 2000,
            learning_rate: 0.5,
            c: 1.0,
            tolerance: 1e-6,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Binary logistic regression
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogisticRegression {
    config: LogisticConfig,
    weights: Vec<f64>,
    bias: f64,
    iterations: usize,
}

impl LogisticRegression {
    pub fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterations used by the last fit
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn decision(&self, x: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) {
        let n_features = x.first().map_or(0, |row| row.len());
        self.weights = vec![0.0; n_features];
        self.bias = 0.0;
        self.iterations = 0;

        if x.is_empty() {
            return;
        }

        let n = x.len() as f64;
        let lambda = 1.0 / (self.config.c * n);

        for iter in 0..self.config.max_iter {
            let mut grad_w = vec![0.0; n_features];
            let mut grad_b = 0.0;

            for (row, &target) in x.iter().zip(y) {
                let err = sigmoid(self.decision(row)) - f64::from(target);
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v;
                }
                grad_b += err;
            }

            for (g, w) in grad_w.iter_mut().zip(&self.weights) {
                *g = *g / n + lambda * w;
            }
            grad_b /= n;

            let norm = (grad_w.iter().map(|g| g * g).sum::<f64>() + grad_b * grad_b).sqrt();
            self.iterations = iter + 1;
            if norm < self.config.tolerance {
                break;
            }

            for (w, g) in self.weights.iter_mut().zip(&grad_w) {
                *w -= self.config.learning_rate * g;
            }
            self.bias -= self.config.learning_rate * grad_b;
        }

        tracing::debug!("Logistic regression converged after {} iterations", self.iterations);
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.decision(x))
    }

    fn name(&self) -> &str {
        LOGISTIC_REGRESSION
    }

    fn description(&self) -> &str {
        "L2-regularised logistic regression"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// None grows trees until leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Fraction of positive training rows reaching this leaf
        probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Gini impurity of a node with `pos` positives out of `total`
fn gini(pos: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = pos as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

/// CART tree considering a random feature subset at every split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
    max_depth: Option<usize>,
    min_samples_split: usize,
    max_features: usize,
}

impl DecisionTree {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[u8],
        rows: &[usize],
        max_features: usize,
        config: &ForestConfig,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut tree = Self {
            root: Node::Leaf { probability: 0.0 },
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split.max(2),
            max_features,
        };
        tree.root = tree.build(x, y, rows.to_vec(), 0, rng);
        tree
    }

    fn build(&self, x: &[Vec<f64>], y: &[u8], rows: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let pos = rows.iter().filter(|&&r| y[r] == 1).count();
        let total = rows.len();
        let leaf = Node::Leaf {
            probability: if total == 0 { 0.0 } else { pos as f64 / total as f64 },
        };

        let pure = pos == 0 || pos == total;
        let too_deep = self.max_depth.is_some_and(|d| depth >= d);
        if pure || too_deep || total < self.min_samples_split {
            return leaf;
        }

        let n_features = x[rows[0]].len();
        if n_features == 0 {
            return leaf;
        }
        let candidates = sample(rng, n_features, self.max_features.min(n_features).max(1));
        let parent_impurity = gini(pos, total);

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in candidates.iter() {
            if let Some((threshold, impurity)) = Self::best_threshold(x, y, &rows, feature) {
                if impurity < parent_impurity && best.map_or(true, |(_, _, b)| impurity < b) {
                    best = Some((feature, threshold, impurity));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            return leaf;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| x[r][feature] <= threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(self.build(x, y, left_rows, depth + 1, rng)),
            right: Box::new(self.build(x, y, right_rows, depth + 1, rng)),
        }
    }

    /// Lowest weighted Gini split on one feature: (threshold, impurity)
    fn best_threshold(x: &[Vec<f64>], y: &[u8], rows: &[usize], feature: usize) -> Option<(f64, f64)> {
        let mut values: Vec<(f64, u8)> = rows.iter().map(|&r| (x[r][feature], y[r])).collect();
        values.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total = values.len();
        let total_pos = values.iter().filter(|(_, t)| *t == 1).count();
        let mut left_pos = 0;
        let mut best: Option<(f64, f64)> = None;

        for i in 0..total - 1 {
            left_pos += usize::from(values[i].1);
            if values[i].0 == values[i + 1].0 {
                continue;
            }
            let left_n = i + 1;
            let right_n = total - left_n;
            let impurity = (left_n as f64 * gini(left_pos, left_n)
                + right_n as f64 * gini(total_pos - left_pos, right_n))
                / total as f64;

            if best.map_or(true, |(_, b)| impurity < b) {
                best = Some(((values[i].0 + values[i + 1].0) / 2.0, impurity));
            }
        }

        best
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Bagged ensemble of decision trees
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) {
        self.trees.clear();
        if x.is_empty() {
            return;
        }

        let n = x.len();
        let n_features = x[0].len();
        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);

        for i in 0..self.config.n_trees {
            // Per-tree seeds keep every tree reproducible on its own
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(i as u64));
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            self.trees
                .push(DecisionTree::fit(x, y, &bootstrap, max_features, &self.config, &mut rng));
        }

        tracing::debug!(
            "Random forest fitted: {} trees, {} candidate features per split",
            self.trees.len(),
            max_features
        );
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_proba(x)).sum::<f64>() / self.trees.len() as f64
    }

    fn name(&self) -> &str {
        RANDOM_FOREST
    }

    fn description(&self) -> &str {
        "Random forest of bootstrap-sampled CART trees"
    }
}

/// Trained models keyed by model identifier
pub type ModelSet = BTreeMap<String, Box<dyn Classifier>>;

/// Unfitted instances of every baseline model, in `MODEL_IDS` order
pub fn all_models(logistic: &LogisticConfig, forest: &ForestConfig) -> Vec<Box<dyn Classifier>> {
    vec![
        Box::new(LogisticRegression::new(logistic.clone())),
        Box::new(RandomForest::new(forest.clone())),
    ]
}

/// Fit every baseline model on the training partition
pub fn train_models(x_train: &[Vec<f64>], y_train: &[u8], logistic: &LogisticConfig, forest: &ForestConfig) -> ModelSet {
    all_models(logistic, forest)
        .into_iter()
        .map(|mut model| {
            tracing::info!("Training {} on {} rows", model.name(), x_train.len());
            model.fit(x_train, y_train);
            (model.name().to_string(), model)
        })
        .collect()
}

/// Resolve a caller-supplied model identifier (case-insensitive) to its canonical name
pub fn resolve_model_id(requested: &str) -> Result<&'static str> {
    MODEL_IDS
        .iter()
        .copied()
        .find(|id| id.eq_ignore_ascii_case(requested.trim()))
        .ok_or_else(|| {
            BiasError::validation(format!(
                "Model '{}' not available (choose one of: {})",
                requested,
                MODEL_IDS.join(", ")
            ))
        })
}
