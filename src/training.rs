//! Offline training of the risk classifier.
//!
//! This runs as a separate batch job (see `demos/train_risk_model.rs`); the
//! scoring path only ever loads the resulting [`RiskModel`]. Trees are grown in
//! parallel and each draws from its own seeded stream, so a given seed and
//! training set always produce the same artifact.

use crate::error::{DecisioningError, Result};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use crate::metrics::confidence_from_cv;
use crate::model::{
    DecisionTree, RiskModel, Split, TrainingMetadata, TreeNode, MODEL_FORMAT_VERSION,
};
use crate::utils::seeded_rng;
use log::info;
use rand::seq::index::sample;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: Vec<f64>,
    /// `true` when the entity went on to default.
    pub label: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 6,
            min_samples_leaf: 5,
            seed: 42,
        }
    }
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct TreeBuilder<'a> {
    examples: &'a [TrainingExample],
    config: &'a ForestConfig,
    features_per_split: usize,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_> {
    /// Grows the subtree for `rows` and returns its node index.
    fn grow(&mut self, rows: &[usize], depth: usize, rng: &mut Pcg64Mcg) -> usize {
        let positives = rows.iter().filter(|&&r| self.examples[r].label).count();
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            value: positives as f64 / rows.len().max(1) as f64,
            samples: rows.len(),
            split: None,
        });

        let pure = positives == 0 || positives == rows.len();
        if pure || depth >= self.config.max_depth || rows.len() < 2 * self.config.min_samples_leaf {
            return idx;
        }

        let Some((feature, threshold)) = self.best_split(rows, positives, rng) else {
            return idx;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&r| self.examples[r].features[feature] < threshold);

        let left = self.grow(&left_rows, depth + 1, rng);
        let right = self.grow(&right_rows, depth + 1, rng);
        self.nodes[idx].split = Some(Split {
            feature,
            threshold,
            left,
            right,
        });
        idx
    }

    /// Lowest weighted Gini impurity over a random subset of features.
    fn best_split(
        &self,
        rows: &[usize],
        positives: usize,
        rng: &mut Pcg64Mcg,
    ) -> Option<(usize, f64)> {
        let n = rows.len();
        let parent = gini(positives, n);
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut best: Option<(f64, usize, f64)> = None;

        for feature in sample(rng, FEATURE_COUNT, self.features_per_split).into_iter() {
            let mut column: Vec<(f64, bool)> = rows
                .iter()
                .map(|&r| (self.examples[r].features[feature], self.examples[r].label))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0usize;
            for i in 0..n - 1 {
                if column[i].1 {
                    left_pos += 1;
                }
                let left_n = i + 1;
                if left_n < min_leaf || n - left_n < min_leaf || column[i].0 >= column[i + 1].0 {
                    continue;
                }
                let impurity = (left_n as f64 * gini(left_pos, left_n)
                    + (n - left_n) as f64 * gini(positives - left_pos, n - left_n))
                    / n as f64;
                if impurity + 1e-12 < parent && best.map(|b| impurity < b.0).unwrap_or(true) {
                    best = Some((impurity, feature, (column[i].0 + column[i + 1].0) / 2.0));
                }
            }
        }

        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

pub struct ForestTrainer {
    config: ForestConfig,
}

impl ForestTrainer {
    pub fn new(config: ForestConfig) -> Self {
        Self { config }
    }

    pub fn train(&self, examples: &[TrainingExample]) -> Result<RiskModel> {
        if examples.is_empty() {
            return Err(DecisioningError::InvalidConfig("no training examples".to_string()));
        }
        if let Some(bad) = examples.iter().position(|e| {
            e.features.len() != FEATURE_COUNT || e.features.iter().any(|v| !v.is_finite())
        }) {
            return Err(DecisioningError::InvalidConfig(format!(
                "training example {} does not have {} finite features",
                bad, FEATURE_COUNT
            )));
        }
        if self.config.n_trees == 0 || self.config.max_depth == 0 {
            return Err(DecisioningError::InvalidConfig(
                "forest needs at least one tree of depth one".to_string(),
            ));
        }

        let features_per_split = (FEATURE_COUNT as f64).sqrt().ceil() as usize;
        let n = examples.len();
        info!(
            "Training {} trees on {} examples ({} features per split)",
            self.config.n_trees, n, features_per_split
        );

        let trees: Vec<DecisionTree> = (0..self.config.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = seeded_rng(self.config.seed, t as u64 + 1);
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder {
                    examples,
                    config: &self.config,
                    features_per_split,
                    nodes: Vec::new(),
                };
                builder.grow(&bootstrap, 0, &mut rng);
                DecisionTree { nodes: builder.nodes }
            })
            .collect();

        let mut model = RiskModel {
            format_version: MODEL_FORMAT_VERSION,
            model_id: format!(
                "rf-{}x{}-seed{}",
                self.config.n_trees, self.config.max_depth, self.config.seed
            ),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            trees,
            training: TrainingMetadata {
                samples: n,
                positives: examples.iter().filter(|e| e.label).count(),
                n_trees: self.config.n_trees,
                max_depth: self.config.max_depth,
                min_samples_leaf: self.config.min_samples_leaf,
                seed: self.config.seed,
                training_accuracy: 0.0,
            },
        };

        let mut correct = 0usize;
        for e in examples {
            if (model.predict(&e.features)? >= 0.5) == e.label {
                correct += 1;
            }
        }
        model.training.training_accuracy = correct as f64 / n as f64;
        info!(
            "Trained model '{}': training accuracy {:.3}, baseline {:.3}",
            model.model_id,
            model.training.training_accuracy,
            model.baseline()
        );
        model.validate()?;
        Ok(model)
    }
}

/// `(centre, loading on latent health, noise sd, min, max, integer)` per feature.
/// Healthy entities have positive latent health.
const SYNTHETIC_PROFILE: [(f64, f64, f64, f64, f64, bool); FEATURE_COUNT] = [
    (12.5, 0.3, 1.0, 8.0, 18.0, false),
    (12.3, 0.2, 1.0, 8.0, 18.0, false),
    (40.0, -15.0, 12.0, 2.0, 250.0, false),
    (0.0, 0.0, 0.0, 0.0, 100.0, false),
    (5.0, 8.0, 10.0, -60.0, 120.0, false),
    (2.0, 6.0, 10.0, -60.0, 120.0, false),
    (4.0, 8.0, 12.0, -60.0, 120.0, false),
    (0.3, 0.5, 1.0, -10.0, 10.0, false),
    (1.6, -0.3, 0.3, 1.0, 5.0, false),
    (5.0, 8.0, 10.0, -60.0, 90.0, false),
    (10.0, 8.0, 8.0, -80.0, 60.0, false),
    (65.0, 15.0, 15.0, 0.0, 100.0, false),
    (25.0, -8.0, 10.0, 0.0, 150.0, false),
    (2.0, 0.6, 0.6, 0.0, 8.0, false),
    (50.0, -15.0, 15.0, 0.0, 100.0, false),
    (40.0, -12.0, 15.0, 0.0, 300.0, false),
    (30.0, -12.0, 8.0, 0.0, 100.0, false),
    (85.0, 8.0, 8.0, 0.0, 100.0, false),
    (75.0, 12.0, 15.0, 0.0, 100.0, false),
    (60.0, 12.0, 20.0, 0.0, 100.0, false),
    (700.0, 50.0, 40.0, 300.0, 900.0, true),
    (1.0, -0.8, 1.0, 0.0, 12.0, true),
    (0.2, -0.3, 0.5, 0.0, 6.0, true),
    (2.0, -0.8, 1.5, 0.0, 15.0, true),
    (75.0, 12.0, 15.0, 0.0, 100.0, false),
    (20.0, -8.0, 12.0, 0.0, 100.0, false),
    (70.0, 8.0, 20.0, 0.0, 100.0, false),
    (14.0, 5.0, 6.0, 0.0, 24.0, false),
    (10.0, 5.0, 6.0, 0.0, 24.0, false),
    (0.08, -0.02, 0.03, 0.0, 0.5, false),
    (1.0, -0.5, 1.0, 0.0, 10.0, true),
    (24.0, 3.0, 8.0, 1.0, 60.0, true),
    (0.03, -0.01, 0.03, 0.0, 0.5, false),
];

const INCOME_CV_FEATURE: usize = 2;
const INCOME_CONFIDENCE_FEATURE: usize = 3;

/// Labelled synthetic examples for bootstrapping a model when no historical
/// portfolio is available. The ranges are generator sanity bounds, not
/// lending policy.
pub fn synthetic_examples(count: usize, seed: u64) -> Result<Vec<TrainingExample>> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| DecisioningError::InvalidConfig(e.to_string()))?;
    let mut rng = seeded_rng(seed, 0);

    let examples = (0..count)
        .map(|_| {
            let health: f64 = normal.sample(&mut rng);
            let mut features: Vec<f64> = SYNTHETIC_PROFILE
                .iter()
                .map(|&(centre, loading, noise, lo, hi, integer)| {
                    let v = (centre + loading * health + noise * normal.sample(&mut rng))
                        .clamp(lo, hi);
                    if integer {
                        v.round()
                    } else {
                        v
                    }
                })
                .collect();
            features[INCOME_CONFIDENCE_FEATURE] = confidence_from_cv(features[INCOME_CV_FEATURE]).0;

            let logit = -1.0 - 1.8 * health + 0.6 * normal.sample(&mut rng);
            let p_default = 1.0 / (1.0 + (-logit).exp());
            TrainingExample {
                features,
                label: rng.gen_bool(p_default.clamp(0.0, 1.0)),
            }
        })
        .collect();

    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ForestConfig {
        ForestConfig {
            n_trees: 25,
            max_depth: 5,
            min_samples_leaf: 5,
            seed: 3,
        }
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(0, 10), 0.0);
        assert_eq!(gini(10, 10), 0.0);
        assert_eq!(gini(5, 10), 0.5);
        assert_eq!(gini(0, 0), 0.0);
    }

    #[test]
    fn test_synthetic_examples_are_reproducible() {
        let a = synthetic_examples(50, 9).unwrap();
        let b = synthetic_examples(50, 9).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|e| e.features.len() == FEATURE_COUNT));
        assert!(a.iter().all(|e| (300.0..=900.0).contains(&e.features[20])));
        let positives = a.iter().filter(|e| e.label).count();
        assert!(positives > 0 && positives < a.len());
    }

    #[test]
    fn test_training_is_deterministic_and_learns() {
        let data = synthetic_examples(400, 1).unwrap();
        let trainer = ForestTrainer::new(small_config());
        let first = trainer.train(&data).unwrap();
        let second = trainer.train(&data).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.trees.len(), 25);
        let positives = data.iter().filter(|e| e.label).count();
        let majority = positives.max(data.len() - positives) as f64 / data.len() as f64;
        assert!(first.training.training_accuracy > majority);
    }

    #[test]
    fn test_rejects_malformed_examples() {
        let trainer = ForestTrainer::new(small_config());
        assert!(trainer.train(&[]).is_err());
        let bad = vec![TrainingExample {
            features: vec![1.0; 3],
            label: true,
        }];
        assert!(trainer.train(&bad).is_err());
    }
}
