//! The offline-trained risk classifier artifact.
//!
//! A [`RiskModel`] is an immutable random forest loaded from JSON. Every node
//! stores the share of risky examples that reached it, which gives an exact
//! additive attribution: walking a sample's path, each split credits the
//! change in node value to the feature it tested, so per-feature contributions
//! sum to `probability - baseline`.

use crate::error::{DecisioningError, Result};
use crate::features::{FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Share of risky training examples at this node.
    pub value: f64,
    pub samples: usize,
    pub split: Option<Split>,
}

/// Flat node arena; index 0 is the root and children always follow their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn validate(&self, dims: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(DecisioningError::ModelArtifact("tree has no nodes".to_string()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if !(0.0..=1.0).contains(&node.value) {
                return Err(DecisioningError::ModelArtifact(format!(
                    "node {} value {} outside [0, 1]",
                    i, node.value
                )));
            }
            if let Some(split) = &node.split {
                let in_range = |c: usize| c > i && c < self.nodes.len();
                if split.feature >= dims
                    || !in_range(split.left)
                    || !in_range(split.right)
                    || !split.threshold.is_finite()
                {
                    return Err(DecisioningError::ModelArtifact(format!(
                        "node {} has an invalid split",
                        i
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn root_value(&self) -> f64 {
        self.nodes.first().map(|n| n.value).unwrap_or(0.0)
    }

    /// Leaf value for `x`, crediting each split's value change to its feature.
    fn walk(&self, x: &[f64], contributions: Option<&mut [f64]>) -> f64 {
        let mut contributions = contributions;
        let mut idx = 0;
        while let Some(split) = &self.nodes[idx].split {
            let next = if x[split.feature] < split.threshold {
                split.left
            } else {
                split.right
            };
            if let Some(c) = contributions.as_deref_mut() {
                c[split.feature] += self.nodes[next].value - self.nodes[idx].value;
            }
            idx = next;
        }
        self.nodes[idx].value
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.walk(x, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub samples: usize,
    pub positives: usize,
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    pub training_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub probability: f64,
    pub baseline: f64,
    /// One entry per feature, in feature order. Positive values increase risk.
    pub contributions: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    pub format_version: u32,
    pub model_id: String,
    pub feature_names: Vec<String>,
    pub trees: Vec<DecisionTree>,
    pub training: TrainingMetadata,
}

impl RiskModel {
    /// Checks the artifact can be used with this scorer's feature vector.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(DecisioningError::ModelArtifact(format!(
                "unsupported format version {} (expected {})",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        let expected: Vec<&str> = FEATURE_NAMES.to_vec();
        let actual: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        if actual != expected {
            return Err(DecisioningError::ModelArtifact(format!(
                "feature list mismatch: model has {} features, scorer expects {}",
                actual.len(),
                FEATURE_COUNT
            )));
        }
        if self.trees.is_empty() {
            return Err(DecisioningError::ModelArtifact("forest has no trees".to_string()));
        }
        for tree in &self.trees {
            tree.validate(FEATURE_COUNT)?;
        }
        Ok(())
    }

    /// Mean root value: the prediction before any feature is observed.
    pub fn baseline(&self) -> f64 {
        self.trees.iter().map(DecisionTree::root_value).sum::<f64>()
            / self.trees.len().max(1) as f64
    }

    fn check_input(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.feature_names.len() {
            return Err(DecisioningError::ModelUnavailable(format!(
                "feature vector has {} values, model expects {}",
                x.len(),
                self.feature_names.len()
            )));
        }
        Ok(())
    }

    pub fn predict(&self, x: &[f64]) -> Result<f64> {
        self.check_input(x)?;
        Ok(self.trees.iter().map(|t| t.predict(x)).sum::<f64>() / self.trees.len() as f64)
    }

    pub fn explain(&self, x: &[f64]) -> Result<Attribution> {
        self.check_input(x)?;
        let mut contributions = vec![0.0; x.len()];
        let mut total = 0.0;
        for tree in &self.trees {
            total += tree.walk(x, Some(contributions.as_mut_slice()));
        }
        let n = self.trees.len() as f64;
        for c in contributions.iter_mut() {
            *c /= n;
        }
        Ok(Attribution {
            probability: total / n,
            baseline: self.baseline(),
            contributions,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
