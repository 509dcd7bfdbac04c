//! Seeded isolation forest for unsupervised outlier scoring.
//!
//! Trees are grown in parallel, each from its own RNG stream derived from the
//! forest seed, so the fitted forest depends only on the data and the seed.

use crate::error::{DecisioningError, Result};
use crate::utils::seeded_rng;
use rand::seq::index::sample;
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum IsoNode {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn grow(rows: &[&[f64]], depth: usize, max_depth: usize, rng: &mut Pcg64Mcg) -> IsoNode {
    if rows.len() <= 1 || depth >= max_depth {
        return IsoNode::Leaf { size: rows.len() };
    }

    let dims = rows[0].len();
    let splittable: Vec<(usize, f64, f64)> = (0..dims)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
                (lo.min(r[f]), hi.max(r[f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if splittable.is_empty() {
        return IsoNode::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<&[f64]>, Vec<&[f64]>) =
        rows.iter().copied().partition(|r| r[feature] < threshold);

    IsoNode::Split {
        feature,
        threshold,
        left: Box::new(grow(&left, depth + 1, max_depth, rng)),
        right: Box::new(grow(&right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &IsoNode, point: &[f64], depth: usize) -> f64 {
    match node {
        IsoNode::Leaf { size } => depth as f64 + average_path_length(*size),
        IsoNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if point[*feature] < *threshold {
                path_length(left, point, depth + 1)
            } else {
                path_length(right, point, depth + 1)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsoNode>,
    sample_size: usize,
    dims: usize,
}

impl IsolationForest {
    pub fn fit(data: &[Vec<f64>], n_trees: usize, sample_size: usize, seed: u64) -> Result<Self> {
        let Some(first) = data.first() else {
            return Err(DecisioningError::ModelUnavailable(
                "isolation forest needs at least one sample".to_string(),
            ));
        };
        let dims = first.len();
        if dims == 0 || data.iter().any(|r| r.len() != dims || r.iter().any(|v| !v.is_finite())) {
            return Err(DecisioningError::ModelUnavailable(
                "isolation forest features must be finite and equally sized".to_string(),
            ));
        }

        let psi = sample_size.min(data.len()).max(1);
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = seeded_rng(seed, t as u64 + 1);
                let rows: Vec<&[f64]> = sample(&mut rng, data.len(), psi)
                    .into_iter()
                    .map(|i| data[i].as_slice())
                    .collect();
                grow(&rows, 0, max_depth, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            sample_size: psi,
            dims,
        })
    }

    /// Anomaly score in (0, 1]; values near 1 isolate quickly.
    pub fn score(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() || point.len() != self.dims {
            return 0.0;
        }
        let avg = self.trees.iter().map(|t| path_length(t, point, 0)).sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c <= 0.0 {
            return 0.5;
        }
        2f64.powf(-avg / c)
    }

    pub fn score_all(&self, data: &[Vec<f64>]) -> Vec<f64> {
        data.iter().map(|p| self.score(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![10.0 + (i % 7) as f64 * 0.1, 5.0 + (i % 5) as f64 * 0.1])
            .collect();
        data.push(vec![40.0, -20.0]);
        data
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 100, 64, 7).unwrap();
        let scores = forest.score_all(&data);
        let (max_idx, _) = scores
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, s)| if *s > acc.1 { (i, *s) } else { acc });
        assert_eq!(max_idx, data.len() - 1);
        assert!(scores[max_idx] > 0.6);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 50, 32, 11).unwrap().score_all(&data);
        let b = IsolationForest::fit(&data, 50, 32, 11).unwrap().score_all(&data);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_input_is_model_unavailable() {
        assert!(matches!(
            IsolationForest::fit(&[], 10, 8, 1),
            Err(DecisioningError::ModelUnavailable(_))
        ));
        assert!(IsolationForest::fit(&[vec![1.0], vec![f64::NAN]], 10, 8, 1).is_err());
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244).abs() < 0.01);
    }
}
