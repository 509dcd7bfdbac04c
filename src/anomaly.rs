//! Two-layer anomaly detection.
//!
//! The transaction layer scores individual transactions; the period layer looks
//! for change-points in monthly totals. Both layers prefer an isolation forest
//! and fall back to IQR + z-score rules when it cannot be used, and every
//! report names the method that actually ran.

use crate::config::AnomalyConfig;
use crate::error::DecisioningError;
use crate::ingestion::{CanonicalTransaction, MonthlyPoint, ProfileView};
use crate::isolation::IsolationForest;
use crate::stats::{mean, median, percentile, std_dev, Quartiles};
use crate::utils::PeriodKey;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATISTICAL_METHOD: &str = "Statistical (IQR + Z-score)";

const TRANSACTION_STREAM: u64 = 101;
const PERIOD_STREAM: u64 = 102;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Inflow,
    Outflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Spike,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionAnomaly {
    pub id: String,
    pub date: NaiveDate,
    pub category: String,
    pub amount: f64,
    pub anomaly_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAnomaly {
    pub period: PeriodKey,
    pub series: SeriesKind,
    pub observed_value: f64,
    pub baseline_median: f64,
    pub baseline_mean: f64,
    pub z_score: f64,
    pub deviation_from_median_pct: f64,
    pub fence_low: f64,
    pub fence_high: f64,
    /// Deviation the month had to exceed to be flagged.
    pub alert_threshold_pct: f64,
    pub direction: Direction,
    pub model_score: Option<f64>,
    pub detection_method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub entity_id: String,
    pub transaction_method: String,
    pub period_method: String,
    pub transactions_scanned: usize,
    pub periods_scanned: usize,
    pub transaction_anomalies: Vec<TransactionAnomaly>,
    pub period_anomalies: Vec<PeriodAnomaly>,
    /// Why a learned layer was not used, one entry per affected layer.
    pub fallback_reasons: Vec<String>,
}

impl AnomalyReport {
    pub fn total_flagged(&self) -> usize {
        self.transaction_anomalies.len() + self.period_anomalies.len()
    }
}

/// Statistical verdict for one month against its trailing baseline.
#[derive(Debug, Clone)]
struct PeriodCandidate {
    index: usize,
    value: f64,
    median: f64,
    mean: f64,
    z: f64,
    deviation_pct: f64,
    fence: (f64, f64),
    threshold_pct: f64,
    flagged: bool,
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    seed: u64,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    fn learned_method(&self) -> String {
        format!(
            "Isolation Forest (contamination {:.0}%)",
            self.config.contamination * 100.0
        )
    }

    /// Returns why the learned layer cannot run on `samples` rows, if it cannot.
    fn learned_unavailable(&self, layer: &str, samples: usize) -> Option<DecisioningError> {
        if !self.config.use_learned_model {
            return Some(DecisioningError::ModelUnavailable(format!(
                "{} layer: learned model disabled by configuration",
                layer
            )));
        }
        if samples < self.config.min_samples_for_model {
            return Some(DecisioningError::ModelUnavailable(format!(
                "{} layer: {} samples, isolation forest needs {}",
                layer, samples, self.config.min_samples_for_model
            )));
        }
        None
    }

    pub fn detect(&self, view: &ProfileView) -> AnomalyReport {
        let mut fallback_reasons = Vec::new();

        let (transaction_method, transaction_anomalies) =
            self.scan_transactions(&view.transactions, &mut fallback_reasons);
        let (period_method, period_anomalies) =
            self.scan_periods(&view.months, &mut fallback_reasons);

        for reason in &fallback_reasons {
            warn!("Entity '{}': {}", view.entity_id, reason);
        }

        let report = AnomalyReport {
            entity_id: view.entity_id.clone(),
            transaction_method,
            period_method,
            transactions_scanned: view.transactions.len(),
            periods_scanned: view.months.len(),
            transaction_anomalies,
            period_anomalies,
            fallback_reasons,
        };
        debug!(
            "Anomaly scan for '{}': {} of {} item(s) flagged",
            view.entity_id,
            report.total_flagged(),
            report.transactions_scanned + report.periods_scanned
        );
        report
    }

    // ── Transaction layer ───────────────────────────────────────────

    pub fn scan_transactions(
        &self,
        transactions: &[CanonicalTransaction],
        fallback_reasons: &mut Vec<String>,
    ) -> (String, Vec<TransactionAnomaly>) {
        let stats = category_stats(transactions);

        if let Some(cause) = self.learned_unavailable("transaction", transactions.len()) {
            fallback_reasons.push(cause.to_string());
            return (STATISTICAL_METHOD.to_string(), self.transaction_rules(transactions, &stats));
        }

        let features = transaction_features(transactions, &stats);
        let forest = match IsolationForest::fit(
            &features,
            self.config.n_trees,
            self.config.sample_size,
            crate::utils::derive_seed(self.seed, TRANSACTION_STREAM),
        ) {
            Ok(f) => f,
            Err(e) => {
                fallback_reasons.push(e.to_string());
                return (
                    STATISTICAL_METHOD.to_string(),
                    self.transaction_rules(transactions, &stats),
                );
            }
        };

        let scores = forest.score_all(&features);
        let cutoff = percentile(&scores, (1.0 - self.config.contamination) * 100.0).unwrap_or(1.0);
        let flagged = transactions
            .iter()
            .zip(&scores)
            .filter(|(_, s)| **s >= cutoff)
            .map(|(t, s)| {
                let cat_mean = stats.get(&t.category).map(|c| c.0).unwrap_or(t.amount);
                TransactionAnomaly {
                    id: t.id.clone(),
                    date: t.date,
                    category: t.category.clone(),
                    amount: t.amount,
                    anomaly_score: *s,
                    reason: format!(
                        "Isolation score {:.3} in the top {:.0}%; amount {:.2} vs category '{}' mean {:.2}",
                        s,
                        self.config.contamination * 100.0,
                        t.amount,
                        t.category,
                        cat_mean
                    ),
                }
            })
            .collect();

        (self.learned_method(), flagged)
    }

    fn transaction_rules(
        &self,
        transactions: &[CanonicalTransaction],
        stats: &BTreeMap<String, (f64, f64, Option<Quartiles>)>,
    ) -> Vec<TransactionAnomaly> {
        let thr = self.config.transaction_z_threshold;
        transactions
            .iter()
            .filter_map(|t| {
                let (cat_mean, cat_std, quartiles) = stats.get(&t.category)?;
                let quartiles = (*quartiles)?;
                let z = (t.amount - cat_mean) / cat_std.max(1e-9);
                let (lo, hi) = quartiles.fence(self.config.iqr_multiplier);
                let outside = t.amount < lo || t.amount > hi;
                if z.abs() <= thr && !outside {
                    return None;
                }
                Some(TransactionAnomaly {
                    id: t.id.clone(),
                    date: t.date,
                    category: t.category.clone(),
                    amount: t.amount,
                    anomaly_score: z.abs() / (z.abs() + thr),
                    reason: format!(
                        "Amount {:.2} has z-score {:.2} within category '{}' (mean {:.2}); fence [{:.2}, {:.2}]",
                        t.amount, z, t.category, cat_mean, lo, hi
                    ),
                })
            })
            .collect()
    }

    // ── Period layer ────────────────────────────────────────────────

    pub fn scan_periods(
        &self,
        months: &[MonthlyPoint],
        fallback_reasons: &mut Vec<String>,
    ) -> (String, Vec<PeriodAnomaly>) {
        let learned_blocker = self.learned_unavailable("period", months.len());
        let method = match &learned_blocker {
            Some(cause) => {
                fallback_reasons.push(cause.to_string());
                STATISTICAL_METHOD.to_string()
            }
            None => format!("{} confirmed by {}", self.learned_method(), STATISTICAL_METHOD),
        };

        let mut anomalies = Vec::new();
        for (kind, values) in [
            (SeriesKind::Inflow, months.iter().map(|m| m.inflow).collect::<Vec<_>>()),
            (SeriesKind::Outflow, months.iter().map(|m| m.outflow).collect::<Vec<_>>()),
        ] {
            let candidates = self.period_candidates(&values);
            let model_scores = if learned_blocker.is_none() {
                match self.period_model_scores(&values, &candidates, kind) {
                    Ok(scores) => Some(scores),
                    Err(e) => {
                        fallback_reasons.push(e.to_string());
                        None
                    }
                }
            } else {
                None
            };

            for c in candidates.iter().filter(|c| c.flagged) {
                let model_score = match &model_scores {
                    Some((scores, cutoff)) => {
                        let score = scores[c.index];
                        if score < *cutoff {
                            debug!(
                                "Period {} ({:?}) not confirmed by isolation score {:.3} < {:.3}",
                                months[c.index].period, kind, score, cutoff
                            );
                            continue;
                        }
                        Some(score)
                    }
                    None => None,
                };
                anomalies.push(PeriodAnomaly {
                    period: months[c.index].period,
                    series: kind,
                    observed_value: c.value,
                    baseline_median: c.median,
                    baseline_mean: c.mean,
                    z_score: c.z,
                    deviation_from_median_pct: c.deviation_pct,
                    fence_low: c.fence.0,
                    fence_high: c.fence.1,
                    alert_threshold_pct: c.threshold_pct,
                    direction: if c.value >= c.median {
                        Direction::Spike
                    } else {
                        Direction::Drop
                    },
                    model_score,
                    detection_method: method.clone(),
                });
            }
        }

        anomalies.sort_by(|a, b| {
            a.period
                .cmp(&b.period)
                .then_with(|| (a.series as u8).cmp(&(b.series as u8)))
        });
        (method, anomalies)
    }

    /// Evaluates every month with enough trailing history. Flagged months are
    /// kept out of later baselines so one spike cannot mask the next month or
    /// inflate the alert threshold. A run of `shift_confirm_months` flags in one
    /// direction is a level shift: the baseline restarts at its first month and
    /// only that month remains flagged.
    fn period_candidates(&self, values: &[f64]) -> Vec<PeriodCandidate> {
        let cfg = &self.config;
        let mut normal: Vec<usize> = Vec::new();
        let mut deviations: Vec<f64> = Vec::new();
        let mut out: Vec<PeriodCandidate> = Vec::new();
        // Positions in `out` of the current run of flags, and the run's direction.
        let mut run: Vec<usize> = Vec::new();
        let mut run_up = false;

        for (i, &value) in values.iter().enumerate() {
            let start = normal.len().saturating_sub(cfg.trailing_window_months);
            let trailing: Vec<f64> = normal[start..].iter().map(|&j| values[j]).collect();
            if trailing.len() < cfg.min_trailing_months {
                normal.push(i);
                continue;
            }

            let med = median(&trailing).unwrap_or(0.0);
            if med.abs() < f64::EPSILON {
                debug!("Month {} skipped: trailing median is zero", i);
                normal.push(i);
                continue;
            }
            let avg = mean(&trailing).unwrap_or(med);
            let sd = std_dev(&trailing)
                .unwrap_or(0.0)
                .max(cfg.std_floor_fraction * med.abs())
                .max(f64::EPSILON);
            let z = (value - avg) / sd;
            let fence = Quartiles::of(&trailing)
                .map(|q| q.fence(cfg.iqr_multiplier))
                .unwrap_or((med, med));
            let deviation_pct = (value - med) / med.abs() * 100.0;

            let threshold_pct = if deviations.len() >= cfg.alert_min_history {
                percentile(&deviations, cfg.alert_percentile)
                    .unwrap_or(0.0)
                    .max(cfg.min_deviation_pct)
            } else {
                cfg.min_deviation_pct
            };

            let statistical = z.abs() > cfg.z_threshold || value < fence.0 || value > fence.1;
            let flagged = statistical && deviation_pct.abs() > threshold_pct;

            if flagged {
                let up = value >= med;
                if run.is_empty() || up != run_up {
                    run.clear();
                    run_up = up;
                }
                run.push(out.len());
            } else {
                run.clear();
                normal.push(i);
                deviations.push(deviation_pct.abs());
            }
            out.push(PeriodCandidate {
                index: i,
                value,
                median: med,
                mean: avg,
                z,
                deviation_pct,
                fence,
                threshold_pct,
                flagged,
            });

            if run.len() >= cfg.shift_confirm_months {
                for &k in &run[1..] {
                    out[k].flagged = false;
                }
                normal = run.iter().map(|&k| out[k].index).collect();
                debug!(
                    "Level shift at month {} confirmed after {} month(s); baseline restarted",
                    out[run[0]].index,
                    run.len()
                );
                run.clear();
            }
        }

        out
    }

    /// Isolation scores for every month plus the contamination cutoff.
    fn period_model_scores(
        &self,
        values: &[f64],
        candidates: &[PeriodCandidate],
        kind: SeriesKind,
    ) -> crate::error::Result<(Vec<f64>, f64)> {
        let mut ratio = vec![0.0; values.len()];
        for c in candidates {
            ratio[c.index] = ((1.0 + c.value.max(0.0)) / (1.0 + c.median.max(0.0))).ln();
        }
        let features: Vec<Vec<f64>> = values
            .iter()
            .zip(&ratio)
            .map(|(v, r)| vec![(1.0 + v.max(0.0)).ln(), *r])
            .collect();
        let stream = PERIOD_STREAM + kind as u64;
        let forest = IsolationForest::fit(
            &features,
            self.config.n_trees,
            self.config.sample_size,
            crate::utils::derive_seed(self.seed, stream),
        )?;
        let scores = forest.score_all(&features);
        let cutoff = percentile(&scores, (1.0 - self.config.contamination) * 100.0).unwrap_or(1.0);
        Ok((scores, cutoff))
    }
}

/// Per-category (mean, population std, quartiles). Quartiles are only kept for
/// categories with at least four transactions.
fn category_stats(
    transactions: &[CanonicalTransaction],
) -> BTreeMap<String, (f64, f64, Option<Quartiles>)> {
    let mut by_category: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for t in transactions {
        by_category.entry(t.category.clone()).or_default().push(t.amount);
    }
    by_category
        .into_iter()
        .map(|(cat, amounts)| {
            let m = mean(&amounts).unwrap_or(0.0);
            let sd = std_dev(&amounts).unwrap_or(0.0);
            let q = if amounts.len() >= 4 { Quartiles::of(&amounts) } else { None };
            (cat, (m, sd, q))
        })
        .collect()
}

/// `[ln(1 + amount), months since the latest transaction, ln ratio to category mean]`
fn transaction_features(
    transactions: &[CanonicalTransaction],
    stats: &BTreeMap<String, (f64, f64, Option<Quartiles>)>,
) -> Vec<Vec<f64>> {
    let latest = transactions.iter().map(|t| t.date).max();
    transactions
        .iter()
        .map(|t| {
            let recency = latest
                .map(|l| (l - t.date).num_days() as f64 / 30.0)
                .unwrap_or(0.0);
            let cat_mean = stats.get(&t.category).map(|c| c.0).unwrap_or(t.amount);
            vec![
                (1.0 + t.amount).ln(),
                recency,
                ((1.0 + t.amount) / (1.0 + cat_mean)).ln(),
            ]
        })
        .collect()
}
