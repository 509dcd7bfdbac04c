//! Risk scoring.
//!
//! The deterministic composite is the authoritative 0-100 score. The trained
//! classifier, when loaded, contributes a default probability and the feature
//! attribution behind it; without a model the drivers come from the composite's
//! own lost points.

use crate::config::RiskConfig;
use crate::error::DecisioningError;
use crate::features::{FeatureVector, ScoringInputs, FEATURE_NAMES};
use crate::metrics::{keys, MetricsReport};
use crate::model::RiskModel;
use crate::stats::scale_points;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    Approve,
    Review,
    Caution,
}

impl RiskCategory {
    pub fn from_score(score: f64, config: &RiskConfig) -> Self {
        if score >= config.approve_threshold {
            Self::Approve
        } else if score >= config.review_threshold {
            Self::Review
        } else {
            Self::Caution
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    /// Metric value the points were derived from; `None` when it was undefined.
    pub input: Option<f64>,
    pub points: f64,
    pub max_points: f64,
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub name: String,
    pub weight: f64,
    pub points: f64,
    pub max_points: f64,
    pub components: Vec<ScoreComponent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverDirection {
    IncreasesRisk,
    DecreasesRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDriver {
    pub feature: String,
    pub value: Option<f64>,
    pub contribution: f64,
    pub direction: DriverDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAgreement {
    pub model_probability: f64,
    pub composite_probability: f64,
    pub divergence: f64,
    pub divergent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub entity_id: String,
    pub composite_score: f64,
    /// Default probability: the model's when loaded, otherwise implied by the composite.
    pub probability: f64,
    pub category: RiskCategory,
    pub sub_scores: Vec<SubScore>,
    pub top_feature_drivers: Vec<FeatureDriver>,
    pub method: String,
    pub model_id: Option<String>,
    /// Reference point the driver contributions are measured from.
    pub baseline: f64,
    pub model_agreement: Option<ModelAgreement>,
    pub fallback_reason: Option<String>,
    pub features: FeatureVector,
    pub explanation: String,
}

fn component(
    name: &str,
    input: Option<f64>,
    points: f64,
    max_points: f64,
    rule: &str,
) -> ScoreComponent {
    ScoreComponent {
        name: name.to_string(),
        input,
        points: points.clamp(0.0, max_points),
        max_points,
        rule: rule.to_string(),
    }
}

/// `value / 100 * max`, or `fallback` points when undefined.
fn share(
    name: &str,
    input: Option<f64>,
    max_points: f64,
    fallback: f64,
    rule: &str,
) -> ScoreComponent {
    let points = input.map(|v| v.clamp(0.0, 100.0) / 100.0 * max_points).unwrap_or(fallback);
    component(name, input, points, max_points, rule)
}

fn scaled(
    name: &str,
    input: Option<f64>,
    worst: f64,
    best: f64,
    max_points: f64,
    fallback: f64,
    rule: &str,
) -> ScoreComponent {
    let points = input.map(|v| scale_points(v, worst, best, max_points)).unwrap_or(fallback);
    component(name, input, points, max_points, rule)
}

fn sub_score(name: &str, weight: f64, components: Vec<ScoreComponent>) -> SubScore {
    // Components are allocated in points of a 100-point scale at the default
    // weights; rescale when the configured weight differs.
    let nominal: f64 = components.iter().map(|c| c.max_points).sum();
    let target = weight * 100.0;
    let factor = if nominal > 0.0 { target / nominal } else { 0.0 };
    let points = components.iter().map(|c| c.points).sum::<f64>() * factor;
    SubScore {
        name: name.to_string(),
        weight,
        points,
        max_points: target,
        components,
    }
}

pub struct RiskScorer {
    config: RiskConfig,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// The three weighted sub-scores. Their points sum to the composite score.
    pub fn composite(
        &self,
        metrics: &MetricsReport,
        reconciliation_rate: Option<f64>,
    ) -> Vec<SubScore> {
        let v = |k: &str| metrics.value(k);

        let cashflow = sub_score(
            "cashflow_stability",
            self.config.cashflow_weight,
            vec![
                share(
                    keys::INCOME_CONFIDENCE,
                    v(keys::INCOME_CONFIDENCE),
                    20.0,
                    0.0,
                    "income_confidence x 0.20; undefined -> 0",
                ),
                share(
                    keys::SURPLUS_RATIO,
                    v(keys::SURPLUS_RATIO),
                    15.0,
                    0.0,
                    "surplus_ratio% of 15",
                ),
                scaled(
                    keys::SEASONALITY_INDEX,
                    v(keys::SEASONALITY_INDEX),
                    3.0,
                    1.2,
                    10.0,
                    5.0,
                    "10 at index <= 1.2, 0 at >= 3.0; undefined -> 5",
                ),
            ],
        );

        let business = sub_score(
            "business_health",
            self.config.business_health_weight,
            vec![
                share(
                    keys::FILING_REGULARITY,
                    v(keys::FILING_REGULARITY),
                    8.0,
                    0.0,
                    "filing_regularity% of 8; no filings -> 0",
                ),
                scaled(
                    keys::GROWTH_RATE,
                    v(keys::GROWTH_RATE),
                    -20.0,
                    20.0,
                    9.0,
                    4.5,
                    "9 at growth >= 20%, 0 at <= -20%; undefined -> 4.5",
                ),
                scaled(
                    keys::WORKING_CAPITAL_GAP,
                    v(keys::WORKING_CAPITAL_GAP),
                    -30.0,
                    30.0,
                    8.0,
                    4.0,
                    "8 at gap >= 30 days, 0 at <= -30; undefined -> 4",
                ),
                share(
                    "reconciliation_rate",
                    reconciliation_rate,
                    10.0,
                    5.0,
                    "reconciliation_rate% of 10; nothing to reconcile -> 5",
                ),
            ],
        );

        let debt = sub_score(
            "debt_capacity",
            self.config.debt_capacity_weight,
            vec![
                scaled(
                    keys::CREDIT_UTILIZATION,
                    v(keys::CREDIT_UTILIZATION),
                    90.0,
                    30.0,
                    6.0,
                    4.0,
                    "6 at utilisation <= 30%, 0 at >= 90%; undefined -> 4",
                ),
                scaled(
                    keys::DEBT_TO_INCOME,
                    v(keys::DEBT_TO_INCOME),
                    60.0,
                    20.0,
                    6.0,
                    0.0,
                    "6 at DTI <= 20%, 0 at >= 60%; undefined (no income) -> 0",
                ),
                share(
                    keys::PAYMENT_REGULARITY,
                    v(keys::PAYMENT_REGULARITY),
                    5.0,
                    2.5,
                    "payment_regularity% of 5; undefined -> 2.5",
                ),
                share(
                    keys::APPROVAL_RATE,
                    v(keys::APPROVAL_RATE),
                    3.0,
                    1.5,
                    "approval_rate% of 3; undefined -> 1.5",
                ),
            ],
        );

        vec![cashflow, business, debt]
    }

    pub fn assess(&self, inputs: &ScoringInputs<'_>, model: Option<&RiskModel>) -> RiskAssessment {
        let recon_rate = inputs.reconciliation.reconciliation_rate();
        let sub_scores = self.composite(inputs.metrics, recon_rate);
        let composite_score = sub_scores.iter().map(|s| s.points).sum::<f64>().clamp(0.0, 100.0);
        let composite_probability = 1.0 - composite_score / 100.0;
        let category = RiskCategory::from_score(composite_score, &self.config);
        let features = FeatureVector::assemble(inputs);

        let explained = match model {
            Some(m) => m.explain(&features.values).map(|a| (m, a)),
            None => Err(DecisioningError::ModelUnavailable(
                "no risk model artifact loaded".to_string(),
            )),
        };

        let (probability, baseline, drivers, method, model_id, agreement, fallback_reason) =
            match explained {
                Ok((m, attribution)) => {
                    let mut drivers: Vec<FeatureDriver> = attribution
                        .contributions
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.abs() > 1e-12)
                        .map(|(i, c)| FeatureDriver {
                            feature: FEATURE_NAMES[i].to_string(),
                            value: features.values.get(i).copied(),
                            contribution: *c,
                            direction: direction(*c),
                        })
                        .collect();
                    rank(&mut drivers, self.config.top_drivers);

                    let divergence = (attribution.probability - composite_probability).abs();
                    let agreement = ModelAgreement {
                        model_probability: attribution.probability,
                        composite_probability,
                        divergence,
                        divergent: divergence > self.config.divergence_tolerance,
                    };
                    if agreement.divergent {
                        warn!(
                            "Entity '{}': model probability {:.3} diverges from composite {:.3}",
                            inputs.view.entity_id, attribution.probability, composite_probability
                        );
                    }
                    (
                        attribution.probability,
                        attribution.baseline,
                        drivers,
                        "Weighted composite + random forest attribution".to_string(),
                        Some(m.model_id.clone()),
                        Some(agreement),
                        None,
                    )
                }
                Err(e) => {
                    warn!(
                        "Entity '{}': {}; drivers from composite points",
                        inputs.view.entity_id, e
                    );
                    let drivers = self.composite_drivers(&sub_scores);
                    (
                        composite_probability,
                        0.5,
                        drivers,
                        "Weighted composite (points-based drivers)".to_string(),
                        None,
                        None,
                        Some(e.to_string()),
                    )
                }
            };

        debug!(
            "Risk for '{}': composite {:.2} ({:?}), probability {:.3}",
            inputs.view.entity_id, composite_score, category, probability
        );

        let explanation = format!(
            "Composite {:.1}/100 ({:?}): cashflow {:.1}/{:.0}, business health {:.1}/{:.0}, debt capacity {:.1}/{:.0}",
            composite_score,
            category,
            sub_scores[0].points,
            sub_scores[0].max_points,
            sub_scores[1].points,
            sub_scores[1].max_points,
            sub_scores[2].points,
            sub_scores[2].max_points,
        );

        RiskAssessment {
            entity_id: inputs.view.entity_id.clone(),
            composite_score,
            probability,
            category,
            sub_scores,
            top_feature_drivers: drivers,
            method,
            model_id,
            baseline,
            model_agreement: agreement,
            fallback_reason,
            features,
            explanation,
        }
    }

    /// Each component contributes `(max/2 - points) / 100` in probability units
    /// (after sub-score scaling), so contributions sum to implied probability
    /// minus 0.5.
    pub fn composite_drivers(&self, sub_scores: &[SubScore]) -> Vec<FeatureDriver> {
        let mut drivers: Vec<FeatureDriver> = sub_scores
            .iter()
            .flat_map(|s| {
                let nominal: f64 = s.components.iter().map(|c| c.max_points).sum();
                let factor = if nominal > 0.0 { s.max_points / nominal } else { 0.0 };
                s.components.iter().map(move |c| {
                    let contribution = (c.max_points / 2.0 - c.points) * factor / 100.0;
                    FeatureDriver {
                        feature: c.name.clone(),
                        value: c.input,
                        contribution,
                        direction: direction(contribution),
                    }
                })
            })
            .filter(|d| d.contribution.abs() > 1e-12)
            .collect();
        rank(&mut drivers, self.config.top_drivers);
        drivers
    }
}

fn direction(contribution: f64) -> DriverDirection {
    if contribution > 0.0 {
        DriverDirection::IncreasesRisk
    } else {
        DriverDirection::DecreasesRisk
    }
}

fn rank(drivers: &mut Vec<FeatureDriver>, top: usize) {
    drivers.sort_by(|a, b| {
        b.contribution
            .abs()
            .total_cmp(&a.contribution.abs())
            .then_with(|| a.feature.cmp(&b.feature))
    });
    drivers.truncate(top);
}
