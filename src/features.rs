//! The classifier's feature vector, assembled from every upstream artifact.
//!
//! Undefined inputs are imputed with a neutral value and listed in
//! [`FeatureVector::imputed`], so a missing signal never looks like a strong one.

use crate::anomaly::AnomalyReport;
use crate::forecast::{ForecastBundle, Scenario};
use crate::ingestion::ProfileView;
use crate::metrics::{keys, MetricsReport};
use crate::reconciliation::ReconciliationReport;
use serde::{Deserialize, Serialize};

pub const FEATURE_COUNT: usize = 33;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "log_avg_monthly_inflow",
    "log_avg_monthly_outflow",
    "income_stability_cv",
    "income_confidence",
    "revenue_growth_rate",
    "quarterly_growth",
    "trailing_12m_growth",
    "inflow_trend",
    "seasonality_index",
    "working_capital_gap_days",
    "profit_margin",
    "surplus_ratio",
    "debt_to_income",
    "debt_service_coverage",
    "credit_utilization",
    "outstanding_debt_to_annual_inflow",
    "default_probability_proxy",
    "payment_regularity",
    "filing_regularity",
    "approval_rate",
    "bureau_score",
    "dpd_30_count",
    "dpd_90_count",
    "enquiries_last_6m",
    "reconciliation_rate",
    "reconciliation_discrepancy_pct",
    "marketplace_bank_rate",
    "base_runway_months",
    "pessimistic_runway_months",
    "transaction_anomaly_share",
    "period_anomaly_count",
    "history_months",
    "interpolated_month_share",
];

/// Values substituted for undefined inputs. Chosen at the middle of each
/// feature's usual range.
pub const NEUTRAL_VALUES: [f64; FEATURE_COUNT] = [
    11.5, 11.2, 50.0, 60.0, 0.0, 0.0, 0.0, 0.0, 1.5, 0.0, 10.0, 50.0, 30.0, 1.5, 50.0, 50.0, 30.0,
    80.0, 50.0, 50.0, 700.0, 0.0, 0.0, 2.0, 50.0, 50.0, 50.0, 12.0, 12.0, 0.0, 0.0, 12.0, 0.0,
];

/// Runways are capped so a sustainable entity maps to a finite value.
const RUNWAY_CAP_MONTHS: f64 = 24.0;

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
    pub imputed: Vec<String>,
}

/// Everything the scorer reads, borrowed from the earlier pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInputs<'a> {
    pub view: &'a ProfileView,
    pub metrics: &'a MetricsReport,
    pub forecast: &'a ForecastBundle,
    pub anomalies: &'a AnomalyReport,
    pub reconciliation: &'a ReconciliationReport,
}

struct Builder {
    values: Vec<f64>,
    imputed: Vec<String>,
}

impl Builder {
    fn push(&mut self, value: Option<f64>) {
        let i = self.values.len();
        match value.filter(|v| v.is_finite()) {
            Some(v) => self.values.push(v),
            None => {
                self.values.push(NEUTRAL_VALUES[i]);
                self.imputed.push(FEATURE_NAMES[i].to_string());
            }
        }
    }
}

impl FeatureVector {
    pub fn assemble(inputs: &ScoringInputs<'_>) -> Self {
        let m = inputs.metrics;
        let mut b = Builder {
            values: Vec::with_capacity(FEATURE_COUNT),
            imputed: Vec::new(),
        };

        b.push(m.value(keys::AVG_INFLOW).map(|v| v.max(0.0).ln_1p()));
        b.push(m.value(keys::AVG_OUTFLOW).map(|v| v.max(0.0).ln_1p()));
        for key in [
            keys::INCOME_CV,
            keys::INCOME_CONFIDENCE,
            keys::GROWTH_RATE,
            keys::QUARTERLY_GROWTH,
            keys::TRAILING_12M_GROWTH,
            keys::INFLOW_TREND,
            keys::SEASONALITY_INDEX,
            keys::WORKING_CAPITAL_GAP,
            keys::PROFIT_MARGIN,
            keys::SURPLUS_RATIO,
            keys::DEBT_TO_INCOME,
            keys::DSCR,
            keys::CREDIT_UTILIZATION,
            keys::DEBT_TO_ANNUAL_INFLOW,
            keys::DEFAULT_PROBABILITY,
            keys::PAYMENT_REGULARITY,
            keys::FILING_REGULARITY,
            keys::APPROVAL_RATE,
        ] {
            b.push(m.value(key));
        }

        let bureau = inputs.view.bureau.as_ref();
        b.push(bureau.map(|r| r.score as f64));
        b.push(bureau.map(|r| r.dpd_30_count as f64));
        b.push(bureau.map(|r| r.dpd_90_count as f64));
        b.push(bureau.map(|r| r.enquiries_last_6m as f64));

        let recon = inputs.reconciliation;
        b.push(recon.primary.as_ref().map(|s| s.reconciliation_rate));
        b.push(recon.primary.as_ref().map(|s| s.discrepancy_pct));
        b.push(recon.marketplace_vs_bank.as_ref().map(|s| s.reconciliation_rate));

        let runway_months = |scenario: Scenario| {
            inputs.forecast.scenario(scenario).map(|r| {
                r.runway_days
                    .map(|d| (d / 30.0).min(RUNWAY_CAP_MONTHS))
                    .unwrap_or(RUNWAY_CAP_MONTHS)
            })
        };
        b.push(runway_months(Scenario::Base));
        b.push(runway_months(Scenario::Pessimistic));

        let a = inputs.anomalies;
        b.push((a.transactions_scanned > 0).then(|| {
            a.transaction_anomalies.len() as f64 / a.transactions_scanned as f64
        }));
        b.push(Some(a.period_anomalies.len() as f64));
        b.push(Some(m.months_observed as f64));
        let span = m.months_observed + m.months_interpolated;
        b.push((span > 0).then(|| m.months_interpolated as f64 / span as f64));

        Self {
            values: b.values,
            imputed: b.imputed,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|i| self.values.get(i).copied())
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_feature_names_unique_and_sized() {
        let unique: BTreeSet<&str> = FEATURE_NAMES.iter().copied().collect();
        assert_eq!(unique.len(), FEATURE_COUNT);
        assert!(FEATURE_COUNT >= 30);
        assert_eq!(NEUTRAL_VALUES.len(), FEATURE_COUNT);
        assert_eq!(feature_index("bureau_score"), Some(20));
        assert_eq!(feature_index("nope"), None);
    }

    #[test]
    fn test_builder_imputes_missing_values() {
        let mut b = Builder {
            values: Vec::new(),
            imputed: Vec::new(),
        };
        b.push(Some(12.0));
        b.push(None);
        b.push(Some(f64::NAN));
        assert_eq!(b.values, vec![12.0, NEUTRAL_VALUES[1], NEUTRAL_VALUES[2]]);
        assert_eq!(b.imputed, vec!["log_avg_monthly_outflow", "income_stability_cv"]);
    }
}
