use crate::error::{DecisioningError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Months of history needed before growth is reported as CAGR.
    pub cagr_min_months: usize,
    /// Window used by the short-history growth comparison.
    pub trailing_window_months: usize,
    /// Months considered by the seasonality index.
    pub seasonality_window_months: usize,
    /// Means below this magnitude make CV undefined.
    pub near_zero_mean: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cagr_min_months: 24,
            trailing_window_months: 3,
            seasonality_window_months: 12,
            near_zero_mean: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioMultipliers {
    pub inflow: f64,
    pub outflow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub horizon_days: u32,
    /// History required for seasonal smoothing; shorter series use a linear trend.
    pub min_history_months: usize,
    pub season_length: usize,
    pub optimistic: ScenarioMultipliers,
    pub pessimistic: ScenarioMultipliers,
    /// Runway below this many days is High risk.
    pub high_risk_runway_days: f64,
    /// Runway at or below this many days is Medium risk.
    pub medium_risk_runway_days: f64,
}

impl Default for ScenarioMultipliers {
    fn default() -> Self {
        Self {
            inflow: 1.0,
            outflow: 1.0,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_days: 180,
            min_history_months: 24,
            season_length: 12,
            optimistic: ScenarioMultipliers {
                inflow: 1.10,
                outflow: 0.95,
            },
            pessimistic: ScenarioMultipliers {
                inflow: 0.90,
                outflow: 1.10,
            },
            high_risk_runway_days: 90.0,
            medium_risk_runway_days: 180.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// When false the learned layer is treated as unavailable.
    pub use_learned_model: bool,
    pub contamination: f64,
    pub n_trees: usize,
    pub sample_size: usize,
    /// Fewer samples than this and the learned model cannot be fitted.
    pub min_samples_for_model: usize,
    pub z_threshold: f64,
    pub transaction_z_threshold: f64,
    pub iqr_multiplier: f64,
    pub alert_percentile: f64,
    /// Deviation from the trailing median, in percent, below which a month is never flagged.
    pub min_deviation_pct: f64,
    /// Minimum normal observations before the percentile alert threshold applies.
    pub alert_min_history: usize,
    pub trailing_window_months: usize,
    pub min_trailing_months: usize,
    /// Floor on the trailing standard deviation, as a fraction of the trailing median.
    pub std_floor_fraction: f64,
    /// Consecutive same-direction flags that mark a level shift. The baseline
    /// restarts at the shift and only its first month stays flagged.
    pub shift_confirm_months: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            use_learned_model: true,
            contamination: 0.10,
            n_trees: 100,
            sample_size: 256,
            min_samples_for_model: 32,
            z_threshold: 2.0,
            transaction_z_threshold: 3.0,
            iqr_multiplier: 1.5,
            alert_percentile: 99.0,
            min_deviation_pct: 10.0,
            alert_min_history: 12,
            trailing_window_months: 12,
            min_trailing_months: 3,
            std_floor_fraction: 0.01,
            shift_confirm_months: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub month_weight: f64,
    pub amount_weight: f64,
    pub match_threshold: f64,
    /// Largest timing difference, in months, for a candidate pair.
    pub month_tolerance: u32,
    /// Reconciliation rate below this percentage raises the risk flag.
    pub risk_rate_threshold: f64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            month_weight: 0.4,
            amount_weight: 0.6,
            match_threshold: 0.5,
            month_tolerance: 1,
            risk_rate_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub cashflow_weight: f64,
    pub business_health_weight: f64,
    pub debt_capacity_weight: f64,
    pub approve_threshold: f64,
    pub review_threshold: f64,
    pub top_drivers: usize,
    /// Model and composite probabilities further apart than this are flagged.
    pub divergence_tolerance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cashflow_weight: 0.45,
            business_health_weight: 0.35,
            debt_capacity_weight: 0.20,
            approve_threshold: 75.0,
            review_threshold: 60.0,
            top_drivers: 5,
            divergence_tolerance: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub min_dscr: f64,
    /// Maximum debt-to-income after the new loan, as a percentage.
    pub max_dti_pct: f64,
    /// Risk premium scale: premium = factor * (100 - score) / score.
    pub risk_premium_factor: f64,
    pub min_ticket: f64,
    pub strongly_approve_threshold: f64,
    pub approve_threshold: f64,
    pub conditional_threshold: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            min_dscr: 1.25,
            max_dti_pct: 40.0,
            risk_premium_factor: 4.0,
            min_ticket: 50_000.0,
            strongly_approve_threshold: 75.0,
            approve_threshold: 60.0,
            conditional_threshold: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master seed; every randomised component derives its stream from it.
    pub seed: u64,
    pub metrics: MetricsConfig,
    pub forecast: ForecastConfig,
    pub anomaly: AnomalyConfig,
    pub reconciliation: ReconciliationConfig,
    pub risk: RiskConfig,
    pub recommendation: RecommendationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            metrics: MetricsConfig::default(),
            forecast: ForecastConfig::default(),
            anomaly: AnomalyConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            risk: RiskConfig::default(),
            recommendation: RecommendationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.forecast;
        if !(30..=180).contains(&f.horizon_days) {
            return invalid(format!(
                "forecast horizon {} days must be between 30 and 180",
                f.horizon_days
            ));
        }
        if f.season_length < 2 || f.min_history_months < 2 * f.season_length {
            return invalid(format!(
                "seasonal smoothing needs at least two full seasons of history (season {}, minimum history {})",
                f.season_length, f.min_history_months
            ));
        }
        if f.optimistic.inflow < 1.0
            || f.optimistic.outflow > 1.0
            || f.pessimistic.inflow > 1.0
            || f.pessimistic.outflow < 1.0
        {
            return invalid("scenario multipliers must keep optimistic >= base >= pessimistic");
        }
        if f.high_risk_runway_days > f.medium_risk_runway_days {
            return invalid("high-risk runway band must not exceed the medium-risk band");
        }

        let a = &self.anomaly;
        if !(a.contamination > 0.0 && a.contamination <= 0.5) {
            return invalid(format!(
                "contamination {} must be in (0, 0.5]",
                a.contamination
            ));
        }
        if a.n_trees == 0 || a.sample_size < 2 {
            return invalid("isolation forest needs at least one tree and a sample size of 2");
        }
        if a.z_threshold <= 0.0
            || a.transaction_z_threshold <= 0.0
            || a.iqr_multiplier < 0.0
            || a.min_deviation_pct < 0.0
        {
            return invalid("anomaly thresholds must be positive");
        }
        if !(50.0..=100.0).contains(&a.alert_percentile) {
            return invalid("alert percentile must be between 50 and 100");
        }
        if a.min_trailing_months < 2 || a.trailing_window_months < a.min_trailing_months {
            return invalid("trailing window must hold at least min_trailing_months (>= 2) months");
        }
        if a.shift_confirm_months < 2 {
            return invalid("shift_confirm_months must be at least 2");
        }

        let r = &self.reconciliation;
        if (r.month_weight + r.amount_weight - 1.0).abs() > 1e-9 {
            return invalid("reconciliation weights must sum to 1");
        }
        if !(0.0..=1.0).contains(&r.match_threshold) {
            return invalid("match threshold must be in [0, 1]");
        }

        let k = &self.risk;
        if (k.cashflow_weight + k.business_health_weight + k.debt_capacity_weight - 1.0).abs()
            > 1e-9
        {
            return invalid("risk sub-score weights must sum to 1");
        }
        if k.review_threshold > k.approve_threshold {
            return invalid("review threshold must not exceed approve threshold");
        }

        let c = &self.recommendation;
        if c.min_dscr < 1.0 || c.max_dti_pct <= 0.0 || c.max_dti_pct > 100.0 {
            return invalid("recommendation caps out of range");
        }
        if !(c.conditional_threshold <= c.approve_threshold
            && c.approve_threshold <= c.strongly_approve_threshold)
        {
            return invalid("recommendation tier thresholds must be ascending");
        }

        Ok(())
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(DecisioningError::InvalidConfig(msg.into()))
}
