//! Cashflow projection.
//!
//! Inflow and outflow are projected separately, with triple exponential
//! smoothing when there are at least two full seasons of history and a linear
//! trend otherwise. The three scenarios are derived from the same projection by
//! scaling inflow and outflow, so the scenario ordering holds at every step.

use crate::config::{ForecastConfig, ScenarioMultipliers};
use crate::error::{DecisioningError, Result};
use crate::ingestion::ProfileView;
use crate::seasonality::{initial_seasonal_factors, SeasonalMode};
use crate::stats::{linear_fit, mean};
use crate::timeseries::MonthlySeries;
use crate::utils::PeriodKey;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DAYS_PER_MONTH: f64 = 30.0;

const ALPHA_GRID: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
const BETA_GRID: [f64; 5] = [0.01, 0.05, 0.1, 0.2, 0.3];
const GAMMA_GRID: [f64; 5] = [0.05, 0.1, 0.2, 0.3, 0.5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Base,
    Optimistic,
    Pessimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunwayRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPeriod {
    pub period: PeriodKey,
    pub inflow: f64,
    pub outflow: f64,
    pub surplus: f64,
    /// Cash position at the end of the period.
    pub closing_cash: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub scenario: Scenario,
    pub horizon_days: u32,
    pub inflow_multiplier: f64,
    pub outflow_multiplier: f64,
    pub periods: Vec<ProjectedPeriod>,
    /// Days until projected cash reaches zero; `None` when the entity is
    /// cash-generative and never crosses.
    pub runway_days: Option<f64>,
    pub risk_level: RunwayRisk,
    pub explanation: String,
}

/// Parameters and fit quality of one projected series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub method: String,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    pub seasonal_mode: Option<SeasonalMode>,
    /// Sum of squared one-step-ahead errors (smoothing) or residuals (linear).
    pub sse: f64,
    pub history_months: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastBundle {
    pub entity_id: String,
    pub horizon_days: u32,
    pub method: String,
    pub fallback_reason: Option<String>,
    pub starting_cash: f64,
    pub inflow_model: FitSummary,
    pub outflow_model: FitSummary,
    pub scenarios: BTreeMap<Scenario, ForecastResult>,
}

impl ForecastBundle {
    pub fn scenario(&self, scenario: Scenario) -> Option<&ForecastResult> {
        self.scenarios.get(&scenario)
    }
}

/// Holt-Winters state after fitting.
#[derive(Debug, Clone)]
struct HoltWintersFit {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
    mode: SeasonalMode,
    sse: f64,
    /// Number of observations consumed; positions the seasonal ring.
    n: usize,
}

impl HoltWintersFit {
    fn forecast(&self, steps: usize) -> Vec<f64> {
        let m = self.seasonals.len();
        (1..=steps)
            .map(|h| {
                let base = self.level + h as f64 * self.trend;
                let s = self.seasonals[(self.n + h - 1) % m];
                let value = match self.mode {
                    SeasonalMode::Additive => base + s,
                    SeasonalMode::Multiplicative => base * s,
                };
                value.max(0.0)
            })
            .collect()
    }
}

/// Triple exponential smoothing with additive trend.
fn holt_winters(
    values: &[f64],
    m: usize,
    mode: SeasonalMode,
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> HoltWintersFit {
    let first = mean(&values[..m]).unwrap_or(0.0);
    let second = mean(&values[m..2 * m]).unwrap_or(first);
    let mut level = first;
    let mut trend = (second - first) / m as f64;
    let mut seasonals = initial_seasonal_factors(values, m, mode);
    let mut sse = 0.0;

    for (t, &y) in values.iter().enumerate() {
        let idx = t % m;
        let s = seasonals[idx];
        let predicted = match mode {
            SeasonalMode::Additive => level + trend + s,
            SeasonalMode::Multiplicative => (level + trend) * s,
        };
        sse += (y - predicted).powi(2);

        let prev_level = level;
        level = match mode {
            SeasonalMode::Additive => alpha * (y - s) + (1.0 - alpha) * (level + trend),
            SeasonalMode::Multiplicative if s.abs() > f64::EPSILON => {
                alpha * (y / s) + (1.0 - alpha) * (level + trend)
            }
            SeasonalMode::Multiplicative => level + trend,
        };
        trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        seasonals[idx] = match mode {
            SeasonalMode::Additive => gamma * (y - level) + (1.0 - gamma) * s,
            SeasonalMode::Multiplicative if level.abs() > f64::EPSILON => {
                gamma * (y / level) + (1.0 - gamma) * s
            }
            SeasonalMode::Multiplicative => s,
        };
    }

    HoltWintersFit {
        level,
        trend,
        seasonals,
        mode,
        sse,
        n: values.len(),
    }
}

fn runway_risk(runway_days: Option<f64>, config: &ForecastConfig) -> RunwayRisk {
    match runway_days {
        None => RunwayRisk::Low,
        Some(d) if d < config.high_risk_runway_days => RunwayRisk::High,
        Some(d) if d <= config.medium_risk_runway_days => RunwayRisk::Medium,
        Some(_) => RunwayRisk::Low,
    }
}

/// Days until cumulative cash first reaches zero, interpolating linearly inside
/// the crossing month. Past the horizon the average projected burn is
/// extrapolated. Cash that starts at or below zero has already crossed, unless
/// it recovers above zero within the horizon.
fn runway(starting_cash: f64, periods: &[ProjectedPeriod]) -> Option<f64> {
    if starting_cash <= 0.0 {
        let burning_first = periods.first().map(|p| p.surplus < 0.0).unwrap_or(true);
        let recovers = periods.iter().any(|p| p.closing_cash > 0.0);
        if burning_first || !recovers {
            return Some(0.0);
        }
    }

    let mut opening = starting_cash;
    for (i, p) in periods.iter().enumerate() {
        if opening > 0.0 && p.closing_cash <= 0.0 {
            let fraction = opening / (opening - p.closing_cash);
            return Some(i as f64 * DAYS_PER_MONTH + fraction * DAYS_PER_MONTH);
        }
        opening = p.closing_cash;
    }

    let surpluses: Vec<f64> = periods.iter().map(|p| p.surplus).collect();
    let avg = mean(&surpluses).unwrap_or(0.0);
    if avg >= 0.0 {
        return None;
    }
    let closing = periods.last().map(|p| p.closing_cash).unwrap_or(starting_cash);
    if closing <= 0.0 {
        return Some(0.0);
    }
    let daily_burn = -avg / DAYS_PER_MONTH;
    Some(periods.len() as f64 * DAYS_PER_MONTH + closing / daily_burn)
}

pub struct ForecastEngine {
    config: ForecastConfig,
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new(ForecastConfig::default())
    }
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    pub fn steps(&self) -> usize {
        (self.config.horizon_days as f64 / DAYS_PER_MONTH).ceil() as usize
    }

    pub fn forecast(&self, view: &ProfileView) -> Result<ForecastBundle> {
        let inflow = MonthlySeries::densify(&view.bank_credits());
        let outflow_map: BTreeMap<PeriodKey, f64> =
            view.months.iter().map(|m| (m.period, m.outflow)).collect();
        let outflow = MonthlySeries::densify(&outflow_map);
        let last = inflow.last_period().ok_or_else(|| {
            DecisioningError::validation(&view.entity_id, "no monthly history to project")
        })?;

        let steps = self.steps();
        let inflow_values = inflow.values();
        let outflow_values = outflow.values();

        let ((inflow_proj, inflow_fit), (outflow_proj, outflow_fit)) = rayon::join(
            || self.project(&inflow_values, steps),
            || self.project(&outflow_values, steps),
        );

        let fallback_reason = if inflow_values.len() < self.config.min_history_months {
            let cause = DecisioningError::InsufficientHistory {
                metric: "seasonal forecast".to_string(),
                required: self.config.min_history_months,
                available: inflow_values.len(),
            };
            warn!("Entity '{}': {}; using linear trend", view.entity_id, cause);
            Some(cause.to_string())
        } else {
            None
        };

        let starting_cash = view.cash_balance.unwrap_or(0.0);
        let mut scenarios = BTreeMap::new();
        for (scenario, multipliers) in [
            (Scenario::Base, ScenarioMultipliers::default()),
            (Scenario::Optimistic, self.config.optimistic.clone()),
            (Scenario::Pessimistic, self.config.pessimistic.clone()),
        ] {
            let result = self.scenario(
                scenario,
                &multipliers,
                last,
                starting_cash,
                &inflow_proj,
                &outflow_proj,
            );
            scenarios.insert(scenario, result);
        }

        debug!(
            "Forecast for '{}' via {}: base runway {:?}",
            view.entity_id,
            inflow_fit.method,
            scenarios.get(&Scenario::Base).and_then(|r| r.runway_days)
        );

        Ok(ForecastBundle {
            entity_id: view.entity_id.clone(),
            horizon_days: self.config.horizon_days,
            method: inflow_fit.method.clone(),
            fallback_reason,
            starting_cash,
            inflow_model: inflow_fit,
            outflow_model: outflow_fit,
            scenarios,
        })
    }

    fn scenario(
        &self,
        scenario: Scenario,
        multipliers: &ScenarioMultipliers,
        last: PeriodKey,
        starting_cash: f64,
        inflow: &[f64],
        outflow: &[f64],
    ) -> ForecastResult {
        let mut cash = starting_cash;
        let periods: Vec<ProjectedPeriod> = inflow
            .iter()
            .zip(outflow)
            .enumerate()
            .map(|(i, (inf, out))| {
                let inflow = inf * multipliers.inflow;
                let outflow = out * multipliers.outflow;
                let surplus = inflow - outflow;
                cash += surplus;
                ProjectedPeriod {
                    period: last.add_months(i as i32 + 1),
                    inflow,
                    outflow,
                    surplus,
                    closing_cash: cash,
                }
            })
            .collect();

        let runway_days = runway(starting_cash, &periods);
        let risk_level = runway_risk(runway_days, &self.config);
        let explanation = match runway_days {
            Some(days) if starting_cash <= 0.0 && days == 0.0 => format!(
                "Cash starts at {:.0} and does not recover above zero within {} days (inflow x{:.2}, outflow x{:.2})",
                starting_cash, self.config.horizon_days, multipliers.inflow, multipliers.outflow
            ),
            Some(days) => format!(
                "Cash from {:.0} is exhausted after about {:.0} days (inflow x{:.2}, outflow x{:.2})",
                starting_cash, days, multipliers.inflow, multipliers.outflow
            ),
            None => format!(
                "Projected surplus keeps cash above zero over {} days (inflow x{:.2}, outflow x{:.2})",
                self.config.horizon_days, multipliers.inflow, multipliers.outflow
            ),
        };

        ForecastResult {
            scenario,
            horizon_days: self.config.horizon_days,
            inflow_multiplier: multipliers.inflow,
            outflow_multiplier: multipliers.outflow,
            periods,
            runway_days,
            risk_level,
            explanation,
        }
    }

    /// Projects one non-negative series `steps` months ahead.
    pub fn project(&self, values: &[f64], steps: usize) -> (Vec<f64>, FitSummary) {
        let m = self.config.season_length;
        if values.len() >= self.config.min_history_months && values.len() >= 2 * m {
            self.smoothing(values, steps)
        } else {
            self.linear(values, steps)
        }
    }

    fn smoothing(&self, values: &[f64], steps: usize) -> (Vec<f64>, FitSummary) {
        let m = self.config.season_length;
        let mode = SeasonalMode::for_series(values);

        let mut best: Option<(HoltWintersFit, f64, f64, f64)> = None;
        for &alpha in &ALPHA_GRID {
            for &beta in &BETA_GRID {
                for &gamma in &GAMMA_GRID {
                    let fit = holt_winters(values, m, mode, alpha, beta, gamma);
                    if !fit.sse.is_finite() {
                        continue;
                    }
                    let better = best.as_ref().map(|(b, ..)| fit.sse < b.sse).unwrap_or(true);
                    if better {
                        best = Some((fit, alpha, beta, gamma));
                    }
                }
            }
        }

        let Some((fit, alpha, beta, gamma)) = best else {
            warn!("Smoothing fit diverged for every parameter set; using linear trend");
            return self.linear(values, steps);
        };

        let method = match mode {
            SeasonalMode::Multiplicative => {
                "Holt-Winters (additive trend, multiplicative seasonality)"
            }
            SeasonalMode::Additive => "Holt-Winters (additive trend, additive seasonality)",
        };
        let summary = FitSummary {
            method: method.to_string(),
            alpha: Some(alpha),
            beta: Some(beta),
            gamma: Some(gamma),
            seasonal_mode: Some(mode),
            sse: fit.sse,
            history_months: values.len(),
        };
        (fit.forecast(steps), summary)
    }

    fn linear(&self, values: &[f64], steps: usize) -> (Vec<f64>, FitSummary) {
        let (intercept, slope) = linear_fit(values).unwrap_or((0.0, 0.0));
        let n = values.len();
        let sse = values
            .iter()
            .enumerate()
            .map(|(i, y)| (y - (intercept + slope * i as f64)).powi(2))
            .sum();
        let projection = (1..=steps)
            .map(|h| (intercept + slope * (n + h - 1) as f64).max(0.0))
            .collect();
        let summary = FitSummary {
            method: "Linear trend (insufficient history)".to_string(),
            alpha: None,
            beta: None,
            gamma: None,
            seasonal_mode: None,
            sse,
            history_months: n,
        };
        (projection, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FinancialProfile, MonthlyAggregate};

    fn view(inflows: &[f64], outflows: &[f64], cash: Option<f64>) -> ProfileView {
        let start = PeriodKey::new(2021, 1).unwrap();
        let profile = FinancialProfile {
            entity_id: "fc".to_string(),
            business_name: None,
            monthly: inflows
                .iter()
                .zip(outflows)
                .enumerate()
                .map(|(i, (a, b))| MonthlyAggregate {
                    period: start.add_months(i as i32).to_string(),
                    total_inflow: *a,
                    total_outflow: *b,
                    category_breakdown: BTreeMap::new(),
                })
                .collect(),
            bureau: None,
            tax_filings: vec![],
            marketplace_orders: vec![],
            debt_obligations: vec![],
            transactions: vec![],
            credit_history: None,
            cash_balance: cash,
        };
        ProfileView::from_profile(&profile).unwrap()
    }

    fn seasonal(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 1000.0 + 10.0 * i as f64 + if i % 12 == 10 { 400.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn test_short_history_uses_linear_trend() {
        let v = view(&[100.0, 110.0, 120.0, 130.0], &[50.0; 4], None);
        let bundle = ForecastEngine::default().forecast(&v).unwrap();
        assert_eq!(bundle.method, "Linear trend (insufficient history)");
        assert!(bundle.fallback_reason.is_some());

        let base = bundle.scenario(Scenario::Base).unwrap();
        assert_eq!(base.periods.len(), 6);
        assert!((base.periods[0].inflow - 140.0).abs() < 1e-9);
        assert_eq!(base.periods[0].period.to_string(), "2021-05");
        assert_eq!(base.runway_days, None);
        assert_eq!(base.risk_level, RunwayRisk::Low);
    }

    #[test]
    fn test_long_history_uses_smoothing() {
        let inflow = seasonal(36);
        let outflow = vec![800.0; 36];
        let bundle = ForecastEngine::default().forecast(&view(&inflow, &outflow, None)).unwrap();
        assert!(bundle.method.starts_with("Holt-Winters"));
        assert_eq!(bundle.inflow_model.seasonal_mode, Some(SeasonalMode::Multiplicative));
        assert!(bundle.inflow_model.alpha.is_some());
        assert!(bundle.fallback_reason.is_none());

        let base = bundle.scenario(Scenario::Base).unwrap();
        assert_eq!(base.periods.len(), 6);
        assert!(base.periods.iter().all(|p| p.inflow >= 0.0 && p.outflow >= 0.0));
    }

    #[test]
    fn test_scenario_ordering() {
        let inflow = seasonal(30);
        let outflow: Vec<f64> = (0..30).map(|i| 900.0 + 5.0 * i as f64).collect();
        let bundle = ForecastEngine::default()
            .forecast(&view(&inflow, &outflow, Some(1000.0)))
            .unwrap();
        let base = bundle.scenario(Scenario::Base).unwrap();
        let opt = bundle.scenario(Scenario::Optimistic).unwrap();
        let pess = bundle.scenario(Scenario::Pessimistic).unwrap();
        for i in 0..base.periods.len() {
            assert!(opt.periods[i].surplus >= base.periods[i].surplus);
            assert!(base.periods[i].surplus >= pess.periods[i].surplus);
        }
    }

    #[test]
    fn test_runway_interpolates_inside_month() {
        let periods: Vec<ProjectedPeriod> = (1..=6)
            .map(|i| ProjectedPeriod {
                period: PeriodKey::new(2024, i).unwrap(),
                inflow: 0.0,
                outflow: 100.0,
                surplus: -100.0,
                closing_cash: 250.0 - 100.0 * i as f64,
            })
            .collect();
        let days = runway(250.0, &periods).unwrap();
        assert!((days - 75.0).abs() < 1e-9);
        assert_eq!(runway_risk(Some(days), &ForecastConfig::default()), RunwayRisk::High);
    }

    #[test]
    fn test_runway_extrapolates_beyond_horizon() {
        let periods: Vec<ProjectedPeriod> = (1..=6)
            .map(|i| ProjectedPeriod {
                period: PeriodKey::new(2024, i).unwrap(),
                inflow: 0.0,
                outflow: 100.0,
                surplus: -100.0,
                closing_cash: 1000.0 - 100.0 * i as f64,
            })
            .collect();
        // 400 left at 100 per 30 days
        let days = runway(1000.0, &periods).unwrap();
        assert!((days - 300.0).abs() < 1e-9);
        assert_eq!(runway_risk(Some(days), &ForecastConfig::default()), RunwayRisk::Low);
        assert_eq!(runway_risk(Some(120.0), &ForecastConfig::default()), RunwayRisk::Medium);
    }

    #[test]
    fn test_burning_entity_without_cash_has_no_runway() {
        let v = view(&[100.0; 6], &[150.0; 6], None);
        let bundle = ForecastEngine::default().forecast(&v).unwrap();
        let base = bundle.scenario(Scenario::Base).unwrap();
        assert_eq!(base.runway_days, Some(0.0));
        assert_eq!(base.risk_level, RunwayRisk::High);
    }

    #[test]
    fn test_negative_cash_without_recovery_is_high_risk() {
        let v = view(&[110.0; 6], &[100.0; 6], Some(-1_000_000.0));
        let bundle = ForecastEngine::default().forecast(&v).unwrap();
        for scenario in [Scenario::Base, Scenario::Optimistic, Scenario::Pessimistic] {
            let result = bundle.scenario(scenario).unwrap();
            assert_eq!(result.runway_days, Some(0.0));
            assert_eq!(result.risk_level, RunwayRisk::High);
            assert!(result.periods.iter().all(|p| p.closing_cash < 0.0));
        }
    }

    #[test]
    fn test_negative_cash_that_recovers_is_measured_from_recovery() {
        let periods: Vec<ProjectedPeriod> = (1..=6)
            .map(|i| ProjectedPeriod {
                period: PeriodKey::new(2024, i).unwrap(),
                inflow: 200.0,
                outflow: 100.0,
                surplus: 100.0,
                closing_cash: -50.0 + 100.0 * i as f64,
            })
            .collect();
        assert_eq!(runway(-50.0, &periods), None);
        assert_eq!(runway(0.0, &periods[..0]), Some(0.0));
    }

    #[test]
    fn test_horizon_steps_round_up() {
        let mut config = ForecastConfig::default();
        config.horizon_days = 45;
        assert_eq!(ForecastEngine::new(config).steps(), 2);
        assert_eq!(ForecastEngine::default().steps(), 6);
    }

    #[test]
    fn test_holt_winters_tracks_flat_series() {
        let values = vec![500.0; 36];
        let fit = holt_winters(&values, 12, SeasonalMode::Multiplicative, 0.5, 0.1, 0.1);
        assert!(fit.sse < 1e-6);
        for v in fit.forecast(6) {
            assert!((v - 500.0).abs() < 1e-6);
        }
    }
}
