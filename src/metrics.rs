//! Derived financial indicators for one entity.
//!
//! Every indicator is a [`MetricResult`]: the value (or an explicit
//! `Undefined` sentinel), the method that produced it, the formula, and the
//! literal numbers that went into it. Degenerate inputs never surface as 0,
//! -100% or infinity.

use crate::config::MetricsConfig;
use crate::error::{DecisioningError, Result};
use crate::ingestion::ProfileView;
use crate::seasonality::seasonality_index;
use crate::stats::{linear_fit, mean, safe_ratio, std_dev};
use crate::timeseries::MonthlySeries;
use crate::utils::PeriodKey;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod keys {
    pub const AVG_INFLOW: &str = "average_monthly_inflow";
    pub const AVG_OUTFLOW: &str = "average_monthly_outflow";
    pub const AVG_SURPLUS: &str = "average_monthly_surplus";
    pub const INCOME_CV: &str = "income_stability_cv";
    pub const INCOME_CONFIDENCE: &str = "income_confidence";
    pub const GROWTH_RATE: &str = "revenue_growth_rate";
    pub const QUARTERLY_GROWTH: &str = "quarterly_growth";
    pub const TRAILING_12M_GROWTH: &str = "trailing_12m_growth";
    pub const INFLOW_TREND: &str = "inflow_trend";
    pub const SEASONALITY_INDEX: &str = "seasonality_index";
    pub const WORKING_CAPITAL_GAP: &str = "working_capital_gap_days";
    pub const PROFIT_MARGIN: &str = "profit_margin";
    pub const SURPLUS_RATIO: &str = "surplus_ratio";
    pub const DEBT_TO_INCOME: &str = "debt_to_income";
    pub const DSCR: &str = "debt_service_coverage";
    pub const CREDIT_UTILIZATION: &str = "credit_utilization";
    pub const DEBT_TO_ANNUAL_INFLOW: &str = "outstanding_debt_to_annual_inflow";
    pub const DEFAULT_PROBABILITY: &str = "default_probability_proxy";
    pub const PAYMENT_REGULARITY: &str = "payment_regularity";
    pub const FILING_REGULARITY: &str = "filing_regularity";
    pub const APPROVAL_RATE: &str = "approval_rate";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricValue {
    Defined { value: f64 },
    Undefined { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Percent,
    Ratio,
    Days,
    Currency,
    Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub name: String,
    pub value: MetricValue,
    pub unit: MetricUnit,
    pub method_used: String,
    pub formula_text: String,
    pub breakdown: BTreeMap<String, f64>,
    pub explanation: String,
}

impl MetricResult {
    fn defined(name: &str, value: f64, unit: MetricUnit, method: &str, formula: &str) -> Self {
        Self {
            name: name.to_string(),
            value: MetricValue::Defined { value },
            unit,
            method_used: method.to_string(),
            formula_text: formula.to_string(),
            breakdown: BTreeMap::new(),
            explanation: String::new(),
        }
    }

    /// Sentinel for a metric that cannot be computed. The cause is logged and
    /// kept as the explanation.
    fn undefined(
        name: &str,
        unit: MetricUnit,
        method: &str,
        formula: &str,
        cause: &DecisioningError,
    ) -> Self {
        warn!("Metric '{}' undefined: {}", name, cause);
        Self {
            name: name.to_string(),
            value: MetricValue::Undefined {
                reason: cause.to_string(),
            },
            unit,
            method_used: method.to_string(),
            formula_text: formula.to_string(),
            breakdown: BTreeMap::new(),
            explanation: format!("Undefined: {}", cause),
        }
    }

    fn with(mut self, key: &str, value: f64) -> Self {
        self.breakdown.insert(key.to_string(), value);
        self
    }

    fn explain(mut self, text: impl Into<String>) -> Self {
        self.explanation = text.into();
        self
    }

    pub fn value(&self) -> Option<f64> {
        match self.value {
            MetricValue::Defined { value } => Some(value),
            MetricValue::Undefined { .. } => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.value, MetricValue::Undefined { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceBand {
    Excellent,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

/// Maps a coefficient of variation (percent) to a confidence score.
///
/// Bands: CV<20 -> 90..100, 20..40 -> 70..90, 40..60 -> 50..70,
/// 60..100 -> 30..50, CV>100 -> 10..30 (approached asymptotically).
/// Linear inside each band, continuous at the boundaries and monotonically
/// non-increasing; never reaches 0.
pub fn confidence_from_cv(cv: f64) -> (f64, ConfidenceBand) {
    let cv = cv.max(0.0);
    if cv < 20.0 {
        (100.0 - cv / 20.0 * 10.0, ConfidenceBand::Excellent)
    } else if cv < 40.0 {
        (90.0 - (cv - 20.0) / 20.0 * 20.0, ConfidenceBand::Good)
    } else if cv < 60.0 {
        (70.0 - (cv - 40.0) / 20.0 * 20.0, ConfidenceBand::Fair)
    } else if cv <= 100.0 {
        (50.0 - (cv - 60.0) / 40.0 * 20.0, ConfidenceBand::Poor)
    } else {
        let decay = 1.0 - (-(cv - 100.0) / 100.0).exp();
        (30.0 - 20.0 * decay, ConfidenceBand::VeryPoor)
    }
}

/// Compound annual growth rate in percent over `years` complete years.
pub fn cagr(start_value: f64, end_value: f64, years: u32) -> Result<f64> {
    if years == 0 {
        return Err(DecisioningError::InsufficientHistory {
            metric: keys::GROWTH_RATE.to_string(),
            required: 24,
            available: 0,
        });
    }
    if start_value <= 0.0 {
        return Err(DecisioningError::degenerate(
            keys::GROWTH_RATE,
            format!("starting value {:.2} is not positive", start_value),
        ));
    }
    if end_value <= 0.0 {
        return Err(DecisioningError::degenerate(
            keys::GROWTH_RATE,
            format!(
                "ending value {:.2} is not positive; a zero month is treated as missing data, not a -100% decline",
                end_value
            ),
        ));
    }
    let rate = ((end_value / start_value).powf(1.0 / years as f64) - 1.0) * 100.0;
    if !rate.is_finite() {
        return Err(DecisioningError::degenerate(keys::GROWTH_RATE, "non-finite CAGR"));
    }
    Ok(rate)
}

/// Percentage change between the averages of two adjacent windows.
fn window_growth(metric: &str, recent: &[f64], prior: &[f64]) -> Result<(f64, f64, f64)> {
    let recent_avg = mean(recent).unwrap_or(0.0);
    let prior_avg = mean(prior).unwrap_or(0.0);
    if prior_avg.abs() < f64::EPSILON {
        return Err(DecisioningError::degenerate(
            metric,
            "prior window average is zero; growth from zero is undefined",
        ));
    }
    if recent_avg.abs() < f64::EPSILON {
        return Err(DecisioningError::degenerate(
            metric,
            "recent window has no inflow; treated as missing data rather than a -100% decline",
        ));
    }
    Ok(((recent_avg - prior_avg) / prior_avg * 100.0, recent_avg, prior_avg))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub entity_id: String,
    pub first_period: PeriodKey,
    pub last_period: PeriodKey,
    pub months_observed: usize,
    pub months_interpolated: usize,
    pub metrics: BTreeMap<String, MetricResult>,
}

impl MetricsReport {
    pub fn get(&self, name: &str) -> Option<&MetricResult> {
        self.metrics.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|m| m.value())
    }

    pub fn undefined_metrics(&self) -> Vec<&str> {
        self.metrics
            .values()
            .filter(|m| m.is_undefined())
            .map(|m| m.name.as_str())
            .collect()
    }
}

pub struct MetricsCalculator {
    config: MetricsConfig,
}

impl Default for MetricsCalculator {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCalculator {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn calculate(&self, view: &ProfileView) -> MetricsReport {
        let inflows = view.inflows();
        let outflows = view.outflows();
        let inflow_series = MonthlySeries::densify(&view.bank_credits());
        let dense_inflows = inflow_series.values();

        let mut metrics = BTreeMap::new();
        let mut put = |m: MetricResult| {
            metrics.insert(m.name.clone(), m);
        };

        let averages = self.averages(&inflows, &outflows);
        let avg_inflow = averages[0].value().unwrap_or(0.0);
        let avg_outflow = averages[1].value().unwrap_or(0.0);
        let avg_surplus = averages[2].value().unwrap_or(0.0);
        for m in averages {
            put(m);
        }

        let cv = self.income_stability(&inflows);
        put(self.income_confidence(&cv));
        put(cv);
        put(self.growth_rate(&dense_inflows));
        put(self.quarterly_growth(&dense_inflows));
        put(self.trailing_12m_growth(&dense_inflows));
        put(self.inflow_trend(&dense_inflows));
        put(self.seasonality(&dense_inflows));
        put(self.working_capital_gap(avg_surplus, avg_outflow));
        put(self.profit_margin(&inflows, &outflows));
        put(self.surplus_ratio(view));

        let debt_service = view.monthly_debt_service();
        put(self.debt_to_income(debt_service, avg_inflow));
        put(self.dscr(avg_surplus, debt_service));
        put(self.credit_utilization(view));
        put(self.debt_to_annual_inflow(view, avg_inflow));
        put(self.default_probability(view));
        put(self.payment_regularity(view));
        put(self.filing_regularity(view));
        put(self.approval_rate(view));

        let report = MetricsReport {
            entity_id: view.entity_id.clone(),
            first_period: view.first_period(),
            last_period: view.last_period(),
            months_observed: view.months.len(),
            months_interpolated: inflow_series.interpolated_count(),
            metrics,
        };

        debug!(
            "Metrics for '{}': {} computed, {} undefined",
            report.entity_id,
            report.metrics.len(),
            report.undefined_metrics().len()
        );

        report
    }

    fn averages(&self, inflows: &[f64], outflows: &[f64]) -> [MetricResult; 3] {
        let n = inflows.len() as f64;
        let avg_in = mean(inflows).unwrap_or(0.0);
        let avg_out = mean(outflows).unwrap_or(0.0);
        [
            MetricResult::defined(
                keys::AVG_INFLOW,
                avg_in,
                MetricUnit::Currency,
                "Arithmetic mean",
                "sum(inflow) / months",
            )
            .with("total_inflow", inflows.iter().sum())
            .with("months", n),
            MetricResult::defined(
                keys::AVG_OUTFLOW,
                avg_out,
                MetricUnit::Currency,
                "Arithmetic mean",
                "sum(outflow) / months",
            )
            .with("total_outflow", outflows.iter().sum())
            .with("months", n),
            MetricResult::defined(
                keys::AVG_SURPLUS,
                avg_in - avg_out,
                MetricUnit::Currency,
                "Arithmetic mean",
                "average_inflow - average_outflow",
            )
            .with("average_inflow", avg_in)
            .with("average_outflow", avg_out),
        ]
    }

    /// Coefficient of variation of monthly inflow, in percent.
    pub fn income_stability(&self, inflows: &[f64]) -> MetricResult {
        const METHOD: &str = "Coefficient of variation";
        const FORMULA: &str = "stddev(monthly_inflow) / mean(monthly_inflow) * 100";

        if inflows.len() < 2 {
            let cause = DecisioningError::InsufficientHistory {
                metric: keys::INCOME_CV.to_string(),
                required: 2,
                available: inflows.len(),
            };
            return MetricResult::undefined(
                keys::INCOME_CV,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
                &cause,
            )
            .with("sample_count", inflows.len() as f64);
        }

        let m = mean(inflows).unwrap_or(0.0);
        let sd = std_dev(inflows).unwrap_or(0.0);
        if m.abs() < self.config.near_zero_mean {
            let cause = DecisioningError::degenerate(
                keys::INCOME_CV,
                "mean monthly inflow is zero; volatility relative to zero is undefined",
            );
            return MetricResult::undefined(
                keys::INCOME_CV,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
                &cause,
            )
            .with("mean", m)
            .with("stddev", sd)
            .with("sample_count", inflows.len() as f64);
        }

        let cv = sd / m.abs() * 100.0;
        MetricResult::defined(keys::INCOME_CV, cv, MetricUnit::Percent, METHOD, FORMULA)
            .with("mean", m)
            .with("stddev", sd)
            .with("sample_count", inflows.len() as f64)
            .explain(format!(
                "Monthly inflow varies by {:.1}% of its mean across {} months",
                cv,
                inflows.len()
            ))
    }

    pub fn income_confidence(&self, cv: &MetricResult) -> MetricResult {
        const METHOD: &str = "Banded CV mapping";
        const FORMULA: &str =
            "CV<20: 90-100 | 20-40: 70-90 | 40-60: 50-70 | 60-100: 30-50 | >100: 10-30";

        match cv.value() {
            Some(cv_value) => {
                let (score, band) = confidence_from_cv(cv_value);
                MetricResult::defined(
                    keys::INCOME_CONFIDENCE,
                    score,
                    MetricUnit::Score,
                    METHOD,
                    FORMULA,
                )
                .with("cv", cv_value)
                .explain(format!("{:?} income stability (CV {:.1}%)", band, cv_value))
            }
            None => {
                let cause = DecisioningError::degenerate(
                    keys::INCOME_CONFIDENCE,
                    "coefficient of variation is undefined",
                );
                MetricResult::undefined(
                    keys::INCOME_CONFIDENCE,
                    MetricUnit::Score,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }

    /// CAGR when at least `cagr_min_months` months are available, otherwise a
    /// trailing-window comparison. `values` must be gap-free.
    pub fn growth_rate(&self, values: &[f64]) -> MetricResult {
        let n = values.len();

        if n >= self.config.cagr_min_months {
            let years = (n / 12) as u32;
            let method = format!("CAGR ({}y)", years);
            let formula = "((end_value / start_value)^(1 / years) - 1) * 100";
            let start = values[0];
            let end = values[n - 1];
            return match cagr(start, end, years) {
                Ok(rate) => MetricResult::defined(
                    keys::GROWTH_RATE,
                    rate,
                    MetricUnit::Percent,
                    &method,
                    formula,
                )
                .with("start_value", start)
                .with("end_value", end)
                .with("years", years as f64)
                .with("months", n as f64)
                .explain(format!(
                    "Inflow compounded at {:.2}% a year over {} complete years",
                    rate, years
                )),
                Err(e) => MetricResult::undefined(
                    keys::GROWTH_RATE,
                    MetricUnit::Percent,
                    &method,
                    formula,
                    &e,
                )
                .with("start_value", start)
                .with("end_value", end)
                .with("years", years as f64),
            };
        }

        if n < 2 {
            let cause = DecisioningError::InsufficientHistory {
                metric: keys::GROWTH_RATE.to_string(),
                required: 2,
                available: n,
            };
            return MetricResult::undefined(
                keys::GROWTH_RATE,
                MetricUnit::Percent,
                "Insufficient history",
                "n/a",
                &cause,
            );
        }

        let window = self.config.trailing_window_months.min(n / 2).max(1);
        let method = format!("{}-month comparison", window);
        let formula = "(avg(last window) - avg(prior window)) / avg(prior window) * 100";
        let recent = &values[n - window..];
        let prior = &values[n - 2 * window..n - window];
        match window_growth(keys::GROWTH_RATE, recent, prior) {
            Ok((rate, recent_avg, prior_avg)) => {
                MetricResult::defined(
                    keys::GROWTH_RATE,
                    rate,
                    MetricUnit::Percent,
                    &method,
                    formula,
                )
                .with("recent_average", recent_avg)
                .with("prior_average", prior_avg)
                .with("window_months", window as f64)
                .explain(format!(
                    "Only {} months of history; compared the last {} months with the {} before",
                    n, window, window
                ))
            }
            Err(e) => MetricResult::undefined(
                keys::GROWTH_RATE,
                MetricUnit::Percent,
                &method,
                formula,
                &e,
            )
            .with("window_months", window as f64),
        }
    }

    pub fn quarterly_growth(&self, values: &[f64]) -> MetricResult {
        self.window_metric(keys::QUARTERLY_GROWTH, values, 3, "Quarter-over-quarter")
    }

    pub fn trailing_12m_growth(&self, values: &[f64]) -> MetricResult {
        self.window_metric(keys::TRAILING_12M_GROWTH, values, 12, "Trailing 12 months vs prior 12")
    }

    fn window_metric(
        &self,
        name: &str,
        values: &[f64],
        window: usize,
        method: &str,
    ) -> MetricResult {
        let formula = "(sum(last window) - sum(prior window)) / sum(prior window) * 100";
        let n = values.len();
        if n < 2 * window {
            let cause = DecisioningError::InsufficientHistory {
                metric: name.to_string(),
                required: 2 * window,
                available: n,
            };
            return MetricResult::undefined(name, MetricUnit::Percent, method, formula, &cause);
        }
        let recent = &values[n - window..];
        let prior = &values[n - 2 * window..n - window];
        match window_growth(name, recent, prior) {
            Ok((rate, recent_avg, prior_avg)) => MetricResult::defined(
                name,
                rate,
                MetricUnit::Percent,
                method,
                formula,
            )
            .with("recent_total", recent_avg * window as f64)
            .with("prior_total", prior_avg * window as f64)
            .with("window_months", window as f64),
            Err(e) => MetricResult::undefined(name, MetricUnit::Percent, method, formula, &e),
        }
    }

    /// Least-squares monthly slope of inflow as a percentage of mean inflow.
    pub fn inflow_trend(&self, values: &[f64]) -> MetricResult {
        const METHOD: &str = "OLS slope";
        const FORMULA: &str = "slope(monthly_inflow) / mean(monthly_inflow) * 100";
        let fit = if values.len() >= 3 { linear_fit(values) } else { None };
        let m = mean(values).unwrap_or(0.0);
        match (fit, safe_ratio(fit.map(|f| f.1).unwrap_or(0.0), m)) {
            (Some((intercept, slope)), Some(ratio)) => {
                MetricResult::defined(
                    keys::INFLOW_TREND,
                    ratio * 100.0,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                )
                .with("slope_per_month", slope)
                .with("intercept", intercept)
                .with("mean", m)
            }
            (None, _) => {
                let cause = DecisioningError::InsufficientHistory {
                    metric: keys::INFLOW_TREND.to_string(),
                    required: 3,
                    available: values.len(),
                };
                MetricResult::undefined(
                    keys::INFLOW_TREND,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
            (Some(_), None) => {
                let cause = DecisioningError::degenerate(keys::INFLOW_TREND, "mean inflow is zero");
                MetricResult::undefined(
                    keys::INFLOW_TREND,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }

    pub fn seasonality(&self, values: &[f64]) -> MetricResult {
        const FORMULA: &str = "max(trailing inflow) / median(trailing inflow)";
        let method = format!(
            "Peak-to-median (trailing {}m)",
            self.config.seasonality_window_months
        );
        match seasonality_index(values, self.config.seasonality_window_months) {
            Ok(stats) => MetricResult::defined(
                keys::SEASONALITY_INDEX,
                stats.index,
                MetricUnit::Ratio,
                &method,
                FORMULA,
            )
            .with("peak", stats.peak)
            .with("median", stats.median)
            .with("variance_pct", stats.variance_pct)
            .with("months", stats.months as f64)
            .explain(format!(
                "Peak month is {:.2}x the median month ({:.1}% above)",
                stats.index, stats.variance_pct
            )),
            Err(e) => MetricResult::undefined(
                keys::SEASONALITY_INDEX,
                MetricUnit::Ratio,
                &method,
                FORMULA,
                &e,
            ),
        }
    }

    pub fn working_capital_gap(&self, avg_surplus: f64, avg_outflow: f64) -> MetricResult {
        const METHOD: &str = "Surplus over daily burn";
        const FORMULA: &str = "average_monthly_surplus / (average_monthly_outflow / 30)";
        let daily_outflow = avg_outflow / 30.0;
        match safe_ratio(avg_surplus, daily_outflow) {
            Some(days) if avg_outflow > 0.0 => {
                MetricResult::defined(
                    keys::WORKING_CAPITAL_GAP,
                    days,
                    MetricUnit::Days,
                    METHOD,
                    FORMULA,
                )
                .with("average_monthly_surplus", avg_surplus)
                .with("daily_outflow", daily_outflow)
                .explain(format!(
                    "Average monthly surplus covers {:.1} days of outflow",
                    days
                ))
            }
            _ => {
                let cause = DecisioningError::degenerate(
                    keys::WORKING_CAPITAL_GAP,
                    "average monthly outflow is zero",
                );
                MetricResult::undefined(
                    keys::WORKING_CAPITAL_GAP,
                    MetricUnit::Days,
                    METHOD,
                    FORMULA,
                    &cause,
                )
                .with("average_monthly_surplus", avg_surplus)
            }
        }
    }

    pub fn profit_margin(&self, inflows: &[f64], outflows: &[f64]) -> MetricResult {
        const METHOD: &str = "Net cash margin";
        const FORMULA: &str = "(sum(inflow) - sum(outflow)) / sum(inflow) * 100";
        let total_in: f64 = inflows.iter().sum();
        let total_out: f64 = outflows.iter().sum();
        match safe_ratio(total_in - total_out, total_in) {
            Some(r) => MetricResult::defined(
                keys::PROFIT_MARGIN,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("total_inflow", total_in)
            .with("total_outflow", total_out),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::PROFIT_MARGIN,
                    "total inflow is zero",
                );
                MetricResult::undefined(
                    keys::PROFIT_MARGIN,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
                .with("total_outflow", total_out)
            }
        }
    }

    pub fn surplus_ratio(&self, view: &ProfileView) -> MetricResult {
        let positive = view.months.iter().filter(|m| m.surplus() > 0.0).count();
        let n = view.months.len();
        MetricResult::defined(
            keys::SURPLUS_RATIO,
            positive as f64 / n as f64 * 100.0,
            MetricUnit::Percent,
            "Share of surplus months",
            "months(inflow > outflow) / months * 100",
        )
        .with("surplus_months", positive as f64)
        .with("months", n as f64)
    }

    pub fn debt_to_income(&self, debt_service: f64, avg_inflow: f64) -> MetricResult {
        const METHOD: &str = "Monthly debt service over monthly inflow";
        const FORMULA: &str = "sum(monthly_emi) / average_monthly_inflow * 100";
        match safe_ratio(debt_service, avg_inflow) {
            Some(r) => MetricResult::defined(
                keys::DEBT_TO_INCOME,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("monthly_debt_service", debt_service)
            .with("average_monthly_inflow", avg_inflow),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::DEBT_TO_INCOME,
                    "average monthly inflow is zero",
                );
                MetricResult::undefined(
                    keys::DEBT_TO_INCOME,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
                .with("monthly_debt_service", debt_service)
            }
        }
    }

    /// Outflows already include debt service, so operating income adds it back.
    pub fn dscr(&self, avg_surplus: f64, debt_service: f64) -> MetricResult {
        const METHOD: &str = "Operating cash over debt service";
        const FORMULA: &str =
            "(average_monthly_surplus + monthly_debt_service) / monthly_debt_service";
        let operating = avg_surplus + debt_service;
        match safe_ratio(operating, debt_service) {
            Some(r) if debt_service > 0.0 => MetricResult::defined(
                keys::DSCR,
                r,
                MetricUnit::Ratio,
                METHOD,
                FORMULA,
            )
            .with("operating_cash", operating)
            .with("monthly_debt_service", debt_service),
            _ => {
                let cause = DecisioningError::degenerate(
                    keys::DSCR,
                    "no existing debt service to cover",
                );
                MetricResult::undefined(keys::DSCR, MetricUnit::Ratio, METHOD, FORMULA, &cause)
                    .with("operating_cash", operating)
            }
        }
    }

    pub fn credit_utilization(&self, view: &ProfileView) -> MetricResult {
        const METHOD: &str = "Revolving utilisation";
        const FORMULA: &str = "sum(outstanding) / sum(sanctioned) * 100 over revolving lines";
        let revolving: Vec<_> = view.debt_obligations.iter().filter(|d| d.is_revolving).collect();
        let outstanding: f64 = revolving.iter().map(|d| d.outstanding).sum();
        let limit: f64 = revolving.iter().map(|d| d.sanctioned_amount).sum();
        match safe_ratio(outstanding, limit) {
            Some(r) => MetricResult::defined(
                keys::CREDIT_UTILIZATION,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("outstanding", outstanding)
            .with("sanctioned", limit)
            .with("lines", revolving.len() as f64),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::CREDIT_UTILIZATION,
                    "no revolving credit lines with a sanctioned limit",
                );
                MetricResult::undefined(
                    keys::CREDIT_UTILIZATION,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }

    pub fn debt_to_annual_inflow(&self, view: &ProfileView, avg_inflow: f64) -> MetricResult {
        const METHOD: &str = "Leverage on annualised inflow";
        const FORMULA: &str = "sum(outstanding) / (average_monthly_inflow * 12) * 100";
        let outstanding: f64 = view.debt_obligations.iter().map(|d| d.outstanding).sum();
        match safe_ratio(outstanding, avg_inflow * 12.0) {
            Some(r) => MetricResult::defined(
                keys::DEBT_TO_ANNUAL_INFLOW,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("outstanding", outstanding)
            .with("annual_inflow", avg_inflow * 12.0),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::DEBT_TO_ANNUAL_INFLOW,
                    "annualised inflow is zero",
                );
                MetricResult::undefined(
                    keys::DEBT_TO_ANNUAL_INFLOW,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }

    /// Bureau-driven default likelihood proxy, 0-100.
    pub fn default_probability(&self, view: &ProfileView) -> MetricResult {
        const METHOD: &str = "Bureau proxy";
        const FORMULA: &str =
            "100 * (0.60 * (900 - score) / 600 + 0.25 * min(dpd30, 6) / 6 + 0.15 * min(dpd90, 3) / 3)";
        let Some(bureau) = &view.bureau else {
            let cause = DecisioningError::degenerate(
                keys::DEFAULT_PROBABILITY,
                "no bureau report supplied",
            );
            return MetricResult::undefined(
                keys::DEFAULT_PROBABILITY,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
                &cause,
            );
        };

        let score_part = (900.0 - bureau.score as f64) / 600.0;
        let dpd30_part = (bureau.dpd_30_count.min(6) as f64) / 6.0;
        let dpd90_part = (bureau.dpd_90_count.min(3) as f64) / 3.0;
        let pd =
            (100.0 * (0.60 * score_part + 0.25 * dpd30_part + 0.15 * dpd90_part)).clamp(0.0, 100.0);

        MetricResult::defined(keys::DEFAULT_PROBABILITY, pd, MetricUnit::Percent, METHOD, FORMULA)
            .with("bureau_score", bureau.score as f64)
            .with("dpd_30_count", bureau.dpd_30_count as f64)
            .with("dpd_90_count", bureau.dpd_90_count as f64)
    }

    pub fn payment_regularity(&self, view: &ProfileView) -> MetricResult {
        const METHOD: &str = "On-time instalment share";
        const FORMULA: &str = "sum(payments_on_time) / sum(payments_due) * 100";
        let due: u32 = view.debt_obligations.iter().map(|d| d.payments_due).sum();
        let on_time: u32 = view.debt_obligations.iter().map(|d| d.payments_on_time).sum();
        match safe_ratio(on_time as f64, due as f64) {
            Some(r) => MetricResult::defined(
                keys::PAYMENT_REGULARITY,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("payments_due", due as f64)
            .with("payments_on_time", on_time as f64),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::PAYMENT_REGULARITY,
                    "no instalments have fallen due",
                );
                MetricResult::undefined(
                    keys::PAYMENT_REGULARITY,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }

    /// Share of months in the observed span that have at least one tax filing.
    pub fn filing_regularity(&self, view: &ProfileView) -> MetricResult {
        const METHOD: &str = "Filed-period coverage";
        const FORMULA: &str = "distinct filed periods in span / months in span * 100";
        if view.tax_filings.is_empty() {
            let cause = DecisioningError::degenerate(
                keys::FILING_REGULARITY,
                "no tax filings supplied",
            );
            return MetricResult::undefined(
                keys::FILING_REGULARITY,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
                &cause,
            );
        }
        let first = view.first_period();
        let last = view.last_period();
        let span = (first.months_until(&last) + 1) as f64;
        let filed: BTreeSet<PeriodKey> = view
            .tax_filings
            .iter()
            .map(|f| f.period)
            .filter(|p| *p >= first && *p <= last)
            .collect();
        let pct = (filed.len() as f64 / span * 100.0).clamp(0.0, 100.0);
        MetricResult::defined(keys::FILING_REGULARITY, pct, MetricUnit::Percent, METHOD, FORMULA)
            .with("filed_periods", filed.len() as f64)
            .with("span_months", span)
    }

    pub fn approval_rate(&self, view: &ProfileView) -> MetricResult {
        const METHOD: &str = "Historical approvals";
        const FORMULA: &str = "approvals / applications * 100";
        let (apps, approvals) = view
            .credit_history
            .as_ref()
            .map(|h| (h.applications, h.approvals.min(h.applications)))
            .unwrap_or((0, 0));
        match safe_ratio(approvals as f64, apps as f64) {
            Some(r) => MetricResult::defined(
                keys::APPROVAL_RATE,
                r * 100.0,
                MetricUnit::Percent,
                METHOD,
                FORMULA,
            )
            .with("applications", apps as f64)
            .with("approvals", approvals as f64),
            None => {
                let cause = DecisioningError::degenerate(
                    keys::APPROVAL_RATE,
                    "no prior credit applications",
                );
                MetricResult::undefined(
                    keys::APPROVAL_RATE,
                    MetricUnit::Percent,
                    METHOD,
                    FORMULA,
                    &cause,
                )
            }
        }
    }
}
