use crate::error::{DecisioningError, Result};
use crate::stats::{mean, median};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeasonalMode {
    Additive,
    Multiplicative,
}

impl SeasonalMode {
    /// Multiplicative seasonality is only meaningful for strictly positive series.
    pub fn for_series(values: &[f64]) -> Self {
        if !values.is_empty() && values.iter().all(|v| *v > 0.0) {
            Self::Multiplicative
        } else {
            Self::Additive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalityStats {
    pub peak: f64,
    pub median: f64,
    /// peak / median
    pub index: f64,
    /// (peak - median) / median * 100
    pub variance_pct: f64,
    /// Position of the peak inside the window, 0 = oldest month.
    pub peak_offset: usize,
    pub months: usize,
}

/// Peak-to-median ratio over (at most) the trailing `window` values.
pub fn seasonality_index(values: &[f64], window: usize) -> Result<SeasonalityStats> {
    const MIN_MONTHS: usize = 4;

    let start = values.len().saturating_sub(window);
    let trailing = &values[start..];
    if trailing.len() < MIN_MONTHS {
        return Err(DecisioningError::InsufficientHistory {
            metric: "seasonality_index".to_string(),
            required: MIN_MONTHS,
            available: trailing.len(),
        });
    }

    let med = median(trailing).unwrap_or(0.0);
    if med <= 0.0 {
        return Err(DecisioningError::degenerate(
            "seasonality_index",
            format!("median monthly value is {:.2}; a peak-to-median ratio is meaningless", med),
        ));
    }

    let (peak_offset, peak) = trailing
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::MIN), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });

    Ok(SeasonalityStats {
        peak,
        median: med,
        index: peak / med,
        variance_pct: (peak - med) / med * 100.0,
        peak_offset,
        months: trailing.len(),
    })
}

/// Initial seasonal factors for triple exponential smoothing, averaged over
/// every complete season in `values`. Multiplicative factors average to 1,
/// additive factors sum to 0.
pub fn initial_seasonal_factors(
    values: &[f64],
    season_length: usize,
    mode: SeasonalMode,
) -> Vec<f64> {
    let neutral = match mode {
        SeasonalMode::Additive => 0.0,
        SeasonalMode::Multiplicative => 1.0,
    };
    let seasons = if season_length == 0 { 0 } else { values.len() / season_length };
    if seasons == 0 {
        return vec![neutral; season_length];
    }

    let mut factors = vec![0.0; season_length];
    for s in 0..seasons {
        let chunk = &values[s * season_length..(s + 1) * season_length];
        let season_mean = mean(chunk).unwrap_or(0.0);
        for (i, v) in chunk.iter().enumerate() {
            factors[i] += match mode {
                SeasonalMode::Additive => v - season_mean,
                SeasonalMode::Multiplicative if season_mean != 0.0 => v / season_mean,
                SeasonalMode::Multiplicative => 1.0,
            };
        }
    }
    for f in factors.iter_mut() {
        *f /= seasons as f64;
    }

    normalize_factors(&factors, mode)
}

fn normalize_factors(factors: &[f64], mode: SeasonalMode) -> Vec<f64> {
    let avg = mean(factors).unwrap_or(0.0);
    match mode {
        SeasonalMode::Additive => factors.iter().map(|f| f - avg).collect(),
        SeasonalMode::Multiplicative if avg > 0.0 => factors.iter().map(|f| f / avg).collect(),
        SeasonalMode::Multiplicative => factors.to_vec(),
    }
}
