use crate::utils::{periods_between, PeriodKey};
use log::debug;
use serde::{Deserialize, Serialize};
use splines::{Interpolation, Key, Spline};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataOrigin {
    /// Present in the supplied profile
    Observed,
    /// Missing month filled from its neighbours
    Interpolated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: PeriodKey,
    pub value: f64,
    pub origin: DataOrigin,
}

/// A gap-free monthly series spanning the first to the last observed period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySeries {
    points: Vec<SeriesPoint>,
}

impl MonthlySeries {
    /// Densifies `observed` across its full span. Missing months are linearly
    /// interpolated between their observed neighbours.
    pub fn densify(observed: &BTreeMap<PeriodKey, f64>) -> Self {
        let (Some(start), Some(end)) = (
            observed.keys().next().copied(),
            observed.keys().next_back().copied(),
        ) else {
            return Self { points: Vec::new() };
        };

        let keys: Vec<Key<f64, f64>> = observed
            .iter()
            .map(|(period, value)| {
                Key::new(
                    start.months_until(period) as f64,
                    *value,
                    Interpolation::Linear,
                )
            })
            .collect();
        let spline = Spline::from_vec(keys);

        let mut filled = 0usize;
        let points = periods_between(start, end)
            .into_iter()
            .map(|period| match observed.get(&period) {
                Some(value) => SeriesPoint {
                    period,
                    value: *value,
                    origin: DataOrigin::Observed,
                },
                None => {
                    filled += 1;
                    let t = start.months_until(&period) as f64;
                    SeriesPoint {
                        period,
                        value: spline.clamped_sample(t).unwrap_or(0.0),
                        origin: DataOrigin::Interpolated,
                    }
                }
            })
            .collect();

        if filled > 0 {
            debug!(
                "Filled {} missing month(s) between {} and {}",
                filled, start, end
            );
        }

        Self { points }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn interpolated_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.origin == DataOrigin::Interpolated)
            .count()
    }

    pub fn last_period(&self) -> Option<PeriodKey> {
        self.points.last().map(|p| p.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(year: i32, month: u32) -> PeriodKey {
        PeriodKey::new(year, month).unwrap()
    }

    #[test]
    fn test_gap_is_interpolated() {
        let mut observed = BTreeMap::new();
        observed.insert(key(2023, 1), 100.0);
        observed.insert(key(2023, 4), 400.0);

        let series = MonthlySeries::densify(&observed);
        assert_eq!(series.len(), 4);
        assert_eq!(series.interpolated_count(), 2);

        let values = series.values();
        assert!((values[1] - 200.0).abs() < 1e-9);
        assert!((values[2] - 300.0).abs() < 1e-9);
        assert_eq!(series.points()[0].origin, DataOrigin::Observed);
        assert_eq!(series.points()[1].origin, DataOrigin::Interpolated);
    }

    #[test]
    fn test_contiguous_series_is_unchanged() {
        let observed: BTreeMap<PeriodKey, f64> = (1..=6)
            .map(|m| (key(2024, m), m as f64 * 10.0))
            .collect();
        let series = MonthlySeries::densify(&observed);
        assert_eq!(series.interpolated_count(), 0);
        assert_eq!(series.values(), vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(series.last_period(), Some(key(2024, 6)));
    }

    #[test]
    fn test_empty_input() {
        let series = MonthlySeries::densify(&BTreeMap::new());
        assert!(series.is_empty());
    }
}
