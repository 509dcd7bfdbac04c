//! Small descriptive-statistics helpers shared by the metrics, anomaly and
//! reconciliation modules. All functions return `None` instead of NaN when the
//! input cannot support the statistic.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Linear-interpolated percentile, `pct` in [0, 100].
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quartiles {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

impl Quartiles {
    pub fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            q1: percentile(values, 25.0)?,
            median: percentile(values, 50.0)?,
            q3: percentile(values, 75.0)?,
        })
    }

    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }

    /// Tukey fence `[q1 - k*iqr, q3 + k*iqr]`.
    pub fn fence(&self, k: f64) -> (f64, f64) {
        let iqr = self.iqr();
        (self.q1 - k * iqr, self.q3 + k * iqr)
    }
}

/// Ordinary least squares fit of `values` against their index.
/// Returns `(intercept, slope)`.
pub fn linear_fit(values: &[f64]) -> Option<(f64, f64)> {
    match values.len() {
        0 => None,
        1 => Some((values[0], 0.0)),
        n => {
            let x_mean = (n - 1) as f64 / 2.0;
            let y_mean = mean(values)?;
            let mut num = 0.0;
            let mut den = 0.0;
            for (i, y) in values.iter().enumerate() {
                let dx = i as f64 - x_mean;
                num += dx * (y - y_mean);
                den += dx * dx;
            }
            let slope = if den == 0.0 { 0.0 } else { num / den };
            Some((y_mean - slope * x_mean, slope))
        }
    }
}

/// Guard for ratios: `None` when the denominator is zero or the result is not finite.
pub fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    let r = numerator / denominator;
    r.is_finite().then_some(r)
}

/// Linear mapping of `value` onto `[0, max_points]` between `worst` and `best`.
/// Works for both ascending (`best > worst`) and descending scales.
pub fn scale_points(value: f64, worst: f64, best: f64, max_points: f64) -> f64 {
    if (best - worst).abs() < f64::EPSILON {
        return if value >= best { max_points } else { 0.0 };
    }
    let t = ((value - worst) / (best - worst)).clamp(0.0, 1.0);
    t * max_points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), Some(5.0));
        assert!((std_dev(&v).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn test_percentiles() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(median(&v), Some(3.0));
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(5.0));
        assert_eq!(percentile(&v, 25.0), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
    }

    #[test]
    fn test_quartile_fence() {
        let q = Quartiles::of(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(q.iqr(), 2.0);
        assert_eq!(q.fence(1.5), (-1.0, 7.0));
    }

    #[test]
    fn test_linear_fit() {
        let (a, b) = linear_fit(&[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!((a - 1.0).abs() < 1e-12);
        assert!((b - 2.0).abs() < 1e-12);
        assert_eq!(linear_fit(&[4.0]), Some((4.0, 0.0)));
    }

    #[test]
    fn test_safe_ratio_and_points() {
        assert_eq!(safe_ratio(1.0, 0.0), None);
        assert_eq!(safe_ratio(1.0, 4.0), Some(0.25));
        assert_eq!(scale_points(30.0, 90.0, 30.0, 6.0), 6.0);
        assert_eq!(scale_points(60.0, 90.0, 30.0, 6.0), 3.0);
        assert_eq!(scale_points(120.0, 90.0, 30.0, 6.0), 0.0);
    }
}
