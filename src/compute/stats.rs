//! Sample statistics used by the renderers.
//!
//! Functions that would divide by a zero variance return `None` instead of
//! producing NaN; callers decide whether to skip the point.

use std::f64::consts::TAU;

/// Arithmetic mean (0 for an empty slice).
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Root mean square.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Biased excess kurtosis `m4 / m2^2 - 3`. `None` for a zero-variance sample.
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let m = mean(values);
    let (m2, m4) = values.iter().fold((0.0, 0.0), |(m2, m4), v| {
        let d2 = (v - m) * (v - m);
        (m2 + d2, m4 + d2 * d2)
    });
    let (m2, m4) = (m2 / n, m4 / n);
    if !has_spread(m2.sqrt(), values) {
        return None;
    }
    Some(m4 / (m2 * m2) - 3.0)
}

/// Shift to zero mean and scale to unit population variance.
/// `None` for a zero-variance sample.
pub fn standardize(values: &[f64]) -> Option<Vec<f64>> {
    let m = mean(values);
    let std = population_std(values);
    if !has_spread(std, values) {
        return None;
    }
    Some(values.iter().map(|v| (v - m) / std).collect())
}

/// True if `std` is distinguishable from rounding noise on `values`.
fn has_spread(std: f64, values: &[f64]) -> bool {
    let scale = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    std.is_finite() && std > 4.0 * f64::EPSILON * scale
}

/// Minimum and maximum over the finite values.
pub fn finite_range<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// `n` evenly spaced points from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Density of the standard normal distribution.
#[inline]
pub fn standard_normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / TAU.sqrt()
}

/// One-dimensional Gaussian kernel density estimate with Scott's bandwidth.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    /// `None` when fewer than two samples or the samples have no spread.
    pub fn new(samples: Vec<f64>) -> Option<Self> {
        let n = samples.len();
        if n < 2 {
            return None;
        }
        // Scott's rule on the unbiased standard deviation
        let std = population_std(&samples) * (n as f64 / (n - 1) as f64).sqrt();
        if !has_spread(std, &samples) {
            return None;
        }
        let bandwidth = std * (n as f64).powf(-0.2);
        Some(Self { samples, bandwidth })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Estimated density at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        let h = self.bandwidth;
        let sum: f64 = self
            .samples
            .iter()
            .map(|s| standard_normal_pdf((x - s) / h))
            .sum();
        sum / (self.samples.len() as f64 * h)
    }

    /// Estimated density at every point.
    pub fn evaluate_all(&self, points: &[f64]) -> Vec<f64> {
        points.iter().map(|&x| self.evaluate(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_moments() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert_eq!(population_std(&values), 2.0);
        assert!((rms(&[3.0, -4.0]) - (12.5f64).sqrt()).abs() < 1e-12);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_kurtosis_of_two_point_distribution() {
        // Symmetric two-point distribution: m4 / m2^2 = 1
        let values = [-1.0, 1.0, -1.0, 1.0];
        assert!((excess_kurtosis(&values).unwrap() + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_samples() {
        let constant = [3.0; 10];
        assert_eq!(excess_kurtosis(&constant), None);
        assert_eq!(standardize(&constant), None);
        assert!(GaussianKde::new(constant.to_vec()).is_none());
        assert!(GaussianKde::new(vec![1.0]).is_none());
        assert_eq!(excess_kurtosis(&[]), None);
    }

    #[test]
    fn test_finite_range_skips_nan() {
        let values = [f64::NAN, 2.0, -1.0, f64::INFINITY, 0.5];
        assert_eq!(finite_range(&values), Some((-1.0, 2.0)));
        assert_eq!(finite_range(&[f64::NAN]), None);
    }

    #[test]
    fn test_linspace_endpoints() {
        let points = linspace(-6.0, 6.0, 5);
        assert_eq!(points, vec![-6.0, -3.0, 0.0, 3.0, 6.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_kde_integrates_to_one() {
        let samples: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 / 25.0 - 2.0).collect();
        let kde = GaussianKde::new(samples).unwrap();
        let grid = linspace(-10.0, 10.0, 2001);
        let step = grid[1] - grid[0];
        let integral: f64 = kde.evaluate_all(&grid).iter().sum::<f64>() * step;
        assert!((integral - 1.0).abs() < 1e-3, "integral = {integral}");
    }

    proptest! {
        #[test]
        fn standardized_has_zero_mean_unit_variance(
            values in prop::collection::vec(-1e3f64..1e3, 2..200)
        ) {
            if let Some(z) = standardize(&values) {
                prop_assert!(mean(&z).abs() < 1e-9);
                prop_assert!((population_std(&z) - 1.0).abs() < 1e-9);
            }
        }

        #[test]
        fn kurtosis_is_at_least_minus_two(
            values in prop::collection::vec(-1e3f64..1e3, 2..200)
        ) {
            if let Some(k) = excess_kurtosis(&values) {
                prop_assert!(k >= -2.0 - 1e-9);
            }
        }
    }
}
