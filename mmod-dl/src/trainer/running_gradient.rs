//! Online estimation of the slope of a noisy sequence.

use crate::common::*;

/// Recursive least squares fit of a line to a sequence of values.
#[derive(Debug, Clone)]
pub struct RunningGradient {
    n: f64,
    /// Inverse covariance of the regressors `[index, 1]`.
    r: [[f64; 2]; 2],
    /// Slope and intercept.
    w: [f64; 2],
    residual_squared: f64,
}

impl Default for RunningGradient {
    fn default() -> Self {
        Self {
            n: 0.0,
            r: [[1e6, 0.0], [0.0, 1e6]],
            w: [0.0, 0.0],
            residual_squared: 0.0,
        }
    }
}

impl RunningGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, y: f64) {
        let x = [self.n, 1.0];
        let r = &mut self.r;

        let rx = [
            r[0][0] * x[0] + r[0][1] * x[1],
            r[1][0] * x[0] + r[1][1] * x[1],
        ];
        let temp = 1.0 + x[0] * rx[0] + x[1] * rx[1];

        for i in 0..2 {
            for j in 0..2 {
                r[i][j] -= rx[i] * rx[j] / temp;
            }
        }
        let sym = (r[0][1] + r[1][0]) / 2.0;
        r[0][1] = sym;
        r[1][0] = sym;

        let error = y - (x[0] * self.w[0] + x[1] * self.w[1]);
        let gain = [
            r[0][0] * x[0] + r[0][1] * x[1],
            r[1][0] * x[0] + r[1][1] * x[1],
        ];
        self.w[0] += gain[0] * error;
        self.w[1] += gain[1] * error;

        let residual = y - (x[0] * self.w[0] + x[1] * self.w[1]);
        self.residual_squared += residual.powi(2) * temp;
        self.n += 1.0;
    }

    pub fn current_n(&self) -> usize {
        self.n as usize
    }

    /// The fitted slope. Requires at least two values.
    pub fn gradient(&self) -> f64 {
        self.w[0]
    }

    /// The standard error of the slope. Requires at least three values.
    pub fn standard_error(&self) -> f64 {
        let n = self.n;
        let s = self.residual_squared / (n - 2.0);
        let adjust = 12.0 / (n.powi(3) - n);
        (s * adjust).sqrt()
    }

    pub fn probability_gradient_less_than(&self, thresh: f64) -> f64 {
        normal_cdf(thresh, self.gradient(), self.standard_error())
    }

    pub fn probability_gradient_greater_than(&self, thresh: f64) -> f64 {
        1.0 - self.probability_gradient_less_than(thresh)
    }
}

/// Count the trailing values over which the sequence shows no decrease.
///
/// Walks the values backwards and returns the length of the longest suffix whose
/// probability of a decreasing trend is below `probability_of_decrease`.
pub fn count_steps_without_decrease<'a, I>(values: I, probability_of_decrease: f64) -> usize
where
    I: IntoIterator<Item = &'a f64>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut gradient = RunningGradient::new();
    let mut count = 0;

    for (index, &value) in values.into_iter().rev().enumerate() {
        gradient.add(value);
        if gradient.current_n() > 2
            && gradient.probability_gradient_greater_than(0.0) < probability_of_decrease
        {
            count = index + 1;
        }
    }

    count
}

/// Like [count_steps_without_decrease], but values above the
/// `1 - quantile_discard` quantile are skipped.
pub fn count_steps_without_decrease_robust(
    values: &[f64],
    probability_of_decrease: f64,
    quantile_discard: f64,
) -> usize {
    if values.is_empty() {
        return 0;
    }

    let num_discard = (values.len() as f64 * quantile_discard) as usize;
    let quantile_thresh = {
        let mut sorted = values.to_vec();
        sorted.sort_by(|lhs, rhs| lhs.partial_cmp(rhs).unwrap_or(Ordering::Equal));
        sorted[sorted.len() - num_discard.min(sorted.len() - 1) - 1]
    };

    let mut gradient = RunningGradient::new();
    let mut count = 0;

    for (index, &value) in values.iter().rev().enumerate() {
        if value <= quantile_thresh {
            gradient.add(value);
        }
        if gradient.current_n() > 2
            && gradient.probability_gradient_greater_than(0.0) < probability_of_decrease
        {
            count = index + 1;
        }
    }

    count
}

/// The probability that a normal variable is less than `value`.
pub fn normal_cdf(value: f64, mean: f64, stddev: f64) -> f64 {
    if !(stddev > 0.0) {
        return if value > mean { 1.0 } else { 0.0 };
    }
    0.5 * erfc(-(value - mean) / (stddev * std::f64::consts::SQRT_2))
}

/// Complementary error function with fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_gradient_fits_line() {
        let mut gradient = RunningGradient::new();
        (0..100).for_each(|index| gradient.add(3.0 - 0.5 * index as f64));
        assert_abs_diff_eq!(gradient.gradient(), -0.5, epsilon = 1e-4);
        assert!(gradient.probability_gradient_less_than(0.0) > 0.99);
    }

    #[test]
    fn normal_cdf_values() {
        assert_abs_diff_eq!(normal_cdf(0.0, 0.0, 1.0), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(normal_cdf(1.0, 0.0, 1.0), 0.841_344_7, epsilon = 1e-6);
        assert_abs_diff_eq!(normal_cdf(-1.96, 0.0, 1.0), 0.024_997_9, epsilon = 1e-6);
        assert_abs_diff_eq!(normal_cdf(1.0, 2.0, 0.0), 0.0);
    }

    #[test]
    fn decreasing_sequence_has_progress() {
        let values: Vec<_> = (0..200).map(|index| 100.0 - index as f64).collect();
        assert!(count_steps_without_decrease(&values, 0.51) < 10);
        assert!(count_steps_without_decrease_robust(&values, 0.51, 0.1) < 10);
    }

    #[test]
    fn flat_sequence_has_no_progress() {
        let values: Vec<_> = (0..200)
            .map(|index| if index % 2 == 0 { 1.0 } else { 1.1 })
            .collect();
        assert!(count_steps_without_decrease(&values, 0.51) > 150);
        assert!(count_steps_without_decrease_robust(&values, 0.51, 0.1) > 150);
    }

    #[test]
    fn robust_count_skips_outliers() {
        // a few huge spikes at the end would look like a decrease
        let mut values: Vec<_> = (0..200)
            .map(|index| if index % 2 == 0 { 1.0 } else { 1.1 })
            .collect();
        values.extend([1000.0, 900.0, 800.0]);
        assert!(count_steps_without_decrease_robust(&values, 0.51, 0.1) > 150);
    }
}
