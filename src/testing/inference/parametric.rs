//! Parametric tests: two-sample t-tests and the Gaussian least-squares fits
//! used by the continuous part of the hurdle model.

use super::GeneTest;
use crate::data::ValueScale;
use crate::error::BackendError;
use crate::testing::effect::avg_log2_fold_change;
use crate::testing::{TTestType, TestResult};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Pivots of the normal equations below this fraction of the largest
/// diagonal entry mark the design as rank-deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Student or Welch t-test backend.
pub struct TTest {
    test_type: TTestType,
    scale: ValueScale,
}

impl TTest {
    pub fn new(test_type: TTestType, scale: ValueScale) -> Self {
        TTest { test_type, scale }
    }
}

impl GeneTest for TTest {
    fn name(&self) -> &'static str {
        match self.test_type {
            TTestType::Student => "t_student",
            TTestType::Welch => "t_welch",
        }
    }

    fn test(&self, group1: &[f64], group2: &[f64]) -> Result<TestResult<f64>, BackendError> {
        if group1.len() < 2 || group2.len() < 2 {
            let (group, found) = if group1.len() < 2 { (1, group1.len()) } else { (2, group2.len()) };
            return Err(BackendError::InsufficientReplicates {
                group,
                found,
                required: 2,
            });
        }
        let result = t_test(group1, group2, self.test_type);
        Ok(result.effect(avg_log2_fold_change(group1, group2, self.scale)))
    }
}

/// Perform a t-test comparing two samples.
///
/// This function performs either Student's t-test (assuming equal variances) or
/// Welch's t-test (allowing unequal variances) on two samples.
///
/// # Arguments
///
/// * `x` - First sample
/// * `y` - Second sample
/// * `test_type` - Type of t-test to perform
///
/// # Returns
///
/// `TestResult` containing the t-statistic and p-value.
pub fn t_test(x: &[f64], y: &[f64], test_type: TTestType) -> TestResult<f64> {
    let (sum_x, sum_sq_x) = sums(x);
    let (sum_y, sum_sq_y) = sums(y);
    fast_t_test_from_sums(
        sum_x,
        sum_sq_x,
        x.len() as f64,
        sum_y,
        sum_sq_y,
        y.len() as f64,
        test_type,
    )
}

fn sums(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((0.0, 0.0), |(s, sq), &v| (s + v, sq + v * v))
}

/// Perform a t-test using precomputed summary statistics.
///
/// # Arguments
///
/// * `sum1`, `sum_sq1`, `n1` - Sum, sum of squares, and count for group 1
/// * `sum2`, `sum_sq2`, `n2` - Sum, sum of squares, and count for group 2
/// * `test_type` - Type of t-test to perform (Student's or Welch's)
///
/// # Returns
///
/// `TestResult` containing the t-statistic, p-value and degrees of freedom.
/// Two constant groups with the same mean give `t = 0, p = 1`; with different
/// means the difference is certain and `p = 0`.
pub fn fast_t_test_from_sums(
    sum1: f64,
    sum_sq1: f64,
    n1: f64,
    sum2: f64,
    sum_sq2: f64,
    n2: f64,
    test_type: TTestType,
) -> TestResult<f64> {
    if n1 < 2.0 || n2 < 2.0 {
        return TestResult::new(0.0, 1.0);
    }

    let mean1 = sum1 / n1;
    let mean2 = sum2 / n2;
    // Computational formula; clamp the rounding error of constant groups.
    let var1 = ((sum_sq1 - sum1 * sum1 / n1) / (n1 - 1.0)).max(0.0);
    let var2 = ((sum_sq2 - sum2 * sum2 / n2) / (n2 - 1.0)).max(0.0);
    let mean_diff = mean1 - mean2;

    let (std_err, df) = match test_type {
        TTestType::Student => {
            let pooled_var = ((n1 - 1.0) * var1 + (n2 - 1.0) * var2) / (n1 + n2 - 2.0);
            ((pooled_var * (1.0 / n1 + 1.0 / n2)).sqrt(), n1 + n2 - 2.0)
        }
        TTestType::Welch => {
            let term1 = var1 / n1;
            let term2 = var2 / n2;
            let combined_var = term1 + term2;
            // Welch-Satterthwaite
            let df = combined_var * combined_var
                / (term1 * term1 / (n1 - 1.0) + term2 * term2 / (n2 - 1.0));
            (combined_var.sqrt(), df)
        }
    };

    let scale = mean1.abs().max(mean2.abs()).max(1.0);
    if std_err <= f64::EPSILON * scale {
        let p_value = if mean_diff.abs() <= f64::EPSILON * scale { 1.0 } else { 0.0 };
        let t_stat = if p_value == 1.0 { 0.0 } else { mean_diff.signum() * f64::INFINITY };
        return TestResult::new(t_stat, p_value);
    }

    let t_stat = mean_diff / std_err;
    TestResult::new(t_stat, t_test_p_value(t_stat, df))
        .with_degrees_of_freedom(df)
        .with_standard_error(std_err)
}

fn t_test_p_value(t_stat: f64, df: f64) -> f64 {
    if !t_stat.is_finite() {
        return if t_stat.is_infinite() { 0.0 } else { 1.0 };
    }
    if df <= 0.0 || !df.is_finite() {
        return 1.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t_dist) => (2.0 * t_dist.sf(t_stat.abs())).min(1.0),
        Err(_) => 1.0,
    }
}

/// Residual sum of squares of `y` regressed on `columns` (no implicit
/// intercept). `None` when the design is rank-deficient.
pub(crate) fn ols_rss(y: &[f64], columns: &[&[f64]]) -> Option<f64> {
    let n = y.len();
    let p = columns.len();
    if n <= p {
        return None;
    }
    let x = DMatrix::from_fn(n, p, |i, j| columns[j][i]);
    let y = DVector::from_column_slice(y);
    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let max_diag = xtx.diagonal().max();
    let cholesky = xtx.cholesky()?;
    if cholesky
        .l()
        .diagonal()
        .iter()
        .any(|&d| d * d <= RANK_TOLERANCE * max_diag)
    {
        return None;
    }
    let beta = cholesky.solve(&xty);
    let residuals = y - x * beta;
    Some(residuals.norm_squared())
}

/// Likelihood-ratio statistic of a Gaussian linear model with a group
/// indicator against the same model without it.
///
/// The covariate, when given, is used only if it keeps the design full rank
/// on these observations. Returns `None` when the group effect cannot be
/// estimated (a single group present, or too few observations).
pub(crate) fn gaussian_lrt(y: &[f64], group: &[f64], covariate: Option<&[f64]>) -> Option<f64> {
    let n = y.len();
    let in_group = group.iter().filter(|&&g| g != 0.0).count();
    if in_group == 0 || in_group == n {
        return None;
    }
    let intercept = vec![1.0; n];
    let intercept = intercept.as_slice();

    let fits = covariate.and_then(|cov| {
        let full = ols_rss(y, &[intercept, group, cov])?;
        let reduced = ols_rss(y, &[intercept, cov])?;
        Some((full, reduced))
    });
    let (rss_full, rss_reduced) = match fits {
        Some(fits) => fits,
        None => (ols_rss(y, &[intercept, group])?, ols_rss(y, &[intercept])?),
    };

    let tolerance = 1e-12 * y.iter().map(|v| v * v).sum::<f64>().max(1.0);
    if rss_reduced <= tolerance {
        return Some(0.0);
    }
    if rss_full <= tolerance {
        return Some(f64::INFINITY);
    }
    Some((n as f64 * (rss_reduced / rss_full).ln()).max(0.0))
}
