//! Logistic regression for the detection (zero versus non-zero) part of the
//! hurdle model.

use nalgebra::{DMatrix, DVector};

const MAX_ITER: usize = 25;
const TOL: f64 = 1e-8;
/// Fitted probabilities are kept inside `[MIN_P, 1 - MIN_P]`.
const MIN_P: f64 = 1e-10;
const MAX_P: f64 = 1.0 - 1e-10;

fn logistic(eta: f64) -> f64 {
    (1.0 / (1.0 + (-eta).exp())).clamp(MIN_P, MAX_P)
}

/// Maximized log-likelihood of a logistic regression of the 0/1 outcome `z`
/// on the design `x` (observations x coefficients), fit by iteratively
/// reweighted least squares.
///
/// A singular weighted system stops the iterations at the current estimate.
/// Under complete separation the coefficients diverge and the likelihood
/// approaches its supremum, which is what the likelihood-ratio test needs.
pub(crate) fn logistic_log_likelihood(z: &[f64], x: &DMatrix<f64>) -> f64 {
    let (n, p) = x.shape();
    let p_mean = (z.iter().sum::<f64>() / n as f64).clamp(MIN_P, MAX_P);

    let mut beta = DVector::<f64>::zeros(p);
    beta[0] = (p_mean / (1.0 - p_mean)).ln();

    for _ in 0..MAX_ITER {
        let eta = x * &beta;
        let mut xw = x.clone();
        let mut zw = DVector::<f64>::zeros(n);
        for i in 0..n {
            let pi = logistic(eta[i]);
            let wi = (pi * (1.0 - pi)).max(MIN_P);
            let w_sqrt = wi.sqrt();
            for j in 0..p {
                xw[(i, j)] *= w_sqrt;
            }
            // Working response eta + (z - p) / w, weighted by sqrt(w).
            zw[i] = (eta[i] + (z[i] - pi) / wi) * w_sqrt;
        }

        let xtwx = xw.transpose() * &xw;
        let xtwz = xw.transpose() * &zw;
        let beta_new = match xtwx.try_inverse() {
            Some(inv) => inv * xtwz,
            None => break,
        };

        let delta: f64 = (&beta_new - &beta).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta.iter().map(|b| b.abs()).sum::<f64>().max(1.0);
        beta = beta_new;
        if delta / scale < TOL {
            break;
        }
    }

    let eta = x * &beta;
    binary_log_likelihood(z, eta.iter().map(|&e| logistic(e)))
}

fn binary_log_likelihood(z: &[f64], p: impl Iterator<Item = f64>) -> f64 {
    z.iter()
        .zip(p)
        .map(|(&zi, pi)| if zi > 0.5 { pi.ln() } else { (1.0 - pi).ln() })
        .sum()
}

/// Likelihood-ratio statistic for the group indicator in a logistic model of
/// detection, optionally adjusted for a per-observation covariate.
///
/// Returns `None` when detection is constant (all detected or none), which
/// leaves nothing to model.
pub(crate) fn logistic_lrt(detected: &[f64], group: &[f64], covariate: Option<&[f64]>) -> Option<f64> {
    let n = detected.len();
    let n_detected = detected.iter().filter(|&&d| d > 0.5).count();
    if n_detected == 0 || n_detected == n {
        return None;
    }

    let mut full_columns: Vec<&[f64]> = vec![group];
    let mut reduced_columns: Vec<&[f64]> = Vec::new();
    if let Some(cov) = covariate {
        full_columns.push(cov);
        reduced_columns.push(cov);
    }

    let full = with_intercept(n, &full_columns);
    let reduced = with_intercept(n, &reduced_columns);
    let ll_full = logistic_log_likelihood(detected, &full);
    let ll_reduced = logistic_log_likelihood(detected, &reduced);
    Some((2.0 * (ll_full - ll_reduced)).max(0.0))
}

fn with_intercept(n: usize, columns: &[&[f64]]) -> DMatrix<f64> {
    DMatrix::from_fn(n, columns.len() + 1, |i, j| {
        if j == 0 { 1.0 } else { columns[j - 1][i] }
    })
}
