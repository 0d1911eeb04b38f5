//! Negative binomial likelihood-ratio test for raw counts.
//!
//! Intended for pseudobulk samples: counts are scaled by median-of-ratios
//! size factors, a per-gene dispersion is estimated by maximizing the profile
//! likelihood of the two-group model, and the two-group model is compared
//! against a common-mean model with a chi-square(1) likelihood-ratio test.

use super::GeneTest;
use crate::data::ExpressionMatrix;
use crate::error::BackendError;
use crate::testing::TestResult;
use crate::testing::effect::{log2_fold_change, mean};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::gamma::ln_gamma;

/// Samples required per group to separate dispersion from the mean.
pub const MIN_REPLICATES: usize = 2;
/// Pseudocount on normalized means for the reported log2 fold change.
const EFFECT_PSEUDO_COUNT: f64 = 0.5;
const MIN_LOG_ALPHA: f64 = -18.420680743952367; // ln(1e-8)
const MAX_LOG_ALPHA: f64 = 9.210340371976184; // ln(1e4)
const GOLDEN_ITER: usize = 80;

pub struct NegativeBinomialTest {
    size_factors1: Vec<f64>,
    size_factors2: Vec<f64>,
}

impl NegativeBinomialTest {
    /// Size factors are estimated over the union of both groups' columns.
    pub fn new(matrix: &ExpressionMatrix, group1: &[usize], group2: &[usize]) -> Result<Self, BackendError> {
        for (group, columns) in [(1, group1), (2, group2)] {
            if columns.len() < MIN_REPLICATES {
                return Err(BackendError::InsufficientReplicates {
                    group,
                    found: columns.len(),
                    required: MIN_REPLICATES,
                });
            }
        }
        let columns: Vec<usize> = group1.iter().chain(group2).copied().collect();
        let size_factors = estimate_size_factors(matrix, &columns)?;
        let (sf1, sf2) = size_factors.split_at(group1.len());
        Ok(NegativeBinomialTest {
            size_factors1: sf1.to_vec(),
            size_factors2: sf2.to_vec(),
        })
    }

    pub fn size_factors(&self) -> (&[f64], &[f64]) {
        (&self.size_factors1, &self.size_factors2)
    }
}

impl GeneTest for NegativeBinomialTest {
    fn name(&self) -> &'static str {
        "negbinom"
    }

    fn test(&self, group1: &[f64], group2: &[f64]) -> Result<TestResult<f64>, BackendError> {
        nb_lrt(group1, group2, &self.size_factors1, &self.size_factors2)
    }

    fn fold_change(&self, group1: &[f64], group2: &[f64]) -> Option<f64> {
        let q1 = mean(&normalized(group1, &self.size_factors1));
        let q2 = mean(&normalized(group2, &self.size_factors2));
        Some(log2_fold_change(q1, q2, EFFECT_PSEUDO_COUNT))
    }
}

fn normalized(counts: &[f64], size_factors: &[f64]) -> Vec<f64> {
    counts.iter().zip(size_factors).map(|(k, s)| k / s).collect()
}

/// Median-of-ratios size factors for `columns` of a raw count matrix.
///
/// Uses genes with a positive count in every selected column. When no such
/// gene exists, falls back to library sizes scaled to a geometric mean of 1.
pub fn estimate_size_factors(matrix: &ExpressionMatrix, columns: &[usize]) -> Result<Vec<f64>, BackendError> {
    let values = matrix.values();
    let n = columns.len();
    let mut log_ratios: Vec<Vec<f64>> = vec![Vec::new(); n];

    for gene in 0..matrix.n_genes() {
        let row: Vec<f64> = columns.iter().map(|&c| values[[gene, c]]).collect();
        if row.iter().any(|&v| v <= 0.0) {
            continue;
        }
        let log_geo_mean = row.iter().map(|v| v.ln()).sum::<f64>() / n as f64;
        for (j, v) in row.iter().enumerate() {
            log_ratios[j].push(v.ln() - log_geo_mean);
        }
    }

    if log_ratios.first().is_some_and(|r| !r.is_empty()) {
        return Ok(log_ratios.into_iter().map(|r| median(r).exp()).collect());
    }

    let totals: Vec<f64> = columns
        .iter()
        .map(|&c| values.column(c).sum())
        .collect();
    if let Some(pos) = totals.iter().position(|&t| t <= 0.0) {
        return Err(BackendError::Untestable {
            reason: format!("sample '{}' has no counts", matrix.columns()[columns[pos]]),
        });
    }
    let log_geo_mean = totals.iter().map(|t| t.ln()).sum::<f64>() / n as f64;
    Ok(totals.iter().map(|t| (t.ln() - log_geo_mean).exp()).collect())
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// NB log-likelihood of counts `y` with means `mu` and dispersion `alpha`
/// (variance `mu + alpha * mu^2`).
fn nb_log_likelihood(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    let size = 1.0 / alpha;
    y.iter()
        .zip(mu)
        .map(|(&k, &m)| {
            if m <= 0.0 {
                return if k == 0.0 { 0.0 } else { f64::NEG_INFINITY };
            }
            ln_gamma(k + size) - ln_gamma(k + 1.0) - ln_gamma(size)
                + size * (size / (m + size)).ln()
                + k * (m / (m + size)).ln()
        })
        .sum()
}

/// Dispersion maximizing `nb_log_likelihood` by golden-section search over
/// log(alpha).
fn fit_dispersion(y: &[f64], mu: &[f64]) -> f64 {
    let ll = |log_alpha: f64| nb_log_likelihood(y, mu, log_alpha.exp());
    let ratio = (5.0f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (MIN_LOG_ALPHA, MAX_LOG_ALPHA);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let (mut fc, mut fd) = (ll(c), ll(d));
    for _ in 0..GOLDEN_ITER {
        if fc >= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = ll(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = ll(d);
        }
    }
    ((a + b) / 2.0).exp()
}

/// Likelihood-ratio test of a group-specific mean against a common mean.
///
/// Group means are the averages of size-factor-normalized counts; the
/// dispersion is fitted under the two-group model and shared by both fits.
/// The effect is the log2 ratio of normalized means (group 1 over group 2).
pub fn nb_lrt(
    counts1: &[f64],
    counts2: &[f64],
    size_factors1: &[f64],
    size_factors2: &[f64],
) -> Result<TestResult<f64>, BackendError> {
    if counts1.len() != size_factors1.len() || counts2.len() != size_factors2.len() {
        return Err(BackendError::Numerical {
            reason: "counts and size factors differ in length".to_string(),
        });
    }
    if counts1.iter().chain(counts2).all(|&k| k == 0.0) {
        return Err(BackendError::Untestable {
            reason: "all counts are zero".to_string(),
        });
    }

    let norm1 = normalized(counts1, size_factors1);
    let norm2 = normalized(counts2, size_factors2);
    let q1 = mean(&norm1);
    let q2 = mean(&norm2);
    let q0 = (norm1.iter().sum::<f64>() + norm2.iter().sum::<f64>()) / (norm1.len() + norm2.len()) as f64;

    let y: Vec<f64> = counts1.iter().chain(counts2).copied().collect();
    let mu_full: Vec<f64> = size_factors1
        .iter()
        .map(|s| s * q1)
        .chain(size_factors2.iter().map(|s| s * q2))
        .collect();
    let mu_reduced: Vec<f64> = size_factors1
        .iter()
        .chain(size_factors2)
        .map(|s| s * q0)
        .collect();

    let alpha = fit_dispersion(&y, &mu_full);
    let ll_full = nb_log_likelihood(&y, &mu_full, alpha);
    let ll_reduced = nb_log_likelihood(&y, &mu_reduced, alpha);
    if !ll_full.is_finite() || !ll_reduced.is_finite() {
        return Err(BackendError::Numerical {
            reason: "non-finite negative binomial likelihood".to_string(),
        });
    }

    let statistic = (2.0 * (ll_full - ll_reduced)).max(0.0);
    let chi_sq = ChiSquared::new(1.0).map_err(|e| BackendError::Numerical {
        reason: e.to_string(),
    })?;
    let p_value = chi_sq.sf(statistic).clamp(0.0, 1.0);

    Ok(TestResult::with_effect_size(
        statistic,
        p_value,
        log2_fold_change(q1, q2, EFFECT_PSEUDO_COUNT),
    )
    .with_degrees_of_freedom(1.0)
    .with_metadata("dispersion", alpha)
    .with_metadata("base_mean", q0))
}
