use crate::data::{ExpressionMatrix, ValueScale};
use crate::error::{Error, Result};
use log::debug;
use ndarray::Axis;
use ndarray::parallel::prelude::*;
use rayon::prelude::*;

/// Parameters for log-normalization.
#[derive(Debug, Clone)]
pub struct NormalizeParams {
    /// Counts are rescaled so every cell sums to this value before `log1p`.
    pub target_sum: f64,
    /// Per-cell scale factors; defaults to each cell's total count.
    pub scale_factors: Option<Vec<f64>>,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        NormalizeParams {
            target_sum: 10_000.0,
            scale_factors: None,
        }
    }
}

impl NormalizeParams {
    pub fn with_target_sum(mut self, target_sum: f64) -> Self {
        self.target_sum = target_sum;
        self
    }

    pub fn with_scale_factors(mut self, scale_factors: Vec<f64>) -> Self {
        self.scale_factors = Some(scale_factors);
        self
    }
}

/// Log-normalize raw counts: `log1p(count / scale_factor * target_sum)`.
///
/// Fails with `UnsupportedInput` unless the matrix holds raw counts, and with
/// `InvalidInput` when a cell has a zero total (or a non-positive explicit
/// scale factor), since such a cell cannot be scaled.
pub fn normalize(matrix: &ExpressionMatrix, params: &NormalizeParams) -> Result<ExpressionMatrix> {
    if matrix.scale() != ValueScale::RawCounts {
        return Err(Error::unsupported(format!(
            "normalization expects raw counts, got {:?}",
            matrix.scale()
        )));
    }
    if !(params.target_sum.is_finite() && params.target_sum > 0.0) {
        return Err(Error::invalid(format!(
            "target_sum must be positive, got {}",
            params.target_sum
        )));
    }

    let factors = match &params.scale_factors {
        Some(factors) => {
            if factors.len() != matrix.n_columns() {
                return Err(Error::invalid(format!(
                    "expected {} scale factors, got {}",
                    matrix.n_columns(),
                    factors.len()
                )));
            }
            factors.clone()
        }
        None => matrix.column_totals(),
    };

    if let Some((idx, &f)) = factors
        .iter()
        .enumerate()
        .find(|(_, f)| !(f.is_finite() && **f > 0.0))
    {
        return Err(Error::invalid(format!(
            "cell '{}' has scale factor {} and cannot be normalized",
            matrix.columns()[idx],
            f
        )));
    }

    let mut values = matrix.values().clone();
    values
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .zip(factors.par_iter())
        .for_each(|(mut column, &factor)| {
            let multiplier = params.target_sum / factor;
            column.mapv_inplace(|count| (count * multiplier).ln_1p());
        });

    debug!(
        "Log-normalized {} genes x {} cells to target sum {}",
        matrix.n_genes(),
        matrix.n_columns(),
        params.target_sum
    );

    Ok(matrix.derive(values, ValueScale::LogNormalized))
}
