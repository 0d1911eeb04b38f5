use crate::data::{CellMetadata, ExpressionMatrix, ValueScale};
use crate::error::{Error, Result};
use log::{info, warn};
use nalgebra::DMatrix;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};
use std::collections::HashSet;

/// Covariates with a range below this are treated as constant.
const CONSTANT_TOLERANCE: f64 = 1e-12;
/// Residual spread below this (relative to the gene's magnitude) counts as zero.
const RESIDUAL_TOLERANCE: f64 = 1e-10;

/// Options applied to the residuals after the covariate fit.
#[derive(Debug, Clone)]
pub struct RegressParams {
    /// Subtract each gene's residual mean.
    pub center: bool,
    /// Divide each gene's residuals by their sample standard deviation.
    pub scale: bool,
    /// Clip standardized values to `[-clip, clip]`.
    pub clip: Option<f64>,
}

impl Default for RegressParams {
    fn default() -> Self {
        RegressParams {
            center: true,
            scale: true,
            clip: None,
        }
    }
}

impl RegressParams {
    pub fn with_clip(mut self, clip: f64) -> Self {
        self.clip = Some(clip);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RegressionOutput {
    /// Standardized residuals, genes x cells.
    pub matrix: ExpressionMatrix,
    /// Covariates that entered the model, in order.
    pub used_covariates: Vec<String>,
    /// Covariates dropped because they were constant across cells.
    pub dropped_covariates: Vec<String>,
}

/// Regress the named numeric covariates out of every gene and return
/// standardized residuals.
///
/// Each gene is fit independently by ordinary least squares against an
/// intercept plus the covariates. Constant covariates are dropped with a
/// warning. An empty covariate list reduces to plain per-gene scaling.
///
/// # Errors
///
/// * `UnsupportedInput` for raw counts (normalize first)
/// * `UnknownIdentifier` for a covariate field that does not exist
/// * `InvalidInput` for a categorical or duplicated covariate
/// * `SingularDesign` if the remaining design matrix is rank-deficient
pub fn regress_out<S: AsRef<str>>(
    matrix: &ExpressionMatrix,
    metadata: &CellMetadata,
    covariates: &[S],
    params: &RegressParams,
) -> Result<RegressionOutput> {
    if matrix.scale() == ValueScale::RawCounts {
        return Err(Error::unsupported(
            "covariate regression expects normalized values, got raw counts",
        ));
    }
    let metadata = metadata.aligned_to(matrix.columns())?;
    let n_cells = matrix.n_columns();

    let mut seen = HashSet::new();
    let mut used = Vec::new();
    let mut dropped = Vec::new();
    let mut design_columns: Vec<&[f64]> = Vec::new();

    for name in covariates {
        let name = name.as_ref();
        if !seen.insert(name) {
            return Err(Error::invalid(format!("covariate '{}' listed twice", name)));
        }
        let values = metadata.numeric(name)?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid(format!(
                "covariate '{}' has non-finite values",
                name
            )));
        }
        if is_constant(values) {
            warn!(
                "Covariate '{}' is constant across {} cells; skipping it for all genes",
                name, n_cells
            );
            dropped.push(name.to_string());
            continue;
        }
        used.push(name.to_string());
        design_columns.push(values);
    }

    let projection = fit_projection(&design_columns, n_cells)?;

    let mut residuals = Array2::<f64>::zeros((matrix.n_genes(), n_cells));
    residuals
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(matrix.values().axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut out, y)| {
            let y = y.to_vec();
            let magnitude = y.iter().fold(1.0f64, |acc, v| acc.max(v.abs()));
            let mut r = projection.residuals(&y);
            standardize(&mut r, params, RESIDUAL_TOLERANCE * magnitude);
            for (o, v) in out.iter_mut().zip(r) {
                *o = v;
            }
        });

    info!(
        "Regressed {} covariate(s) out of {} genes ({} dropped as constant)",
        used.len(),
        matrix.n_genes(),
        dropped.len()
    );

    Ok(RegressionOutput {
        matrix: matrix.derive(residuals, ValueScale::Residual),
        used_covariates: used,
        dropped_covariates: dropped,
    })
}

fn is_constant(values: &[f64]) -> bool {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    values.len() < 2 || (max - min) <= CONSTANT_TOLERANCE * max.abs().max(min.abs()).max(1.0)
}

/// Precomputed least-squares solver shared read-only by all genes.
struct Projection {
    /// Intercept plus covariates, cells x p.
    design: DMatrix<f64>,
    /// `(X'X)^-1 X'`, p x cells.
    solver: DMatrix<f64>,
}

impl Projection {
    fn residuals(&self, y: &[f64]) -> Vec<f64> {
        let (p, n) = self.solver.shape();
        let beta: Vec<f64> = (0..p)
            .map(|j| (0..n).map(|i| self.solver[(j, i)] * y[i]).sum())
            .collect();
        (0..n)
            .map(|i| {
                let fitted: f64 = (0..p).map(|j| self.design[(i, j)] * beta[j]).sum();
                y[i] - fitted
            })
            .collect()
    }
}

fn fit_projection(covariates: &[&[f64]], n_cells: usize) -> Result<Projection> {
    let p = covariates.len() + 1;
    let design = DMatrix::from_fn(n_cells, p, |i, j| {
        if j == 0 { 1.0 } else { covariates[j - 1][i] }
    });

    let svd = design.clone().svd(false, false);
    let max_sv = svd.singular_values.max();
    let tolerance = max_sv * (n_cells.max(p) as f64) * f64::EPSILON;
    let rank = svd.rank(tolerance);
    if rank < p {
        return Err(Error::SingularDesign {
            reason: format!(
                "design with intercept and {} covariate(s) over {} cells has rank {} < {}",
                covariates.len(),
                n_cells,
                rank,
                p
            ),
        });
    }

    let xtx = design.transpose() * &design;
    let inverse = xtx
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| Error::SingularDesign {
            reason: "normal equations are not positive definite".to_string(),
        })?;
    let solver = inverse * design.transpose();
    Ok(Projection { design, solver })
}

fn standardize(values: &mut [f64], params: &RegressParams, zero_sd: f64) {
    let n = values.len();
    if n == 0 {
        return;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if params.center {
        values.iter_mut().for_each(|v| *v -= mean);
    }
    if params.scale {
        let center = if params.center { 0.0 } else { mean };
        let ss: f64 = values.iter().map(|v| (v - center).powi(2)).sum();
        let sd = if n > 1 { (ss / (n - 1) as f64).sqrt() } else { 0.0 };
        if sd > zero_sd {
            values.iter_mut().for_each(|v| *v /= sd);
        } else {
            values.iter_mut().for_each(|v| *v = 0.0);
        }
    }
    if let Some(clip) = params.clip {
        values.iter_mut().for_each(|v| *v = v.clamp(-clip, clip));
    }
}
