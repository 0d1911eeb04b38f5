use anyhow::{Result, anyhow};
use std::cmp::Ordering;

/// Multiple testing correction methods to control for false positives
/// when performing many statistical tests simultaneously.
///
/// Every method adjusts over the full set of p-values it is given; the
/// differential expression engine passes exactly the genes tested in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Correction {
    /// Family-wise error control, `min(1, p * n)`.
    #[default]
    Bonferroni,
    Holm,
    Hochberg,
    BenjaminiHochberg,
    BenjaminiYekutieli,
}

impl Correction {
    /// Adjust `p_values`, returning one value per input in input order.
    ///
    /// An empty input yields an empty output.
    pub fn adjust(&self, p_values: &[f64]) -> Result<Vec<f64>> {
        if p_values.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Correction::Bonferroni => bonferroni_correction(p_values),
            Correction::Holm => holm_bonferroni_correction(p_values),
            Correction::Hochberg => hochberg_correction(p_values),
            Correction::BenjaminiHochberg => benjamini_hochberg_correction(p_values),
            Correction::BenjaminiYekutieli => benjamini_yekutieli_correction(p_values),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Correction::Bonferroni => "bonferroni",
            Correction::Holm => "holm",
            Correction::Hochberg => "hochberg",
            Correction::BenjaminiHochberg => "BH",
            Correction::BenjaminiYekutieli => "BY",
        }
    }
}

fn validate(p_values: &[f64]) -> Result<()> {
    if p_values.is_empty() {
        return Err(anyhow!("Empty p-value array"));
    }
    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(anyhow!("Invalid p-value at index {}: {}", i, p));
        }
    }
    Ok(())
}

/// Indices of `p_values` ordered by ascending p-value.
fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len()).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// Apply Bonferroni correction to p-values
///
/// Bonferroni correction is a simple but conservative method that multiplies
/// each p-value by the number of tests.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len() as f64;
    Ok(p_values.iter().map(|&p| (p * n).min(1.0)).collect())
}

/// Apply Benjamini-Hochberg (BH) procedure for controlling false discovery rate
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    Ok(step_up(p_values, 1.0))
}

/// Apply Benjamini-Yekutieli (BY) procedure for controlling false discovery rate
/// under arbitrary dependence.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn benjamini_yekutieli_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let c_n: f64 = (1..=p_values.len()).map(|i| 1.0 / i as f64).sum();
    Ok(step_up(p_values, c_n))
}

/// `p * factor * n / rank`, made monotone from the largest p-value down.
fn step_up(p_values: &[f64], factor: f64) -> Vec<f64> {
    let n = p_values.len();
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; n];
    let mut current_min = 1.0f64;
    for (i, &idx) in order.iter().enumerate().rev() {
        let rank = (i + 1) as f64;
        let value = (p_values[idx] * factor * n as f64 / rank).min(1.0);
        current_min = current_min.min(value);
        adjusted[idx] = current_min;
    }
    adjusted
}

/// Apply Holm-Bonferroni (step-down) method for controlling family-wise error rate
///
/// The i-th smallest p-value is multiplied by `n - i + 1` and the sequence is
/// made monotone non-decreasing.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn holm_bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; n];
    let mut current_max = 0.0f64;
    for (i, &idx) in order.iter().enumerate() {
        let value = (p_values[idx] * (n - i) as f64).min(1.0);
        current_max = current_max.max(value);
        adjusted[idx] = current_max;
    }
    Ok(adjusted)
}

/// Apply Hochberg's step-up method for controlling family-wise error rate
///
/// The i-th smallest p-value is multiplied by `n - i + 1`, then made monotone
/// from the largest p-value down.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; n];
    let mut current_min = 1.0f64;
    for (i, &idx) in order.iter().enumerate().rev() {
        let value = (p_values[idx] * (n - i) as f64).min(1.0);
        current_min = current_min.min(value);
        adjusted[idx] = current_min;
    }
    Ok(adjusted)
}
