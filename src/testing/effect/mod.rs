use crate::data::ValueScale;

/// Pseudocount added to group means before taking log2 ratios.
pub const PSEUDO_COUNT: f64 = 1.0;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Fraction of values strictly above zero (the `pct` columns of a DE table).
pub fn fraction_expressed(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|&&v| v > 0.0).count() as f64 / values.len() as f64
}

/// `log2((mean1 + pseudo_count) / (mean2 + pseudo_count))`
pub fn log2_fold_change(mean1: f64, mean2: f64, pseudo_count: f64) -> f64 {
    ((mean1 + pseudo_count) / (mean2 + pseudo_count)).log2()
}

/// Average log2 fold change of group 1 over group 2, measured on the scale the
/// values are stored in.
///
/// * Log-normalized values are mapped back with `expm1` so the ratio is taken
///   between mean normalized expression, not between mean logs.
/// * Raw counts use their means directly.
/// * Residuals have no natural ratio; the difference of means is returned.
///
/// Positive values mean higher expression in group 1.
pub fn avg_log2_fold_change(group1: &[f64], group2: &[f64], scale: ValueScale) -> f64 {
    match scale {
        ValueScale::LogNormalized => {
            let m1 = mean_of(group1, f64::exp_m1);
            let m2 = mean_of(group2, f64::exp_m1);
            log2_fold_change(m1, m2, PSEUDO_COUNT)
        }
        ValueScale::RawCounts => log2_fold_change(mean(group1), mean(group2), PSEUDO_COUNT),
        ValueScale::Residual => mean(group1) - mean(group2),
    }
}

fn mean_of(values: &[f64], f: impl Fn(f64) -> f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| f(v)).sum::<f64>() / values.len() as f64
}
