//! Two-part hurdle test for log-normalized single-cell expression.
//!
//! Detection (value > 0) is modeled by logistic regression and the level of
//! expression among detected cells by a Gaussian linear model. Both parts
//! carry the cell's detection rate (fraction of genes detected, standardized)
//! as a covariate. The likelihood-ratio statistics of the group term in each
//! fitted part are summed and referred to a chi-square with one degree of
//! freedom per fitted part.

use super::GeneTest;
use super::discrete::logistic_lrt;
use super::parametric::gaussian_lrt;
use crate::data::{ExpressionMatrix, ValueScale};
use crate::error::BackendError;
use crate::testing::TestResult;
use crate::testing::effect::avg_log2_fold_change;
use statrs::distribution::{ChiSquared, ContinuousCDF};

pub struct HurdleTest {
    /// Standardized detection rate of every column, group 1 then group 2.
    detection_rate: Option<Vec<f64>>,
    n1: usize,
}

impl HurdleTest {
    pub fn new(matrix: &ExpressionMatrix, group1: &[usize], group2: &[usize]) -> Self {
        let values = matrix.values();
        let n_genes = matrix.n_genes().max(1) as f64;
        let rates: Vec<f64> = group1
            .iter()
            .chain(group2)
            .map(|&c| values.column(c).iter().filter(|&&v| v > 0.0).count() as f64 / n_genes)
            .collect();
        HurdleTest {
            detection_rate: standardize(&rates),
            n1: group1.len(),
        }
    }
}

/// Zero-mean, unit-variance copy; `None` for a constant vector.
fn standardize(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len() as f64;
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    if sd <= 1e-12 {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / sd).collect())
}

impl GeneTest for HurdleTest {
    fn name(&self) -> &'static str {
        "hurdle"
    }

    fn test(&self, group1: &[f64], group2: &[f64]) -> Result<TestResult<f64>, BackendError> {
        if group1.len() != self.n1 {
            return Err(BackendError::Numerical {
                reason: "group size differs from the fitted detection rates".to_string(),
            });
        }
        let values: Vec<f64> = group1.iter().chain(group2).copied().collect();
        let indicator: Vec<f64> = (0..values.len())
            .map(|i| if i < group1.len() { 1.0 } else { 0.0 })
            .collect();
        let detected: Vec<f64> = values.iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect();
        let covariate = self.detection_rate.as_deref();

        let lr_discrete = logistic_lrt(&detected, &indicator, covariate);

        let positive: Vec<usize> = (0..values.len()).filter(|&i| values[i] > 0.0).collect();
        let pick = |v: &[f64]| -> Vec<f64> { positive.iter().map(|&i| v[i]).collect() };
        let y_pos = pick(&values);
        let group_pos = pick(&indicator);
        let cov_pos = covariate.map(pick);
        let lr_continuous = gaussian_lrt(&y_pos, &group_pos, cov_pos.as_deref());

        let components: Vec<f64> = [lr_discrete, lr_continuous].into_iter().flatten().collect();
        if components.is_empty() {
            return Err(BackendError::Untestable {
                reason: "neither detection nor positive expression differs in a testable way".to_string(),
            });
        }
        let df = components.len() as f64;
        let statistic: f64 = components.iter().sum();
        let p_value = if statistic.is_infinite() {
            0.0
        } else {
            let chi_sq = ChiSquared::new(df).map_err(|e| BackendError::Numerical {
                reason: e.to_string(),
            })?;
            chi_sq.sf(statistic).clamp(0.0, 1.0)
        };

        let mut result = TestResult::with_effect_size(
            statistic,
            p_value,
            avg_log2_fold_change(group1, group2, ValueScale::LogNormalized),
        )
        .with_degrees_of_freedom(df);
        if let Some(lr) = lr_discrete {
            result = result.with_metadata("lr_detection", lr);
        }
        if let Some(lr) = lr_continuous {
            result = result.with_metadata("lr_continuous", lr);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Gene 0 is detected in most group-1 cells at a high level and rarely in
    /// group 2; gene 1 is the same in both groups; the rest vary detection.
    fn setup() -> (ExpressionMatrix, Vec<usize>, Vec<usize>) {
        let n_cells = 20;
        let values = Array2::from_shape_fn((6, n_cells), |(g, c)| {
            let in_g1 = c < 10;
            match g {
                0 => {
                    if in_g1 && c % 5 != 0 {
                        2.0 + 0.1 * (c % 3) as f64
                    } else if !in_g1 && c % 5 == 0 {
                        0.5
                    } else {
                        0.0
                    }
                }
                1 => {
                    if c % 2 == 0 { 1.0 + 0.05 * (c % 4) as f64 } else { 0.0 }
                }
                _ => {
                    if (c + g) % 3 == 0 { 0.0 } else { 0.7 }
                }
            }
        });
        let m = ExpressionMatrix::new(
            values,
            (0..6).map(|g| format!("G{}", g)).collect(),
            (0..n_cells).map(|c| format!("c{}", c)).collect(),
            ValueScale::LogNormalized,
        )
        .unwrap();
        (m, (0..10).collect(), (10..20).collect())
    }

    #[test]
    fn test_hurdle_separates_marker_from_null() {
        let (m, g1, g2) = setup();
        let backend = HurdleTest::new(&m, &g1, &g2);
        let marker = backend.test(&m.gather(0, &g1), &m.gather(0, &g2)).unwrap();
        let null = backend.test(&m.gather(1, &g1), &m.gather(1, &g2)).unwrap();
        assert!(marker.p_value < 0.01);
        assert!(marker.effect_size.unwrap() > 0.0);
        assert!(null.p_value > marker.p_value);
        assert_eq!(marker.degrees_of_freedom, Some(2.0));
    }

    #[test]
    fn test_never_detected_is_untestable() {
        let (m, g1, g2) = setup();
        let backend = HurdleTest::new(&m, &g1, &g2);
        assert!(matches!(
            backend.test(&[0.0; 10], &[0.0; 10]),
            Err(BackendError::Untestable { .. })
        ));
    }
}
