//! Per-gene test backends for differential expression.
//!
//! A backend is built once per comparison (so that anything depending only
//! on the two groups, such as size factors or the exact rank-sum table, is
//! computed a single time) and then applied to every gene in parallel.

use crate::data::{ExpressionMatrix, ValueScale};
use crate::error::{BackendError, Error, Result};
use crate::testing::{TestMethod, TestResult};

pub mod count;
pub mod discrete;
pub mod hurdle;
pub mod nonparametric;
pub mod parametric;

/// A two-group test applied to one gene at a time.
///
/// `group1` and `group2` hold the gene's values in the columns of each group.
/// Implementations must set `effect_size`, signed so that a positive value
/// means higher expression in group 1.
pub trait GeneTest: Send + Sync {
    fn name(&self) -> &'static str;

    fn test(&self, group1: &[f64], group2: &[f64]) -> std::result::Result<TestResult<f64>, BackendError>;

    /// The log2 fold change this backend reports as `effect_size`, when it
    /// differs from the scale-based average. Prefilters use it so that a gene
    /// is filtered on the value its table row would show.
    fn fold_change(&self, _group1: &[f64], _group2: &[f64]) -> Option<f64> {
        None
    }
}

/// Build the backend for `method` over the given group columns.
///
/// Fails with `UnsupportedInput` when the matrix is on a scale the backend
/// cannot model, and with a `Backend` error when the groups cannot support
/// it at all (too few replicates, no usable size factors).
pub fn backend_for(
    method: TestMethod,
    matrix: &ExpressionMatrix,
    group1: &[usize],
    group2: &[usize],
) -> Result<Box<dyn GeneTest>> {
    let scale = matrix.scale();
    let backend: Box<dyn GeneTest> = match method {
        TestMethod::MannWhitney => Box::new(nonparametric::RankSumTest::new(group1.len(), group2.len(), scale)),
        TestMethod::TTest(test_type) => Box::new(parametric::TTest::new(test_type, scale)),
        TestMethod::NegativeBinomial => {
            require_scale(method, scale, ValueScale::RawCounts)?;
            let test = count::NegativeBinomialTest::new(matrix, group1, group2).map_err(|source| Error::Backend {
                backend: method.name(),
                source,
            })?;
            Box::new(test)
        }
        TestMethod::Hurdle => {
            require_scale(method, scale, ValueScale::LogNormalized)?;
            Box::new(hurdle::HurdleTest::new(matrix, group1, group2))
        }
    };
    Ok(backend)
}

fn require_scale(method: TestMethod, actual: ValueScale, required: ValueScale) -> Result<()> {
    if actual != required {
        return Err(Error::unsupported(format!(
            "test '{}' requires {:?} values, got {:?}",
            method.name(),
            required,
            actual
        )));
    }
    Ok(())
}
