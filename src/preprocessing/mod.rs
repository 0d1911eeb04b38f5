//! Per-cell normalization and covariate regression.
//!
//! - **[`normalize`]**: log-normalization of raw counts to a common library size
//! - **[`regress`]**: per-gene OLS removal of numeric covariates (e.g. cell-cycle
//!   scores), returning standardized residuals

pub mod normalize;
pub mod regress;

pub use normalize::{NormalizeParams, normalize};
pub use regress::{RegressParams, RegressionOutput, regress_out};
