//! # single-cellstats
//!
//! Statistical analysis of single-cell expression data, part of the single-rust ecosystem.
//!
//! The crate covers the core of a typical single-cell workflow after
//! quantification: normalizing counts, scoring gene signatures (including
//! cell-cycle phase), regressing out unwanted covariates, collapsing cells into
//! pseudobulk samples, and testing genes for differential expression between
//! groups of cells or samples.
//!
//! ## Core Features
//!
//! - **Normalization**: `log1p` of counts scaled to a common library size
//! - **Signature Scoring**: module scores against expression-matched control genes,
//!   cell-cycle phase assignment
//! - **Covariate Regression**: per-gene least-squares residuals, standardized
//! - **Pseudobulk Aggregation**: raw counts summed per group key
//! - **Differential Expression**: Wilcoxon, t-test, negative binomial and hurdle
//!   backends with multiple testing correction
//!
//! ## Data Flow
//!
//! Every stage takes an [`ExpressionMatrix`](data::ExpressionMatrix) (and, where
//! needed, its [`CellMetadata`](data::CellMetadata)) by reference and returns new
//! values. Metadata annotations are returned as a
//! [`MetadataUpdate`](data::MetadataUpdate) that the caller applies explicitly;
//! applying never overwrites an existing field.
//!
//! ## Module Organization
//!
//! - **[`data`]**: expression matrix, cell metadata and gene sets
//! - **[`preprocessing`]**: normalization and covariate regression
//! - **[`enrichment`]**: signature and cell-cycle scoring
//! - **[`aggregate`]**: pseudobulk aggregation
//! - **[`testing`]**: differential expression, test backends, multiple testing correction
//! - **[`fields`]**: stable metadata and result field names

pub mod aggregate;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod fields;
pub mod preprocessing;
pub mod testing;

pub use error::{BackendError, Error, Result};
