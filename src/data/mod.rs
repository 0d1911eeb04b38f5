//! Core data model: the expression matrix, its per-cell metadata and gene sets.

mod gene_set;
mod matrix;
mod metadata;

pub use gene_set::GeneSet;
pub use matrix::{ExpressionMatrix, ValueScale};
pub use metadata::{CellMetadata, Column, MetadataUpdate};
