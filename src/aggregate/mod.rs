//! Pseudobulk aggregation.
//!
//! Cells sharing the same values for an ordered tuple of categorical metadata
//! fields (the group key) are collapsed into one synthetic sample by summing
//! their raw counts gene by gene. Only observed key combinations produce a
//! sample.

use crate::data::{CellMetadata, Column, ExpressionMatrix, ValueScale};
use crate::error::{Error, Result};
use crate::fields;
use log::{info, warn};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone)]
pub struct AggregateParams {
    /// Buckets with fewer cells are dropped with a warning.
    pub min_cells: usize,
    /// Joins key values into the sample label.
    pub separator: String,
}

impl Default for AggregateParams {
    fn default() -> Self {
        AggregateParams {
            min_cells: 1,
            separator: "_".to_string(),
        }
    }
}

impl AggregateParams {
    pub fn with_min_cells(mut self, min_cells: usize) -> Self {
        self.min_cells = min_cells;
        self
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }
}

/// A bucket dropped for having fewer than `min_cells` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct SmallBucketWarning {
    pub label: String,
    pub n_cells: usize,
    pub min_cells: usize,
}

#[derive(Debug, Clone)]
pub struct PseudobulkOutput {
    /// Summed raw counts, genes x buckets.
    pub matrix: ExpressionMatrix,
    /// One row per bucket: the key field values, `n_cells`, and any categorical
    /// field that is constant within every bucket.
    pub metadata: CellMetadata,
    pub dropped: Vec<SmallBucketWarning>,
}

/// Sum raw counts of cells sharing the same key tuple.
///
/// Buckets are ordered by their key tuple. Fails with `UnsupportedInput` when
/// the matrix is not raw counts: normalized values must be back-transformed by
/// the caller before summing.
pub fn aggregate<S: AsRef<str>>(
    matrix: &ExpressionMatrix,
    metadata: &CellMetadata,
    key_fields: &[S],
    params: &AggregateParams,
) -> Result<PseudobulkOutput> {
    if matrix.scale() != ValueScale::RawCounts {
        return Err(Error::unsupported(format!(
            "pseudobulk aggregation sums raw counts, got {:?}",
            matrix.scale()
        )));
    }
    if key_fields.is_empty() {
        return Err(Error::invalid("group key has no fields"));
    }
    let mut seen = HashSet::new();
    for field in key_fields {
        if !seen.insert(field.as_ref()) {
            return Err(Error::invalid(format!(
                "group key field '{}' listed twice",
                field.as_ref()
            )));
        }
    }

    let metadata = metadata.aligned_to(matrix.columns())?;
    let key_columns = key_fields
        .iter()
        .map(|f| metadata.categorical(f.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let n_cells = matrix.n_columns();
    let mut buckets: BTreeMap<Vec<&str>, Vec<usize>> = BTreeMap::new();
    for cell in 0..n_cells {
        let key: Vec<&str> = key_columns.iter().map(|col| col[cell].as_str()).collect();
        buckets.entry(key).or_default().push(cell);
    }

    let mut dropped = Vec::new();
    let mut kept: Vec<(Vec<&str>, Vec<usize>)> = Vec::with_capacity(buckets.len());
    for (key, cells) in buckets {
        if cells.len() < params.min_cells {
            let label = key.join(&params.separator);
            warn!(
                "Pseudobulk bucket '{}' has {} cells (< {}); dropping it",
                label,
                cells.len(),
                params.min_cells
            );
            dropped.push(SmallBucketWarning {
                label,
                n_cells: cells.len(),
                min_cells: params.min_cells,
            });
        } else {
            kept.push((key, cells));
        }
    }
    if kept.is_empty() {
        return Err(Error::invalid(format!(
            "no bucket has at least {} cells",
            params.min_cells
        )));
    }

    let labels: Vec<String> = kept.iter().map(|(k, _)| k.join(&params.separator)).collect();
    let mut unique = HashSet::new();
    if let Some(dup) = labels.iter().find(|l| !unique.insert(l.as_str())) {
        return Err(Error::invalid(format!(
            "distinct key tuples join to the same label '{}'; choose another separator",
            dup
        )));
    }

    let mut bucket_of = vec![None; n_cells];
    for (b, (_, cells)) in kept.iter().enumerate() {
        for &c in cells {
            bucket_of[c] = Some(b);
        }
    }
    let sums = sum_by_bucket(matrix, &bucket_of, kept.len());

    let mut out_metadata = CellMetadata::new(labels.clone())?;
    for (f, field) in key_fields.iter().enumerate() {
        let values = kept.iter().map(|(k, _)| k[f].to_string()).collect();
        out_metadata = out_metadata.with_field(field.as_ref(), Column::Categorical(values))?;
    }
    let counts = kept.iter().map(|(_, cells)| cells.len() as f64).collect();
    out_metadata = out_metadata.with_field(fields::N_CELLS, Column::Numeric(counts))?;

    let field_names: Vec<String> = metadata.field_names().map(|f| f.to_string()).collect();
    for name in field_names {
        if seen.contains(name.as_str()) || out_metadata.has_field(&name) {
            continue;
        }
        if let Ok(values) = metadata.categorical(&name) {
            if let Some(carried) = constant_per_bucket(values, &kept) {
                out_metadata = out_metadata.with_field(&name, Column::Categorical(carried))?;
            }
        }
    }

    info!(
        "Aggregated {} cells into {} pseudobulk samples ({} dropped)",
        n_cells,
        labels.len(),
        dropped.len()
    );

    let matrix = ExpressionMatrix::new(sums, matrix.genes().to_vec(), labels, ValueScale::RawCounts)?;
    Ok(PseudobulkOutput {
        matrix,
        metadata: out_metadata,
        dropped,
    })
}

/// Partial sums per worker over cell ranges, merged by addition.
fn sum_by_bucket(matrix: &ExpressionMatrix, bucket_of: &[Option<usize>], n_buckets: usize) -> Array2<f64> {
    let n_genes = matrix.n_genes();
    let values = matrix.values();
    (0..bucket_of.len())
        .into_par_iter()
        .fold(
            || Array2::<f64>::zeros((n_genes, n_buckets)),
            |mut acc, cell| {
                if let Some(b) = bucket_of[cell] {
                    let mut column = acc.column_mut(b);
                    column += &values.index_axis(Axis(1), cell);
                }
                acc
            },
        )
        .reduce(
            || Array2::<f64>::zeros((n_genes, n_buckets)),
            |a, b| a + b,
        )
}

fn constant_per_bucket(values: &[String], buckets: &[(Vec<&str>, Vec<usize>)]) -> Option<Vec<String>> {
    buckets
        .iter()
        .map(|(_, cells)| {
            let first = &values[cells[0]];
            cells
                .iter()
                .all(|&c| &values[c] == first)
                .then(|| first.clone())
        })
        .collect()
}
