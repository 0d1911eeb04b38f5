use crate::error::{Error, Result};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array2, ArrayView1, Axis};
use num_traits::ToPrimitive;
use single_utilities::traits::FloatOpsTS;
use std::collections::HashMap;

/// The value scale a matrix currently holds.
///
/// Stages check this tag to reject input they cannot interpret, e.g. pseudobulk
/// aggregation refuses anything but raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueScale {
    /// Non-negative integer-like counts straight from quantification.
    RawCounts,
    /// `log1p(count / scale_factor * target_sum)` per cell.
    LogNormalized,
    /// Standardized residuals or other centered values; may be negative.
    Residual,
}

impl ValueScale {
    fn allows_negative(self) -> bool {
        matches!(self, ValueScale::Residual)
    }
}

/// Genes x columns expression values with unique row and column labels.
///
/// Columns are cells, or synthetic samples after pseudobulk aggregation.
/// Every transformation produces a new matrix; instances are never mutated
/// after construction.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    genes: Vec<String>,
    columns: Vec<String>,
    scale: ValueScale,
    gene_lookup: HashMap<String, usize>,
}

impl ExpressionMatrix {
    /// Build a matrix from a dense genes x columns array.
    ///
    /// Fails with `InvalidInput` when the labels do not match the array shape,
    /// when a label is duplicated, when a value is not finite, or when a
    /// negative value appears in a count or log-normalized matrix.
    pub fn new(
        values: Array2<f64>,
        genes: Vec<String>,
        columns: Vec<String>,
        scale: ValueScale,
    ) -> Result<Self> {
        let (n_genes, n_columns) = values.dim();
        if genes.len() != n_genes {
            return Err(Error::invalid(format!(
                "expected {} gene labels, got {}",
                n_genes,
                genes.len()
            )));
        }
        if columns.len() != n_columns {
            return Err(Error::invalid(format!(
                "expected {} column labels, got {}",
                n_columns,
                columns.len()
            )));
        }

        let gene_lookup = unique_lookup(&genes, "gene")?;
        unique_lookup(&columns, "column")?;

        for ((g, c), &v) in values.indexed_iter() {
            if !v.is_finite() {
                return Err(Error::invalid(format!(
                    "non-finite value at gene '{}', column '{}'",
                    genes[g], columns[c]
                )));
            }
            if v < 0.0 && !scale.allows_negative() {
                return Err(Error::invalid(format!(
                    "negative value {} at gene '{}', column '{}'",
                    v, genes[g], columns[c]
                )));
            }
        }

        Ok(ExpressionMatrix {
            values,
            genes,
            columns,
            scale,
            gene_lookup,
        })
    }

    /// Import a sparse genes x columns matrix.
    pub fn from_csr<T>(
        matrix: &CsrMatrix<T>,
        genes: Vec<String>,
        columns: Vec<String>,
        scale: ValueScale,
    ) -> Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut values = Array2::zeros((matrix.nrows(), matrix.ncols()));
        for (row, col, value) in matrix.triplet_iter() {
            values[[row, col]] = to_f64(value)?;
        }
        Self::new(values, genes, columns, scale)
    }

    /// Import a sparse cells x genes matrix (the usual on-disk orientation),
    /// transposing it into genes x cells.
    pub fn from_cell_major_csr<T>(
        matrix: &CsrMatrix<T>,
        genes: Vec<String>,
        cells: Vec<String>,
        scale: ValueScale,
    ) -> Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut values = Array2::zeros((matrix.ncols(), matrix.nrows()));
        for (cell, gene, value) in matrix.triplet_iter() {
            values[[gene, cell]] = to_f64(value)?;
        }
        Self::new(values, genes, cells, scale)
    }

    /// Export the non-zero entries as a sparse genes x columns matrix.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(self.n_genes(), self.n_columns());
        for ((g, c), &v) in self.values.indexed_iter() {
            if v != 0.0 {
                coo.push(g, c, v);
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Same labels, new values and scale. Callers guarantee the shape.
    pub(crate) fn derive(&self, values: Array2<f64>, scale: ValueScale) -> Self {
        debug_assert_eq!(values.dim(), self.values.dim());
        ExpressionMatrix {
            values,
            genes: self.genes.clone(),
            columns: self.columns.clone(),
            scale,
            gene_lookup: self.gene_lookup.clone(),
        }
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn scale(&self) -> ValueScale {
        self.scale
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.gene_lookup.get(gene).copied()
    }

    pub fn row(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(gene_idx)
    }

    /// Expression row for a gene, or `UnknownGene` if it is not present.
    pub fn row_by_name(&self, gene: &str) -> Result<ArrayView1<'_, f64>> {
        self.gene_index(gene)
            .map(|idx| self.values.row(idx))
            .ok_or_else(|| Error::UnknownGene {
                gene: gene.to_string(),
            })
    }

    /// Values of one gene restricted to the given column indices.
    pub fn gather(&self, gene_idx: usize, columns: &[usize]) -> Vec<f64> {
        let row = self.values.row(gene_idx);
        columns.iter().map(|&c| row[c]).collect()
    }

    /// Per-column sums over all genes.
    pub fn column_totals(&self) -> Vec<f64> {
        self.values.sum_axis(Axis(0)).to_vec()
    }

    /// Per-gene means over all columns.
    pub fn gene_means(&self) -> Vec<f64> {
        let n = self.n_columns().max(1) as f64;
        self.values
            .sum_axis(Axis(1))
            .iter()
            .map(|&s| s / n)
            .collect()
    }

    /// Keep only the named genes, in the given order.
    pub fn subset_genes<S: AsRef<str>>(&self, genes: &[S]) -> Result<Self> {
        let indices = genes
            .iter()
            .map(|g| {
                self.gene_index(g.as_ref()).ok_or_else(|| Error::UnknownGene {
                    gene: g.as_ref().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let values = self.values.select(Axis(0), &indices);
        let labels = indices.iter().map(|&i| self.genes[i].clone()).collect();
        Self::new(values, labels, self.columns.clone(), self.scale)
    }

    /// Keep only the given column indices, in the given order.
    pub fn subset_columns(&self, columns: &[usize]) -> Result<Self> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.n_columns()) {
            return Err(Error::invalid(format!(
                "column index {} out of bounds for {} columns",
                bad,
                self.n_columns()
            )));
        }
        let values = self.values.select(Axis(1), columns);
        let labels = columns.iter().map(|&i| self.columns[i].clone()).collect();
        Self::new(values, self.genes.clone(), labels, self.scale)
    }
}

fn unique_lookup(labels: &[String], kind: &str) -> Result<HashMap<String, usize>> {
    let mut lookup = HashMap::with_capacity(labels.len());
    for (i, label) in labels.iter().enumerate() {
        if lookup.insert(label.clone(), i).is_some() {
            return Err(Error::invalid(format!("duplicate {} label '{}'", kind, label)));
        }
    }
    Ok(lookup)
}

fn to_f64<T: FloatOpsTS>(value: &T) -> Result<f64> {
    ToPrimitive::to_f64(value)
        .ok_or_else(|| Error::invalid("matrix value not representable as f64"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_rejects_duplicate_genes() {
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let result = ExpressionMatrix::new(
            values,
            vec!["A".into(), "A".into()],
            labels("c", 2),
            ValueScale::RawCounts,
        );
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_negative_only_allowed_for_residuals() {
        let values = array![[-1.0, 2.0]];
        assert!(
            ExpressionMatrix::new(values.clone(), labels("g", 1), labels("c", 2), ValueScale::RawCounts)
                .is_err()
        );
        assert!(
            ExpressionMatrix::new(values, labels("g", 1), labels("c", 2), ValueScale::Residual)
                .is_ok()
        );
    }

    #[test]
    fn test_cell_major_csr_is_transposed() {
        // 3 cells x 2 genes
        let coo = CooMatrix::try_from_triplets(3, 2, vec![0, 1, 2], vec![0, 1, 1], vec![5.0, 2.0, 7.0])
            .unwrap();
        let csr = CsrMatrix::from(&coo);
        let m = ExpressionMatrix::from_cell_major_csr(
            &csr,
            labels("g", 2),
            labels("c", 3),
            ValueScale::RawCounts,
        )
        .unwrap();
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.n_columns(), 3);
        assert_eq!(m.values()[[0, 0]], 5.0);
        assert_eq!(m.values()[[1, 2]], 7.0);
        assert_eq!(m.to_csr().nnz(), 3);
    }

    #[test]
    fn test_subset_genes_unknown() {
        let m = ExpressionMatrix::new(
            array![[1.0, 2.0], [3.0, 4.0]],
            labels("g", 2),
            labels("c", 2),
            ValueScale::RawCounts,
        )
        .unwrap();
        let sub = m.subset_genes(&["g1"]).unwrap();
        assert_eq!(sub.values()[[0, 1]], 4.0);
        assert!(matches!(
            m.subset_genes(&["nope"]),
            Err(Error::UnknownGene { .. })
        ));
    }

    #[test]
    fn test_subset_columns_and_row_lookup() {
        let m = ExpressionMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            labels("g", 2),
            labels("c", 3),
            ValueScale::LogNormalized,
        )
        .unwrap();
        let sub = m.subset_columns(&[2, 0]).unwrap();
        assert_eq!(sub.columns(), &["c2".to_string(), "c0".to_string()]);
        assert_eq!(sub.row_by_name("g1").unwrap().to_vec(), vec![6.0, 4.0]);
        assert_eq!(sub.scale(), ValueScale::LogNormalized);
        assert!(m.subset_columns(&[3]).is_err());
        assert!(matches!(m.row_by_name("g9"), Err(Error::UnknownGene { .. })));
    }
}
