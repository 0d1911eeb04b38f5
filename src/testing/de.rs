//! Differential expression between two groups of columns.
//!
//! Columns are cells or pseudobulk samples. Group membership comes from a
//! categorical metadata field; every selected gene is tested independently
//! with one backend, raw p-values are corrected across the genes tested in
//! this run, and the rows are ranked by adjusted p-value.

use super::correction::Correction;
use super::effect::{avg_log2_fold_change, fraction_expressed};
use super::inference::backend_for;
use super::utils::get_group_indices;
use super::{TestMethod, TestResult};
use crate::data::{CellMetadata, ExpressionMatrix};
use crate::error::{BackendError, Error, Result};
use crate::fields;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct DeParams {
    /// Categorical metadata field holding group labels.
    pub group_by: String,
    /// Labels forming group 1.
    pub ident_1: Vec<String>,
    /// Labels forming group 2; `None` compares against all other columns.
    pub ident_2: Option<Vec<String>>,
    pub method: TestMethod,
    pub correction: Correction,
    /// Genes to test; `None` tests every gene in the matrix.
    pub genes: Option<Vec<String>>,
    /// Keep only genes higher in group 1.
    pub only_pos: bool,
    /// Skip genes detected in fewer than this fraction of columns in both groups.
    pub min_pct: f64,
    /// Skip genes whose absolute log2 fold change, as the chosen backend
    /// reports it, is below this.
    pub logfc_threshold: f64,
}

impl DeParams {
    pub fn new<S: AsRef<str>>(group_by: &str, ident_1: &[S]) -> Self {
        DeParams {
            group_by: group_by.to_string(),
            ident_1: to_strings(ident_1),
            ident_2: None,
            method: TestMethod::default(),
            correction: Correction::default(),
            genes: None,
            only_pos: false,
            min_pct: 0.0,
            logfc_threshold: 0.0,
        }
    }

    pub fn with_ident_2<S: AsRef<str>>(mut self, ident_2: &[S]) -> Self {
        self.ident_2 = Some(to_strings(ident_2));
        self
    }

    pub fn with_method(mut self, method: TestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_correction(mut self, correction: Correction) -> Self {
        self.correction = correction;
        self
    }

    pub fn with_genes<S: AsRef<str>>(mut self, genes: &[S]) -> Self {
        self.genes = Some(to_strings(genes));
        self
    }

    pub fn only_pos(mut self, only_pos: bool) -> Self {
        self.only_pos = only_pos;
        self
    }

    pub fn with_min_pct(mut self, min_pct: f64) -> Self {
        self.min_pct = min_pct;
        self
    }

    pub fn with_logfc_threshold(mut self, threshold: f64) -> Self {
        self.logfc_threshold = threshold;
        self
    }
}

fn to_strings<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}

/// One tested gene.
#[derive(Debug, Clone, PartialEq)]
pub struct DeRow {
    pub gene: String,
    pub avg_log2fc: f64,
    pub p_val: f64,
    pub p_val_adj: f64,
    pub pct_1: f64,
    pub pct_2: f64,
    /// Backend test statistic (U, t, or likelihood ratio).
    pub statistic: f64,
}

impl DeRow {
    /// Value of a numeric column by its stable field name.
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            fields::AVG_LOG2FC => Some(self.avg_log2fc),
            fields::P_VAL => Some(self.p_val),
            fields::P_VAL_ADJ => Some(self.p_val_adj),
            fields::PCT_1 => Some(self.pct_1),
            fields::PCT_2 => Some(self.pct_2),
            _ => None,
        }
    }
}

/// A gene the backend could not test.
#[derive(Debug, Clone, PartialEq)]
pub struct OmittedGene {
    pub gene: String,
    pub reason: String,
}

/// Ranked differential expression results.
#[derive(Debug, Clone)]
pub struct DeTable {
    pub method: &'static str,
    pub correction: Correction,
    pub group1: String,
    pub group2: String,
    pub n_group1: usize,
    pub n_group2: usize,
    /// Ascending adjusted p-value, then descending absolute effect.
    pub rows: Vec<DeRow>,
    /// Genes whose p-values entered the correction.
    pub n_tested: usize,
    /// Genes the backend failed on; never present in `rows`.
    pub omitted: Vec<OmittedGene>,
    /// Genes skipped by `min_pct` or `logfc_threshold` before testing.
    pub n_filtered: usize,
    /// Requested genes absent from the matrix.
    pub missing_genes: Vec<String>,
}

impl DeTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn genes(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.gene.as_str()).collect()
    }

    pub fn get(&self, gene: &str) -> Option<&DeRow> {
        self.rows.iter().find(|r| r.gene == gene)
    }

    pub fn n_omitted(&self) -> usize {
        self.omitted.len()
    }

    /// Whole numeric column by stable field name (`"p_val"`, `"p_val_adj"`,
    /// `"avg_log2FC"`, `"pct.1"`, `"pct.2"`), in row order.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        self.rows
            .iter()
            .map(|r| {
                r.field(name).ok_or_else(|| Error::UnknownIdentifier {
                    kind: "result field",
                    name: name.to_string(),
                })
            })
            .collect()
    }
}

enum GeneOutcome {
    Tested(DeRow),
    Filtered,
    Omitted(OmittedGene),
}

/// Compare every selected gene between the two groups described by `params`.
///
/// # Errors
///
/// * `UnknownIdentifier` for a missing `group_by` field or group label
/// * `EmptyGroup` if either side resolves to no columns
/// * `InvalidInput` for overlapping label sets, or when no requested gene is
///   present in the matrix
/// * `UnsupportedInput` / `Backend` when the backend cannot run on this input
///
/// Genes the backend fails on are omitted from the table and listed in
/// `omitted`; they do not abort the run.
pub fn differential_expression(
    matrix: &ExpressionMatrix,
    metadata: &CellMetadata,
    params: &DeParams,
) -> Result<DeTable> {
    let metadata = metadata.aligned_to(matrix.columns())?;
    let labels = metadata.categorical(&params.group_by)?;
    let groups = get_group_indices(labels, &params.ident_1, params.ident_2.as_deref())?;

    let (gene_indices, missing_genes) = resolve_genes(matrix, params.genes.as_deref());
    if !missing_genes.is_empty() {
        warn!(
            "{} requested gene(s) not in the matrix, skipping: {:?}",
            missing_genes.len(),
            missing_genes
        );
    }
    if gene_indices.is_empty() {
        return Err(Error::invalid("none of the requested genes are in the matrix"));
    }

    let backend = backend_for(params.method, matrix, &groups.group1, &groups.group2)?;
    let scale = matrix.scale();
    debug!(
        "Testing {} genes with '{}': {} ({} columns) vs {} ({} columns)",
        gene_indices.len(),
        backend.name(),
        groups.name1,
        groups.group1.len(),
        groups.name2,
        groups.group2.len()
    );

    let outcomes: Vec<GeneOutcome> = gene_indices
        .par_iter()
        .map(|&g| {
            let gene = &matrix.genes()[g];
            let values1 = matrix.gather(g, &groups.group1);
            let values2 = matrix.gather(g, &groups.group2);
            let pct_1 = fraction_expressed(&values1);
            let pct_2 = fraction_expressed(&values2);

            if params.min_pct > 0.0 && pct_1.max(pct_2) < params.min_pct {
                return GeneOutcome::Filtered;
            }
            if params.logfc_threshold > 0.0 {
                let fc = backend
                    .fold_change(&values1, &values2)
                    .unwrap_or_else(|| avg_log2_fold_change(&values1, &values2, scale));
                if fc.abs() < params.logfc_threshold {
                    return GeneOutcome::Filtered;
                }
            }

            match backend.test(&values1, &values2).and_then(check_result) {
                Ok(result) => GeneOutcome::Tested(DeRow {
                    gene: gene.clone(),
                    avg_log2fc: result
                        .effect_size
                        .unwrap_or_else(|| avg_log2_fold_change(&values1, &values2, scale)),
                    p_val: result.p_value,
                    p_val_adj: result.p_value,
                    pct_1,
                    pct_2,
                    statistic: result.statistic,
                }),
                Err(e) => GeneOutcome::Omitted(OmittedGene {
                    gene: gene.clone(),
                    reason: e.to_string(),
                }),
            }
        })
        .collect();

    let mut rows = Vec::with_capacity(outcomes.len());
    let mut omitted = Vec::new();
    let mut n_filtered = 0;
    for outcome in outcomes {
        match outcome {
            GeneOutcome::Tested(row) => rows.push(row),
            GeneOutcome::Filtered => n_filtered += 1,
            GeneOutcome::Omitted(gene) => omitted.push(gene),
        }
    }
    if !omitted.is_empty() {
        warn!(
            "{} gene(s) could not be tested by '{}' and were omitted",
            omitted.len(),
            backend.name()
        );
    }

    // Correction always covers exactly the genes tested in this run.
    let raw: Vec<f64> = rows.iter().map(|r| r.p_val).collect();
    let adjusted = params
        .correction
        .adjust(&raw)
        .map_err(|e| Error::Backend {
            backend: backend.name(),
            source: e.into(),
        })?;
    for (row, adj) in rows.iter_mut().zip(adjusted) {
        row.p_val_adj = adj;
    }
    let n_tested = rows.len();

    if params.only_pos {
        rows.retain(|r| r.avg_log2fc > 0.0);
    }
    rows.sort_by(|a, b| {
        a.p_val_adj
            .total_cmp(&b.p_val_adj)
            .then_with(|| b.avg_log2fc.abs().total_cmp(&a.avg_log2fc.abs()))
    });

    info!(
        "DE {} vs {} ({}): {} tested, {} reported, {} filtered, {} omitted",
        groups.name1,
        groups.name2,
        backend.name(),
        n_tested,
        rows.len(),
        n_filtered,
        omitted.len()
    );

    Ok(DeTable {
        method: backend.name(),
        correction: params.correction,
        group1: groups.name1,
        group2: groups.name2,
        n_group1: groups.group1.len(),
        n_group2: groups.group2.len(),
        rows,
        n_tested,
        omitted,
        n_filtered,
        missing_genes,
    })
}

fn check_result(result: TestResult<f64>) -> std::result::Result<TestResult<f64>, BackendError> {
    if !(0.0..=1.0).contains(&result.p_value) {
        return Err(BackendError::Numerical {
            reason: format!("p-value {} outside [0, 1]", result.p_value),
        });
    }
    if result.effect_size.is_some_and(|e| e.is_nan()) {
        return Err(BackendError::Numerical {
            reason: "effect size is NaN".to_string(),
        });
    }
    Ok(result)
}

/// Row indices of the requested genes (first occurrence wins) and the names
/// not found in the matrix.
fn resolve_genes(matrix: &ExpressionMatrix, genes: Option<&[String]>) -> (Vec<usize>, Vec<String>) {
    let Some(genes) = genes else {
        return ((0..matrix.n_genes()).collect(), Vec::new());
    };
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for gene in genes {
        if !seen.insert(gene.as_str()) {
            continue;
        }
        match matrix.gene_index(gene) {
            Some(i) => found.push(i),
            None => missing.push(gene.clone()),
        }
    }
    (found, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, ValueScale};
    use crate::testing::TTestType;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    /// 12 cells in clusters a (0-3), b (4-7), c (8-11); gene UP is high in a,
    /// DOWN is low in a, FLAT is constant, NOISE varies without pattern.
    fn setup() -> (ExpressionMatrix, CellMetadata) {
        let genes = ["UP", "DOWN", "FLAT", "NOISE"];
        let values = Array2::from_shape_fn((4, 12), |(g, c)| match g {
            0 => {
                if c < 4 { 3.0 + 0.1 * c as f64 } else { 0.2 * (c % 2) as f64 }
            }
            1 => {
                if c < 4 { 0.0 } else { 2.0 + 0.05 * c as f64 }
            }
            2 => 1.0,
            _ => [0.5, 1.5, 0.0, 1.0][c % 4] + 0.01 * c as f64,
        });
        let cells: Vec<String> = (0..12).map(|c| format!("cell{}", c)).collect();
        let m = ExpressionMatrix::new(
            values,
            genes.iter().map(|g| g.to_string()).collect(),
            cells.clone(),
            ValueScale::LogNormalized,
        )
        .unwrap();
        let clusters = (0..12).map(|c| ["a", "b", "c"][c / 4].to_string()).collect();
        let md = CellMetadata::new(cells)
            .unwrap()
            .with_field("cluster", Column::Categorical(clusters))
            .unwrap();
        (m, md)
    }

    #[test]
    fn test_marker_ranking() {
        let (m, md) = setup();
        let table = differential_expression(&m, &md, &DeParams::new("cluster", &["a"])).unwrap();
        assert_eq!(table.n_tested, 4);
        assert_eq!(table.n_group1, 4);
        assert_eq!(table.n_group2, 8);
        assert_eq!(table.group2, "rest");

        let up = table.get("UP").unwrap();
        assert!(up.avg_log2fc > 0.0);
        assert_eq!(up.pct_1, 1.0);
        let down = table.get("DOWN").unwrap();
        assert!(down.avg_log2fc < 0.0);
        let flat = table.get("FLAT").unwrap();
        assert_eq!(flat.p_val, 1.0);
        assert_abs_diff_eq!(flat.avg_log2fc, 0.0, epsilon = 1e-12);

        let adj = table.column(fields::P_VAL_ADJ).unwrap();
        assert!(adj.windows(2).all(|w| w[0] <= w[1]));
        assert!(table.column("nope").is_err());
    }

    #[test]
    fn test_only_pos_is_subset() {
        let (m, md) = setup();
        let all = differential_expression(&m, &md, &DeParams::new("cluster", &["a"])).unwrap();
        let pos = differential_expression(&m, &md, &DeParams::new("cluster", &["a"]).only_pos(true)).unwrap();
        assert!(pos.len() < all.len());
        for row in &pos.rows {
            assert!(row.avg_log2fc > 0.0);
            assert_eq!(all.get(&row.gene), Some(row));
        }
        let expected = all.rows.iter().filter(|r| r.avg_log2fc > 0.0).count();
        assert_eq!(pos.len(), expected);
    }

    #[test]
    fn test_rest_matches_explicit_complement() {
        let (m, md) = setup();
        let rest = differential_expression(&m, &md, &DeParams::new("cluster", &["b"])).unwrap();
        let explicit = differential_expression(
            &m,
            &md,
            &DeParams::new("cluster", &["b"]).with_ident_2(&["a", "c"]),
        )
        .unwrap();
        assert_eq!(rest.genes(), explicit.genes());
        assert_eq!(rest.column(fields::P_VAL).unwrap(), explicit.column(fields::P_VAL).unwrap());
    }

    #[test]
    fn test_gene_subset_and_missing() {
        let (m, md) = setup();
        let params = DeParams::new("cluster", &["a"]).with_genes(&["UP", "GHOST", "UP"]);
        let table = differential_expression(&m, &md, &params).unwrap();
        assert_eq!(table.n_tested, 1);
        assert_eq!(table.missing_genes, vec!["GHOST".to_string()]);
        // Bonferroni over a single gene leaves the p-value unchanged.
        let up = table.get("UP").unwrap();
        assert_abs_diff_eq!(up.p_val_adj, up.p_val, epsilon = 1e-15);

        let none = DeParams::new("cluster", &["a"]).with_genes(&["GHOST"]);
        assert!(matches!(
            differential_expression(&m, &md, &none),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_prefilters() {
        let (m, md) = setup();
        let params = DeParams::new("cluster", &["a"]).with_logfc_threshold(0.25);
        let table = differential_expression(&m, &md, &params).unwrap();
        assert!(table.get("FLAT").is_none());
        assert!(table.n_filtered >= 1);
        assert_eq!(table.n_tested + table.n_filtered + table.n_omitted(), 4);
    }

    #[test]
    fn test_adjustment_depends_on_genes_tested() {
        let (m, md) = setup();
        let full = differential_expression(&m, &md, &DeParams::new("cluster", &["a"])).unwrap();
        let subset = differential_expression(
            &m,
            &md,
            &DeParams::new("cluster", &["a"]).with_genes(&["UP", "DOWN"]),
        )
        .unwrap();
        assert_eq!(full.n_tested, 4);
        assert_eq!(subset.n_tested, 2);

        let in_full = full.get("UP").unwrap();
        let in_subset = subset.get("UP").unwrap();
        assert_eq!(in_full.p_val, in_subset.p_val);
        assert!(in_full.p_val * 4.0 < 1.0);
        assert_abs_diff_eq!(in_full.p_val_adj, in_full.p_val * 4.0, epsilon = 1e-15);
        assert_abs_diff_eq!(in_subset.p_val_adj, in_subset.p_val * 2.0, epsilon = 1e-15);
        assert!(in_subset.p_val_adj < in_full.p_val_adj);
    }

    #[test]
    fn test_count_prefilter_uses_normalized_fold_change() {
        // Group 1 is sequenced twice as deep. A and B only follow depth; C
        // is truly up in group 1.
        let m = ExpressionMatrix::new(
            ndarray::array![
                [20.0, 20.0, 10.0, 10.0],
                [40.0, 40.0, 20.0, 20.0],
                [80.0, 80.0, 10.0, 10.0]
            ],
            vec!["A".into(), "B".into(), "C".into()],
            (0..4).map(|c| format!("s{}", c)).collect(),
            ValueScale::RawCounts,
        )
        .unwrap();
        let md = CellMetadata::new(m.columns().to_vec())
            .unwrap()
            .with_field(
                "condition",
                Column::Categorical(vec!["deep".into(), "deep".into(), "shallow".into(), "shallow".into()]),
            )
            .unwrap();
        let params = DeParams::new("condition", &["deep"])
            .with_method(TestMethod::NegativeBinomial)
            .with_logfc_threshold(0.5);
        let table = differential_expression(&m, &md, &params).unwrap();

        // Raw means would put A and B near log2FC 0.95 and keep them.
        assert_eq!(table.n_filtered, 2);
        assert!(table.get("A").is_none() && table.get("B").is_none());
        assert_eq!(table.n_tested + table.n_omitted(), 1);
        if let Some(c) = table.get("C") {
            assert_abs_diff_eq!(c.avg_log2fc, 1.9625697249326146, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_group_errors() {
        let (m, md) = setup();
        assert!(matches!(
            differential_expression(&m, &md, &DeParams::new("cluster", &["z"])),
            Err(Error::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            differential_expression(&m, &md, &DeParams::new("donor", &["a"])),
            Err(Error::UnknownIdentifier { .. })
        ));
        let everything = DeParams::new("cluster", &["a", "b", "c"]);
        assert!(matches!(
            differential_expression(&m, &md, &everything),
            Err(Error::EmptyGroup { .. })
        ));
    }

    #[test]
    fn test_t_test_omits_untestable_genes() {
        let (m, md) = setup();
        // One column per group side is too few for a t-test: every gene is
        // omitted rather than reported with a made-up p-value.
        let md = md
            .replace_field(
                "cluster",
                Column::Categorical(
                    (0..12)
                        .map(|c| match c {
                            0 => "x".to_string(),
                            1 => "y".to_string(),
                            _ => "z".to_string(),
                        })
                        .collect(),
                ),
            )
            .unwrap();
        let params = DeParams::new("cluster", &["x"])
            .with_ident_2(&["y"])
            .with_method(TestMethod::TTest(TTestType::Welch));
        let table = differential_expression(&m, &md, &params).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.n_omitted(), 4);
        assert_eq!(table.n_tested, 0);
    }
}
