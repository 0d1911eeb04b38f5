//! Binned control-gene background following the module score of Tirosh et al. (2016),
//! as popularized by Seurat's AddModuleScore.

use crate::data::{Column, ExpressionMatrix, GeneSet, MetadataUpdate, ValueScale};
use crate::error::{Error, Result};
use crate::fields;
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

/// Parameters for gene set scoring.
#[derive(Debug, Clone)]
pub struct SignatureParams {
    /// Number of equal-count expression bins used to match control genes.
    pub n_bins: usize,
    /// Control genes drawn per target gene from its bin. `None` uses
    /// `ceil(100 / n_bins)`.
    pub controls_per_gene: Option<usize>,
    /// Seed for control sampling. Without a seed, repeated runs draw different
    /// controls and scores vary slightly between runs.
    pub seed: Option<u64>,
}

impl Default for SignatureParams {
    fn default() -> Self {
        SignatureParams {
            n_bins: 24,
            controls_per_gene: None,
            seed: None,
        }
    }
}

impl SignatureParams {
    pub fn with_bins(mut self, n_bins: usize) -> Self {
        self.n_bins = n_bins;
        self
    }

    pub fn with_controls_per_gene(mut self, controls: usize) -> Self {
        self.controls_per_gene = Some(controls);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn controls(&self) -> usize {
        self.controls_per_gene
            .unwrap_or_else(|| 100usize.div_ceil(self.n_bins.max(1)))
    }
}

/// Per-cell scores for a list of gene sets.
#[derive(Debug, Clone)]
pub struct SignatureScores {
    pub cells: Vec<String>,
    pub set_names: Vec<String>,
    /// Cells x gene sets.
    pub scores: Array2<f64>,
    /// Requested genes absent from the matrix, per gene set (skipped, not fatal).
    pub missing_genes: Vec<(String, Vec<String>)>,
    /// Number of distinct control genes used per gene set.
    pub n_controls: Vec<usize>,
}

impl SignatureScores {
    pub fn set_index(&self, name: &str) -> Option<usize> {
        self.set_names.iter().position(|n| n == name)
    }

    pub fn scores_for(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.set_index(name)
            .map(|idx| self.scores.column(idx))
            .ok_or_else(|| Error::UnknownIdentifier {
                kind: "gene set",
                name: name.to_string(),
            })
    }

    /// Total number of requested genes that were skipped.
    pub fn n_missing(&self) -> usize {
        self.missing_genes.iter().map(|(_, g)| g.len()).sum()
    }

    /// One numeric `"<set>.Score"` field per gene set.
    pub fn metadata_update(&self) -> MetadataUpdate {
        let mut update = MetadataUpdate::default();
        for (idx, name) in self.set_names.iter().enumerate() {
            update.push(
                &fields::score_field(name),
                Column::Numeric(self.scores.column(idx).to_vec()),
            );
        }
        update
    }

    /// Label every cell with the family member scoring highest, or `sentinel`
    /// when no member scores above `threshold`.
    ///
    /// Exact ties go to the member listed first in `family`.
    pub fn classify<S: AsRef<str>>(
        &self,
        family: &[S],
        threshold: f64,
        sentinel: &str,
    ) -> Result<Vec<String>> {
        if family.is_empty() {
            return Err(Error::invalid("classification family is empty"));
        }
        let columns = family
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if name == sentinel {
                    return Err(Error::invalid(format!(
                        "sentinel label '{}' collides with a gene set name",
                        sentinel
                    )));
                }
                self.scores_for(name).map(|s| (name, s))
            })
            .collect::<Result<Vec<_>>>()?;

        let labels = (0..self.cells.len())
            .map(|cell| {
                let mut best = 0;
                for (idx, (_, scores)) in columns.iter().enumerate().skip(1) {
                    if scores[cell] > columns[best].1[cell] {
                        best = idx;
                    }
                }
                let (name, scores) = &columns[best];
                if scores[cell] > threshold {
                    name.to_string()
                } else {
                    sentinel.to_string()
                }
            })
            .collect();
        Ok(labels)
    }
}

/// Score every cell for every gene set against expression-matched controls.
///
/// Genes are ranked by mean expression and cut into `n_bins` equal-count bins.
/// For each target gene, controls are sampled without replacement from its bin,
/// excluding the set's own genes; the pooled controls are de-duplicated. A cell's
/// score is the mean over target genes minus the mean over control genes.
///
/// Sampling draws from a single generator in gene-set order, then gene order,
/// so results depend only on the seed.
pub fn score_signatures(
    matrix: &ExpressionMatrix,
    gene_sets: &[GeneSet],
    params: &SignatureParams,
) -> Result<SignatureScores> {
    if matrix.scale() == ValueScale::RawCounts {
        return Err(Error::unsupported(
            "signature scoring expects normalized values, got raw counts",
        ));
    }
    if params.n_bins == 0 {
        return Err(Error::invalid("n_bins must be at least 1"));
    }
    if gene_sets.is_empty() {
        return Err(Error::invalid("no gene sets supplied"));
    }
    let mut names = HashSet::new();
    for set in gene_sets {
        if !names.insert(set.name()) {
            return Err(Error::invalid(format!("duplicate gene set name '{}'", set.name())));
        }
    }

    let bins = ExpressionBins::new(&matrix.gene_means(), params.n_bins);
    let controls_per_gene = params.controls();
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    let n_cells = matrix.n_columns();
    let mut scores = Array2::zeros((n_cells, gene_sets.len()));
    let mut missing_genes = Vec::with_capacity(gene_sets.len());
    let mut n_controls = Vec::with_capacity(gene_sets.len());

    for (set_idx, set) in gene_sets.iter().enumerate() {
        let (targets, missing) = set.resolve(matrix);
        if !missing.is_empty() {
            warn!(
                "Gene set '{}': {} of {} genes not found in the matrix and skipped",
                set.name(),
                missing.len(),
                set.len()
            );
        }
        if targets.is_empty() {
            return Err(Error::invalid(format!(
                "none of the {} genes in set '{}' are present",
                set.len(),
                set.name()
            )));
        }

        let controls = bins.sample_controls(&targets, controls_per_gene, &mut rng);
        if controls.is_empty() {
            return Err(Error::invalid(format!(
                "no control genes available for set '{}'",
                set.name()
            )));
        }
        debug!(
            "Gene set '{}': {} target genes, {} control genes",
            set.name(),
            targets.len(),
            controls.len()
        );

        let target_mean = row_mean(matrix, &targets);
        let control_mean = row_mean(matrix, &controls);
        scores
            .column_mut(set_idx)
            .assign(&(&target_mean - &control_mean));

        missing_genes.push((set.name().to_string(), missing));
        n_controls.push(controls.len());
    }

    Ok(SignatureScores {
        cells: matrix.columns().to_vec(),
        set_names: gene_sets.iter().map(|s| s.name().to_string()).collect(),
        scores,
        missing_genes,
        n_controls,
    })
}

fn row_mean(matrix: &ExpressionMatrix, rows: &[usize]) -> Array1<f64> {
    matrix
        .values()
        .select(Axis(0), rows)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(matrix.n_columns()))
}

/// Equal-count bins of genes ordered by mean expression.
struct ExpressionBins {
    bin_of: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl ExpressionBins {
    fn new(means: &[f64], n_bins: usize) -> Self {
        let n_genes = means.len();
        let n_bins = n_bins.min(n_genes).max(1);
        let mut order: Vec<usize> = (0..n_genes).collect();
        order.sort_by(|&a, &b| means[a].partial_cmp(&means[b]).unwrap_or(Ordering::Equal));

        let mut bin_of = vec![0; n_genes];
        let mut members = vec![Vec::new(); n_bins];
        for (rank, &gene) in order.iter().enumerate() {
            let bin = rank * n_bins / n_genes;
            bin_of[gene] = bin;
            members[bin].push(gene);
        }
        ExpressionBins { bin_of, members }
    }

    fn sample_controls(&self, targets: &[usize], per_gene: usize, rng: &mut StdRng) -> Vec<usize> {
        let target_set: HashSet<usize> = targets.iter().copied().collect();
        let mut controls = BTreeSet::new();
        for &gene in targets {
            let candidates: Vec<usize> = self.members[self.bin_of[gene]]
                .iter()
                .copied()
                .filter(|g| !target_set.contains(g))
                .collect();
            let amount = per_gene.min(candidates.len());
            if amount == 0 {
                continue;
            }
            for pick in rand::seq::index::sample(rng, candidates.len(), amount).iter() {
                controls.insert(candidates[pick]);
            }
        }
        controls.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(n_genes: usize, n_cells: usize) -> ExpressionMatrix {
        let values = Array2::from_shape_fn((n_genes, n_cells), |(g, c)| {
            ((g * 7 + c * 3) % 11) as f64 / 4.0 + g as f64 * 0.01
        });
        ExpressionMatrix::new(
            values,
            (0..n_genes).map(|g| format!("G{}", g)).collect(),
            (0..n_cells).map(|c| format!("C{}", c)).collect(),
            ValueScale::LogNormalized,
        )
        .unwrap()
    }

    #[test]
    fn test_bins_are_equal_count() {
        let means: Vec<f64> = (0..100).map(|i| (100 - i) as f64).collect();
        let bins = ExpressionBins::new(&means, 24);
        let sizes: Vec<usize> = bins.members.iter().map(|m| m.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        assert!(sizes.iter().all(|&s| s == 4 || s == 5));
        // Highest mean lands in the last bin.
        assert_eq!(bins.bin_of[0], 23);
    }

    #[test]
    fn test_controls_exclude_targets() {
        let means: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let bins = ExpressionBins::new(&means, 5);
        let mut rng = StdRng::seed_from_u64(1);
        let targets = vec![0, 1, 2];
        let controls = bins.sample_controls(&targets, 100, &mut rng);
        // Whole first bin minus the targets.
        assert_eq!(controls, (3..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_scores_are_reproducible() {
        let m = matrix(60, 8);
        let sets = vec![GeneSet::new("A", &["G1", "G5", "G9"]).unwrap()];
        let params = SignatureParams::default().with_bins(6).with_seed(42);
        let a = score_signatures(&m, &sets, &params).unwrap();
        let b = score_signatures(&m, &sets, &params).unwrap();
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn test_controls_per_gene_override() {
        let m = matrix(30, 4);
        let sets = vec![GeneSet::new("A", &["G1"]).unwrap()];
        let params = SignatureParams::default()
            .with_bins(5)
            .with_controls_per_gene(2)
            .with_seed(9);
        let scores = score_signatures(&m, &sets, &params).unwrap();
        assert_eq!(scores.n_controls, vec![2]);
    }

    #[test]
    fn test_missing_genes_are_skipped() {
        let m = matrix(30, 4);
        let sets = vec![GeneSet::new("A", &["G1", "NOPE"]).unwrap()];
        let params = SignatureParams::default().with_bins(5).with_seed(3);
        let scores = score_signatures(&m, &sets, &params).unwrap();
        assert_eq!(scores.n_missing(), 1);
        assert_eq!(scores.missing_genes[0].1, vec!["NOPE".to_string()]);

        let none = vec![GeneSet::new("B", &["X", "Y"]).unwrap()];
        assert!(score_signatures(&m, &none, &params).is_err());
    }

    #[test]
    fn test_classify_ties_and_sentinel() {
        let scores = SignatureScores {
            cells: vec!["c1".into(), "c2".into(), "c3".into()],
            set_names: vec!["S".into(), "G2M".into()],
            scores: ndarray::array![[0.5, 0.5], [-0.1, -0.2], [0.1, 0.3]],
            missing_genes: vec![],
            n_controls: vec![1, 1],
        };
        let labels = scores.classify(&["S", "G2M"], 0.0, "G1").unwrap();
        assert_eq!(labels, vec!["S", "G1", "G2M"]);

        let reversed = scores.classify(&["G2M", "S"], 0.0, "G1").unwrap();
        assert_eq!(reversed[0], "G2M");
        assert!(scores.classify(&["S", "M"], 0.0, "G1").is_err());
    }
}
