//! Cell-cycle phase scoring.
//!
//! Cells are scored for S-phase and G2/M marker sets with
//! [`score_signatures`](super::signature::score_signatures) and assigned the
//! phase with the highest positive score. Cells with no positive score are
//! labeled with a sentinel (G1 by default).

use super::signature::{SignatureParams, SignatureScores, score_signatures};
use crate::data::{Column, ExpressionMatrix, GeneSet, MetadataUpdate};
use crate::error::Result;
use crate::fields;
use log::info;
use std::collections::HashMap;

const S_SET: &str = "S";
const G2M_SET: &str = "G2M";

/// S-phase markers from Tirosh et al. (2016).
pub const TIROSH_S_GENES: [&str; 43] = [
    "MCM5", "PCNA", "TYMS", "FEN1", "MCM2", "MCM4", "RRM1", "UNG", "GINS2", "MCM6", "CDCA7",
    "DTL", "PRIM1", "UHRF1", "MLF1IP", "HELLS", "RFC2", "RPA2", "NASP", "RAD51AP1", "GMNN",
    "WDR76", "SLBP", "CCNE2", "UBR7", "POLD3", "MSH2", "ATAD2", "RAD51", "RRM2", "CDC45",
    "CDC6", "EXO1", "TIPIN", "DSCC1", "BLM", "CASP8AP2", "USP1", "CLSPN", "POLA1", "CHAF1B",
    "BRIP1", "E2F8",
];

/// G2/M-phase markers from Tirosh et al. (2016).
pub const TIROSH_G2M_GENES: [&str; 54] = [
    "HMGB2", "CDK1", "NUSAP1", "UBE2C", "BIRC5", "TPX2", "TOP2A", "NDC80", "CKS2", "NUF2",
    "CKS1B", "MKI67", "TMPO", "CENPF", "TACC3", "FAM64A", "SMC4", "CCNB2", "CKAP2L", "CKAP2",
    "AURKB", "BUB1", "KIF11", "ANP32E", "TUBB4B", "GTSE1", "KIF20B", "HJURP", "CDCA3", "HN1",
    "CDC20", "TTK", "CDC25C", "KIF2C", "RANGAP1", "NCAPD2", "DLGAP5", "CDCA2", "CDCA8", "ECT2",
    "KIF23", "HMMR", "AURKA", "PSRC1", "ANLN", "LBR", "CKAP5", "CENPE", "CTCF", "NEK2", "G2E3",
    "GAS2L3", "CBX5", "CENPA",
];

pub fn tirosh_s_genes() -> Vec<String> {
    TIROSH_S_GENES.iter().map(|g| g.to_string()).collect()
}

pub fn tirosh_g2m_genes() -> Vec<String> {
    TIROSH_G2M_GENES.iter().map(|g| g.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct CellCycleParams {
    pub signature: SignatureParams,
    /// A phase is only assigned when its score exceeds this value.
    pub threshold: f64,
    /// Label for cells with no score above the threshold.
    pub sentinel: String,
    /// Metadata field receiving the phase labels.
    pub phase_field: String,
}

impl Default for CellCycleParams {
    fn default() -> Self {
        CellCycleParams {
            signature: SignatureParams::default(),
            threshold: 0.0,
            sentinel: "G1".to_string(),
            phase_field: fields::PHASE.to_string(),
        }
    }
}

impl CellCycleParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.signature.seed = Some(seed);
        self
    }

    pub fn with_signature(mut self, signature: SignatureParams) -> Self {
        self.signature = signature;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CellCycleScores {
    pub s_score: Vec<f64>,
    pub g2m_score: Vec<f64>,
    pub phase: Vec<String>,
    pub phase_field: String,
    pub signature: SignatureScores,
}

impl CellCycleScores {
    /// `S.Score - G2M.Score`, the covariate used to keep the cycling versus
    /// non-cycling signal while removing S/G2M differences.
    pub fn cc_difference(&self) -> Vec<f64> {
        self.s_score
            .iter()
            .zip(&self.g2m_score)
            .map(|(s, g)| s - g)
            .collect()
    }

    /// Number of cells per phase label.
    pub fn phase_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for label in &self.phase {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// `S.Score`, `G2M.Score`, the phase field and `CC.Difference`.
    pub fn metadata_update(&self) -> MetadataUpdate {
        let mut update = self.signature.metadata_update();
        update.push(&self.phase_field, Column::Categorical(self.phase.clone()));
        update.push(fields::CC_DIFFERENCE, Column::Numeric(self.cc_difference()));
        update
    }
}

/// Score S and G2/M activity for every cell and assign a phase.
///
/// On an exact tie between the two scores the cell is labeled S.
pub fn score_cell_cycle<S: AsRef<str>>(
    matrix: &ExpressionMatrix,
    s_genes: &[S],
    g2m_genes: &[S],
    params: &CellCycleParams,
) -> Result<CellCycleScores> {
    let sets = vec![GeneSet::new(S_SET, s_genes)?, GeneSet::new(G2M_SET, g2m_genes)?];
    let signature = score_signatures(matrix, &sets, &params.signature)?;
    let phase = signature.classify(&[S_SET, G2M_SET], params.threshold, &params.sentinel)?;

    let s_score = signature.scores_for(S_SET)?.to_vec();
    let g2m_score = signature.scores_for(G2M_SET)?.to_vec();

    let scores = CellCycleScores {
        s_score,
        g2m_score,
        phase,
        phase_field: params.phase_field.clone(),
        signature,
    };
    info!("Cell-cycle phases: {:?}", scores.phase_counts());
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellMetadata, ValueScale};
    use ndarray::Array2;

    /// 40 background genes plus 4 S markers and 4 G2M markers; cells 0-1 are
    /// S-phase, 2-3 G2M, 4-5 quiescent. With two bins every marker shares the
    /// upper bin with the brighter half of the background.
    fn cycling_matrix() -> ExpressionMatrix {
        let mut genes: Vec<String> = (0..40).map(|g| format!("BG{}", g)).collect();
        genes.extend(["MCM5", "PCNA", "TYMS", "FEN1"].iter().map(|g| g.to_string()));
        genes.extend(["CDK1", "TOP2A", "MKI67", "BIRC5"].iter().map(|g| g.to_string()));
        let n_cells = 6;
        let values = Array2::from_shape_fn((genes.len(), n_cells), |(g, c)| {
            if g < 40 {
                1.0 + (g % 5) as f64 * 0.2
            } else if g < 44 {
                if c < 2 { 3.0 } else { 1.2 }
            } else if (2..4).contains(&c) {
                3.0
            } else {
                1.2
            }
        });
        ExpressionMatrix::new(
            values,
            genes,
            (0..n_cells).map(|c| format!("cell{}", c)).collect(),
            ValueScale::LogNormalized,
        )
        .unwrap()
    }

    fn two_bins(seed: u64) -> SignatureParams {
        SignatureParams::default().with_bins(2).with_seed(seed)
    }

    #[test]
    fn test_phase_assignment() {
        let m = cycling_matrix();
        let params = CellCycleParams::default().with_signature(two_bins(7));
        let scores = score_cell_cycle(&m, &tirosh_s_genes(), &tirosh_g2m_genes(), &params).unwrap();

        assert_eq!(scores.phase[0], "S");
        assert_eq!(scores.phase[1], "S");
        assert_eq!(scores.phase[2], "G2M");
        assert_eq!(scores.phase[3], "G2M");
        assert_eq!(scores.phase[4], "G1");
        assert_eq!(scores.phase[5], "G1");

        // Most of the Tirosh markers are absent from this toy matrix.
        assert_eq!(scores.signature.n_missing(), 43 - 4 + 54 - 4);

        for (cell, label) in scores.phase.iter().enumerate() {
            let (s, g) = (scores.s_score[cell], scores.g2m_score[cell]);
            match label.as_str() {
                "S" => assert!(s >= g && s > 0.0),
                "G2M" => assert!(g > s && g > 0.0),
                _ => assert!(s <= 0.0 && g <= 0.0),
            }
        }
    }

    #[test]
    fn test_metadata_update_fields() {
        let m = cycling_matrix();
        let scores = score_cell_cycle(
            &m,
            &tirosh_s_genes(),
            &tirosh_g2m_genes(),
            &CellCycleParams::default().with_signature(two_bins(1)),
        )
        .unwrap();
        let md = CellMetadata::new(m.columns().to_vec()).unwrap();
        let md = scores.metadata_update().apply(&md).unwrap();
        assert!(md.numeric(fields::S_SCORE).is_ok());
        assert!(md.numeric(fields::G2M_SCORE).is_ok());
        assert!(md.categorical(fields::PHASE).is_ok());
        assert!(md.numeric(fields::CC_DIFFERENCE).is_ok());

        // Annotating twice must not silently overwrite.
        assert!(scores.metadata_update().apply(&md).is_err());
    }
}
