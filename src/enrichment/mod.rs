//! Gene set scoring for single-cell data.
//!
//! ## Available Methods
//!
//! - **Signature scores** (`signature`): per-cell module scores against
//!   expression-matched random control genes, with optional classification
//!   across an exclusive family of gene sets
//! - **Cell-cycle scoring** (`cell_cycle`): S and G2/M scores and phase labels
//!   built on signature scores, with the Tirosh et al. marker panels

pub mod cell_cycle;
pub mod signature;

pub use cell_cycle::{
    CellCycleParams, CellCycleScores, TIROSH_G2M_GENES, TIROSH_S_GENES, score_cell_cycle,
    tirosh_g2m_genes, tirosh_s_genes,
};
pub use signature::{SignatureParams, SignatureScores, score_signatures};
