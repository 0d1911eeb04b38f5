//! Stable field names shared with downstream consumers.
//!
//! Reporting and comparison code joins tables on these strings, so they must
//! never change.

pub const S_SCORE: &str = "S.Score";
pub const G2M_SCORE: &str = "G2M.Score";
pub const PHASE: &str = "Phase";
pub const CC_DIFFERENCE: &str = "CC.Difference";

pub const P_VAL: &str = "p_val";
pub const P_VAL_ADJ: &str = "p_val_adj";
pub const AVG_LOG2FC: &str = "avg_log2FC";
pub const PCT_1: &str = "pct.1";
pub const PCT_2: &str = "pct.2";

pub const N_CELLS: &str = "n_cells";

/// Suffix appended to a gene set name to form its score field.
pub const SCORE_SUFFIX: &str = ".Score";

/// Score field name for a gene set, e.g. `"S"` becomes `"S.Score"`.
pub fn score_field(set_name: &str) -> String {
    format!("{}{}", set_name, SCORE_SUFFIX)
}
