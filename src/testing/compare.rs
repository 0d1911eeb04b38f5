//! Keyed join of two differential expression tables.
//!
//! Typically one table comes from single cells and one from pseudobulk
//! samples of the same two groups. Differences in significance between the
//! two are expected (single-cell tests treat correlated cells as independent
//! replicates); the join only lines the tables up by gene and counts where
//! they disagree.

use super::de::{DeRow, DeTable};
use crate::error::{Error, Result};
use log::warn;
use std::collections::{HashMap, HashSet};

/// What to do with genes present in only one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Any gene missing from the other table is an error.
    #[default]
    Fail,
    /// Keep shared genes, report the rest as dropped.
    InnerJoinDrop,
}

#[derive(Debug, Clone)]
pub struct JoinedRow {
    pub gene: String,
    pub left: DeRow,
    pub right: DeRow,
}

#[derive(Debug, Clone)]
pub struct JoinedResults {
    /// Shared genes in the left table's order.
    pub rows: Vec<JoinedRow>,
    pub dropped_left: Vec<String>,
    pub dropped_right: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonSummary {
    pub n_shared: usize,
    pub significant_both: usize,
    pub significant_left_only: usize,
    pub significant_right_only: usize,
    /// Genes significant in both tables with effects of the same sign.
    pub same_direction: usize,
}

/// Join two result tables by gene under `policy`.
pub fn join_results(left: &DeTable, right: &DeTable, policy: JoinPolicy) -> Result<JoinedResults> {
    let right_rows: HashMap<&str, &DeRow> = right.rows.iter().map(|r| (r.gene.as_str(), r)).collect();
    let left_genes: HashSet<&str> = left.rows.iter().map(|r| r.gene.as_str()).collect();

    let mut rows = Vec::new();
    let mut dropped_left = Vec::new();
    for l in &left.rows {
        match right_rows.get(l.gene.as_str()) {
            Some(r) => rows.push(JoinedRow {
                gene: l.gene.clone(),
                left: l.clone(),
                right: (*r).clone(),
            }),
            None => dropped_left.push(l.gene.clone()),
        }
    }
    let dropped_right: Vec<String> = right
        .rows
        .iter()
        .filter(|r| !left_genes.contains(r.gene.as_str()))
        .map(|r| r.gene.clone())
        .collect();

    if !dropped_left.is_empty() || !dropped_right.is_empty() {
        match policy {
            JoinPolicy::Fail => {
                let example = dropped_left.first().or(dropped_right.first()).cloned().unwrap_or_default();
                return Err(Error::invalid(format!(
                    "tables disagree on {} gene(s) (e.g. '{}')",
                    dropped_left.len() + dropped_right.len(),
                    example
                )));
            }
            JoinPolicy::InnerJoinDrop => warn!(
                "Join dropped {} gene(s) only in the left table and {} only in the right",
                dropped_left.len(),
                dropped_right.len()
            ),
        }
    }

    Ok(JoinedResults {
        rows,
        dropped_left,
        dropped_right,
    })
}

impl JoinedResults {
    /// Count agreement at adjusted p-value threshold `alpha`.
    pub fn summary(&self, alpha: f64) -> ComparisonSummary {
        let mut summary = ComparisonSummary {
            n_shared: self.rows.len(),
            significant_both: 0,
            significant_left_only: 0,
            significant_right_only: 0,
            same_direction: 0,
        };
        for row in &self.rows {
            let l = row.left.p_val_adj < alpha;
            let r = row.right.p_val_adj < alpha;
            match (l, r) {
                (true, true) => {
                    summary.significant_both += 1;
                    if row.left.avg_log2fc.signum() == row.right.avg_log2fc.signum() {
                        summary.same_direction += 1;
                    }
                }
                (true, false) => summary.significant_left_only += 1,
                (false, true) => summary.significant_right_only += 1,
                (false, false) => {}
            }
        }
        summary
    }
}
