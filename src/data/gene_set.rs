use crate::data::ExpressionMatrix;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// A named marker panel. Gene order carries no meaning; duplicates are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    name: String,
    genes: Vec<String>,
}

impl GeneSet {
    pub fn new<S: AsRef<str>>(name: &str, genes: &[S]) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::invalid("gene set name cannot be empty"));
        }
        let mut seen = HashSet::new();
        let genes: Vec<String> = genes
            .iter()
            .map(|g| g.as_ref().to_string())
            .filter(|g| seen.insert(g.clone()))
            .collect();
        if genes.is_empty() {
            return Err(Error::invalid(format!("gene set '{}' is empty", name)));
        }
        Ok(GeneSet {
            name: name.to_string(),
            genes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Row indices of the genes present in `matrix`, plus the names of the
    /// genes that are absent.
    pub fn resolve(&self, matrix: &ExpressionMatrix) -> (Vec<usize>, Vec<String>) {
        let mut present = Vec::with_capacity(self.genes.len());
        let mut missing = Vec::new();
        for gene in &self.genes {
            match matrix.gene_index(gene) {
                Some(idx) => present.push(idx),
                None => missing.push(gene.clone()),
            }
        }
        (present, missing)
    }
}
