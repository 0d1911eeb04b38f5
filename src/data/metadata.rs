use crate::error::{Error, Result};
use std::collections::HashMap;

/// One named metadata field, holding a value for every cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Categorical(Vec<String>),
    Numeric(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Categorical(v) => v.len(),
            Column::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Categorical(v) => Column::Categorical(rows.iter().map(|&i| v[i].clone()).collect()),
            Column::Numeric(v) => Column::Numeric(rows.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// Per-cell annotation table keyed by cell (or sample) identifier.
///
/// Fields are only ever appended. `with_field` refuses to overwrite an existing
/// field; `replace_field` is the explicit way to do so.
#[derive(Debug, Clone)]
pub struct CellMetadata {
    ids: Vec<String>,
    lookup: HashMap<String, usize>,
    fields: Vec<(String, Column)>,
}

impl CellMetadata {
    pub fn new(ids: Vec<String>) -> Result<Self> {
        let mut lookup = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if lookup.insert(id.clone(), i).is_some() {
                return Err(Error::invalid(format!("duplicate cell identifier '{}'", id)));
            }
        }
        Ok(CellMetadata {
            ids,
            lookup,
            fields: Vec::new(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn field(&self, name: &str) -> Result<&Column> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| Error::UnknownIdentifier {
                kind: "metadata field",
                name: name.to_string(),
            })
    }

    pub fn categorical(&self, name: &str) -> Result<&[String]> {
        match self.field(name)? {
            Column::Categorical(v) => Ok(v),
            Column::Numeric(_) => Err(Error::invalid(format!(
                "metadata field '{}' is numeric, expected categorical",
                name
            ))),
        }
    }

    pub fn numeric(&self, name: &str) -> Result<&[f64]> {
        match self.field(name)? {
            Column::Numeric(v) => Ok(v),
            Column::Categorical(_) => Err(Error::invalid(format!(
                "metadata field '{}' is categorical, expected numeric",
                name
            ))),
        }
    }

    /// Append a field. Fails if the field already exists or has the wrong length.
    pub fn with_field(mut self, name: &str, column: Column) -> Result<Self> {
        if self.has_field(name) {
            return Err(Error::invalid(format!(
                "metadata field '{}' already exists; use replace_field to overwrite",
                name
            )));
        }
        self.check_len(name, &column)?;
        self.fields.push((name.to_string(), column));
        Ok(self)
    }

    /// Overwrite (or append) a field explicitly.
    pub fn replace_field(mut self, name: &str, column: Column) -> Result<Self> {
        self.check_len(name, &column)?;
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = column,
            None => self.fields.push((name.to_string(), column)),
        }
        Ok(self)
    }

    /// Reorder rows to follow `ids`, the column labels of a matrix.
    ///
    /// Every requested id must be present; extra metadata rows are dropped.
    pub fn aligned_to(&self, ids: &[String]) -> Result<Self> {
        if ids == self.ids.as_slice() {
            return Ok(self.clone());
        }
        let rows = ids
            .iter()
            .map(|id| {
                self.index_of(id).ok_or_else(|| {
                    Error::invalid(format!("column '{}' has no metadata row", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.select_rows(&rows))
    }

    pub(crate) fn select_rows(&self, rows: &[usize]) -> Self {
        let ids: Vec<String> = rows.iter().map(|&i| self.ids[i].clone()).collect();
        let lookup = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let fields = self
            .fields
            .iter()
            .map(|(name, col)| (name.clone(), col.select(rows)))
            .collect();
        CellMetadata { ids, lookup, fields }
    }

    fn check_len(&self, name: &str, column: &Column) -> Result<()> {
        if column.len() != self.n_rows() {
            return Err(Error::invalid(format!(
                "metadata field '{}' has {} values for {} rows",
                name,
                column.len(),
                self.n_rows()
            )));
        }
        Ok(())
    }
}

/// Fields produced by a stage, to be appended to a `CellMetadata`.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub fields: Vec<(String, Column)>,
}

impl MetadataUpdate {
    pub fn push(&mut self, name: &str, column: Column) {
        self.fields.push((name.to_string(), column));
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Append all fields; fails instead of overwriting an existing field.
    pub fn apply(&self, metadata: &CellMetadata) -> Result<CellMetadata> {
        self.fields
            .iter()
            .try_fold(metadata.clone(), |md, (name, col)| md.with_field(name, col.clone()))
    }
}
