use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Sorted distinct labels.
pub fn extract_unique_groups(labels: &[String]) -> BTreeSet<&str> {
    labels.iter().map(|l| l.as_str()).collect()
}

/// Columns of the two sides of a comparison.
#[derive(Debug, Clone)]
pub struct GroupIndices {
    pub group1: Vec<usize>,
    pub group2: Vec<usize>,
    /// Display names of each side, e.g. `"B"` or `"rest"`.
    pub name1: String,
    pub name2: String,
}

/// Resolve label sets to column indices.
///
/// Group 1 is every column whose label is in `ident_1`. Group 2 is every
/// column whose label is in `ident_2`, or every column not in group 1 when
/// `ident_2` is `None`.
///
/// # Errors
///
/// * `InvalidInput` if `ident_1` is empty or the two label sets overlap
/// * `UnknownIdentifier` for a label that no column carries
/// * `EmptyGroup` if either side selects no columns
pub fn get_group_indices(
    labels: &[String],
    ident_1: &[String],
    ident_2: Option<&[String]>,
) -> Result<GroupIndices> {
    if ident_1.is_empty() {
        return Err(Error::invalid("group 1 has no labels"));
    }
    let known = extract_unique_groups(labels);
    for label in ident_1.iter().chain(ident_2.into_iter().flatten()) {
        if !known.contains(label.as_str()) {
            return Err(Error::UnknownIdentifier {
                kind: "group label",
                name: label.clone(),
            });
        }
    }

    let set1: BTreeSet<&str> = ident_1.iter().map(|l| l.as_str()).collect();
    let set2: Option<BTreeSet<&str>> = ident_2.map(|ids| ids.iter().map(|l| l.as_str()).collect());
    if let Some(set2) = &set2 {
        if let Some(shared) = set1.intersection(set2).next() {
            return Err(Error::invalid(format!(
                "label '{}' is in both comparison groups",
                shared
            )));
        }
    }

    let mut group1 = Vec::new();
    let mut group2 = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        let label = label.as_str();
        if set1.contains(label) {
            group1.push(i);
        } else if set2.as_ref().is_none_or(|s| s.contains(label)) {
            group2.push(i);
        }
    }

    let name1 = join_names(&set1);
    let name2 = set2.as_ref().map_or_else(|| "rest".to_string(), join_names);
    if group1.is_empty() {
        return Err(Error::EmptyGroup { group: name1 });
    }
    if group2.is_empty() {
        return Err(Error::EmptyGroup { group: name2 });
    }
    Ok(GroupIndices {
        group1,
        group2,
        name1,
        name2,
    })
}

fn join_names(set: &BTreeSet<&str>) -> String {
    set.iter().copied().collect::<Vec<_>>().join("|")
}
