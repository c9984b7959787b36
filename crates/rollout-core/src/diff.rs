use crate::manifest::FileHashes;

/// Four disjoint sets partitioning the union of source and target keys.
/// Order within each set follows the maps' sorted key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub to_add: Vec<String>,
    pub to_update: Vec<String>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

impl FileDiff {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

pub fn compute_diff(source: &FileHashes, target: &FileHashes) -> FileDiff {
    let mut diff = FileDiff::default();

    for (rel_path, hash) in source {
        match target.get(rel_path) {
            None => diff.to_add.push(rel_path.clone()),
            Some(existing) if existing != hash => diff.to_update.push(rel_path.clone()),
            Some(_) => diff.unchanged.push(rel_path.clone()),
        }
    }

    for rel_path in target.keys() {
        if !source.contains_key(rel_path) {
            diff.to_remove.push(rel_path.clone());
        }
    }

    diff
}
