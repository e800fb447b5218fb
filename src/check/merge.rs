//! Standard ways of combining per-host result lists

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use super::cluster::MergeFn;
use crate::diagnostic::Diagnostic;

/// Records present in every list, in the order of the first list
///
/// An index is only unused if no host ever scanned it.
pub fn intersection<T: Eq + Hash>(lists: Vec<Vec<T>>) -> Vec<T> {
    let mut lists = lists.into_iter();
    let Some(first) = lists.next() else {
        return Vec::new();
    };
    let others: Vec<HashSet<T>> = lists.map(|list| list.into_iter().collect()).collect();

    let keep: Vec<bool> = {
        let mut seen = HashSet::new();
        first
            .iter()
            .map(|record| others.iter().all(|other| other.contains(record)) && seen.insert(record))
            .collect()
    };
    first
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect()
}

/// De-duplicated records of every list, in first-seen order
pub fn union<T: Eq + Hash + Clone>(lists: Vec<Vec<T>>) -> Vec<T> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|record| seen.insert(record.clone()))
        .collect()
}

/// Merge function per rule
pub struct MergeStrategies<T> {
    strategies: HashMap<Diagnostic, MergeFn<T>>,
}

impl<T> MergeStrategies<T> {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn with(mut self, diagnostic: Diagnostic, merge: MergeFn<T>) -> Self {
        self.strategies.insert(diagnostic, merge);
        self
    }

    pub fn get(&self, diagnostic: Diagnostic) -> Option<MergeFn<T>> {
        self.strategies.get(&diagnostic).cloned()
    }

    pub fn contains(&self, diagnostic: Diagnostic) -> bool {
        self.strategies.contains_key(&diagnostic)
    }
}

impl<T: Eq + Hash + Clone + 'static> MergeStrategies<T> {
    /// Intersection for unused indexes, union for tables with missing indexes
    pub fn standard() -> Self {
        Self::new()
            .with(Diagnostic::UnusedIndexes, Arc::new(intersection::<T>))
            .with(Diagnostic::TablesWithMissingIndexes, Arc::new(union::<T>))
    }
}

impl<T> Default for MergeStrategies<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_keeps_common_records() {
        let merged = intersection(vec![
            vec!["i1", "i2", "i3", "i2"],
            vec!["i3", "i2"],
            vec!["i2", "i4", "i3"],
        ]);
        assert_eq!(merged, vec!["i2", "i3"]);
    }

    #[test]
    fn test_intersection_edge_cases() {
        assert!(intersection::<u32>(Vec::new()).is_empty());
        assert_eq!(intersection(vec![vec![1, 2]]), vec![1, 2]);
        assert!(intersection(vec![vec![1, 2], Vec::new()]).is_empty());
    }

    #[test]
    fn test_union_in_first_seen_order() {
        let merged = union(vec![vec!["t2", "t1"], vec!["t3", "t1"], vec!["t2"]]);
        assert_eq!(merged, vec!["t2", "t1", "t3"]);
        assert!(union::<u32>(Vec::new()).is_empty());
    }

    #[test]
    fn test_standard_strategies_cover_cluster_rules() {
        let strategies = MergeStrategies::<String>::standard();
        for diagnostic in Diagnostic::all().filter(|d| d.is_across_cluster()) {
            assert!(strategies.contains(diagnostic), "{} has no merge", diagnostic);
        }
        assert!(!strategies.contains(Diagnostic::InvalidIndexes));

        let unused = strategies.get(Diagnostic::UnusedIndexes).unwrap();
        let merged = unused(vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["b".to_string()],
        ]);
        assert_eq!(merged, vec!["b".to_string()]);
    }
}
