//! Sample index: which nodes of a tree can be matched across trees.
//!
//! A node takes part in cross-tree comparison only if it is a sample with a
//! non-empty strain that no other sample in the same tree shares. Unnamed
//! samples are synthetic; duplicated strains are ambiguous. Both are dropped
//! here and never reach intersection, hashing or ordering.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::tree::{NodeId, TimeTree};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleIndex {
    by_key: BTreeMap<String, NodeId>,
    unnamed: usize,
    duplicated: BTreeSet<String>,
}

impl SampleIndex {
    /// Index the named, uniquely-keyed samples of `tree`.
    pub fn build(tree: &TimeTree) -> Self {
        let mut index = SampleIndex::default();
        for u in tree.samples() {
            let key = tree.strain(u);
            if key.is_empty() {
                index.unnamed += 1;
                continue;
            }
            if index.duplicated.contains(key) {
                continue;
            }
            if index.by_key.insert(key.to_string(), u).is_some() {
                index.by_key.remove(key);
                index.duplicated.insert(key.to_string());
            }
        }
        if !index.duplicated.is_empty() {
            warn!(
                "Excluding {} strain(s) that label more than one sample, e.g. {:?}",
                index.duplicated.len(),
                index.duplicated.iter().next()
            );
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_key.keys().map(String::as_str)
    }

    /// `(key, node)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.by_key.iter().map(|(k, &u)| (k.as_str(), u))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Samples skipped for lacking a strain.
    pub fn num_unnamed(&self) -> usize {
        self.unnamed
    }

    /// Strains skipped for labelling several samples.
    pub fn duplicated(&self) -> &BTreeSet<String> {
        &self.duplicated
    }

    /// Keys present in both indices, sorted.
    pub fn shared_keys(&self, other: &SampleIndex) -> Vec<String> {
        self.keys()
            .filter(|k| other.contains(k))
            .map(str::to_string)
            .collect()
    }
}
