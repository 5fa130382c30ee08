//! Content-addressed splits: find clades two trees agree on.
//!
//! # Overview
//! Internal node ids mean nothing across trees, so a clade is identified by
//! the set of sample keys beneath it. Comparing those sets directly gets
//! expensive for big trees; instead each set is reduced to a [`SplitHash`],
//! the SHA-256 digest of its keys, sorted and joined by single spaces.
//!
//! ```text
//!   Tree A                 Tree B
//!      r                      r'
//!    /   \                  /    \
//!   x     y               y'      x'
//!  / \   / \             / \     / \
//! s1 s2 s3 s4           s4 s3   s2 s1
//!
//! x  → H("s1 s2")  ==  H("s1 s2") ← x'
//! y  → H("s3 s4")  ==  H("s3 s4") ← y'
//! ```
//!
//! # Why keys are numbered alphabetically
//! Sample sets are accumulated bottom-up as [`Bitset`]s, with bit `i` standing
//! for the `i`-th key in sorted order. Reading the bits back in increasing
//! order then produces the keys already sorted, so child traversal order can
//! never change a hash.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::bitset::Bitset;
use crate::tree::{NodeId, TimeTree};

/// SHA-256 digest of a sorted, space-joined set of sample keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SplitHash([u8; 32]);

impl SplitHash {
    /// Hash a set of keys. Order and repetition of the input do not matter.
    pub fn of_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sorted: Vec<String> = keys
            .into_iter()
            .map(|k| k.as_ref().to_string())
            .sorted()
            .dedup()
            .collect();
        let refs: Vec<&str> = sorted.iter().map(String::as_str).collect();
        Self::of_sorted(&refs)
    }

    /// Hash keys that are already sorted and distinct.
    fn of_sorted(sorted: &[&str]) -> Self {
        let joined = sorted.join(" ");
        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        SplitHash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SplitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Every internal node of one tree, keyed by the hash of its sample set.
#[derive(Debug, Clone, Default)]
pub struct SplitIndex {
    by_hash: HashMap<SplitHash, NodeId>,
}

impl SplitIndex {
    /// Hash the sample set under every internal node of `tree`.
    ///
    /// # Algorithm
    /// 1. Sort the distinct non-empty strains of the samples; key `i` ↔ bit `i`
    /// 2. Walk the tree bottom-up, OR-ing child bitsets into their parent
    ///    (a sample node also sets its own bit)
    /// 3. Hash each internal node's set in parallel
    ///
    /// Internal nodes with no named sample beneath them are skipped. When
    /// several nodes share a sample set (a chain of unary nodes), the one
    /// nearest the root keeps the entry.
    pub fn build(tree: &TimeTree) -> Self {
        let keys: Vec<&str> = tree
            .samples()
            .into_iter()
            .map(|u| tree.strain(u))
            .filter(|k| !k.is_empty())
            .sorted()
            .dedup()
            .collect();
        let bit_of: HashMap<&str, usize> = keys.iter().enumerate().map(|(i, &k)| (k, i)).collect();
        let words = keys.len().div_ceil(64);

        let preorder = tree.preorder();
        let mut sets: Vec<Bitset> = vec![Bitset::zeros(words); tree.num_nodes()];
        for &u in preorder.iter().rev() {
            let mut set = Bitset::zeros(words);
            if let Some(&bit) = bit_of.get(tree.strain(u)) {
                set.set(bit);
            }
            for &c in tree.children(u) {
                set.or_assign(&sets[c]);
            }
            sets[u] = set;
        }

        let internal: Vec<NodeId> = preorder
            .iter()
            .copied()
            .filter(|&u| !tree.is_leaf(u) && sets[u].count_ones() > 0)
            .collect();
        let hashed: Vec<(NodeId, SplitHash)> = internal
            .par_iter()
            .map(|&u| {
                let members: Vec<&str> = sets[u].iter_ones().map(|i| keys[i]).collect();
                (u, SplitHash::of_sorted(&members))
            })
            .collect();

        // `hashed` is in preorder, so the first node seen is the rootmost one
        let mut by_hash = HashMap::with_capacity(hashed.len());
        for (u, hash) in hashed {
            by_hash.entry(hash).or_insert(u);
        }
        debug!(
            "Hashed {} internal nodes into {} distinct splits",
            internal.len(),
            by_hash.len()
        );
        SplitIndex { by_hash }
    }

    pub fn get(&self, hash: &SplitHash) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SplitHash, NodeId)> + '_ {
        self.by_hash.iter().map(|(h, &u)| (h, u))
    }
}

/// A clade present in both trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SharedSplit {
    pub hash: SplitHash,
    pub left: NodeId,
    pub right: NodeId,
}

/// Splits whose hash appears in both indices, ordered by left node id.
pub fn shared_splits(left: &SplitIndex, right: &SplitIndex) -> Vec<SharedSplit> {
    let mut shared: Vec<SharedSplit> = left
        .iter()
        .filter_map(|(hash, u)| {
            right.get(hash).map(|v| SharedSplit {
                hash: *hash,
                left: u,
                right: v,
            })
        })
        .collect();
    shared.sort_by_key(|s| (s.left, s.right));
    shared
}
