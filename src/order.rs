//! Turn the oracle's answer into a concrete drawing order per tree.
//!
//! # Steps
//! 1. Ask the [`Untangler`] for one leaf sequence per tree
//! 2. Reverse the sequence of any side drawn mirrored (see [`Orientation`])
//! 3. Renumber each tree so that its samples are `0..n` in that sequence
//! 4. Rank the leaves of the renumbered tree by minlex postorder
//!
//! Step 4 is what the renderer's own traversal produces, so it is the order
//! the leaves actually appear in. For any order the oracle can legally return
//! (one consistent with the tree's topology) it equals step 3's sequence;
//! otherwise it is the nearest topology-consistent order, which keeps ties
//! and oddities resolved the same way on every run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TanglegramError};
use crate::tree::{NodeId, TimeTree};
use crate::untangle::{Untangler, check_permutation};

/// Whether a side uses the oracle's leaf sequence as is or reversed.
///
/// The right tree of a tanglegram is usually drawn rotated the other way from
/// the left one, which reads the oracle's sequence back to front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Natural,
    Mirrored,
}

impl Orientation {
    pub fn apply(self, mut order: Vec<NodeId>) -> Vec<NodeId> {
        if self == Orientation::Mirrored {
            order.reverse();
        }
        order
    }
}

/// A total order over the leaves of one tree, first drawn leaf first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafPermutation {
    order: Vec<NodeId>,
    rank: HashMap<NodeId, usize>,
}

impl LeafPermutation {
    /// Build from a sequence of distinct node ids.
    pub fn from_order(order: Vec<NodeId>) -> Result<Self> {
        let mut rank = HashMap::with_capacity(order.len());
        for (i, &u) in order.iter().enumerate() {
            if rank.insert(u, i).is_some() {
                return Err(TanglegramError::precondition(format!(
                    "node {u} appears twice in a leaf order"
                )));
            }
        }
        Ok(LeafPermutation { order, rank })
    }

    /// Leaves of `tree` in minlex postorder.
    pub fn minlex(tree: &TimeTree) -> Self {
        let order: Vec<NodeId> = tree
            .minlex_postorder()
            .into_iter()
            .filter(|&u| tree.is_leaf(u))
            .collect();
        let rank = order.iter().enumerate().map(|(i, &u)| (u, i)).collect();
        LeafPermutation { order, rank }
    }

    pub fn rank(&self, u: NodeId) -> Option<usize> {
        self.rank.get(&u).copied()
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Strain → rank, for every ranked leaf with a strain.
    pub fn ranks_by_key(&self, tree: &TimeTree) -> HashMap<String, usize> {
        self.order
            .iter()
            .enumerate()
            .filter(|&(_, &u)| !tree.strain(u).is_empty())
            .map(|(i, &u)| (tree.strain(u).to_string(), i))
            .collect()
    }
}

/// Both trees renumbered into drawing order, with their leaf permutations.
#[derive(Debug, Clone)]
pub struct ResolvedOrder {
    pub left: TimeTree,
    pub right: TimeTree,
    pub left_order: LeafPermutation,
    pub right_order: LeafPermutation,
}

/// Run the oracle and fix the drawing order of both trees.
///
/// Both trees must have the same number of leaves, all of them samples
/// (the shape [`crate::intersect::intersect`] produces). An untangler answer
/// that is not a permutation of each tree's leaves is an `OracleFailure`.
pub fn resolve_leaf_order(
    untangler: &dyn Untangler,
    left: &TimeTree,
    right: &TimeTree,
    orientation: (Orientation, Orientation),
) -> Result<ResolvedOrder> {
    let (n_left, n_right) = (left.leaves().len(), right.leaves().len());
    if n_left != n_right {
        return Err(TanglegramError::precondition(format!(
            "leaf counts differ before ordering: {n_left} vs {n_right}"
        )));
    }

    let (left_seq, right_seq) = untangler.untangle(left, right)?;
    check_permutation(&left_seq, left, "left")?;
    check_permutation(&right_seq, right, "right")?;
    let left_seq = orientation.0.apply(left_seq);
    let right_seq = orientation.1.apply(right_seq);
    debug!("Oracle returned {} + {} leaves", left_seq.len(), right_seq.len());

    let (left, _) = left.simplify(&left_seq, false)?;
    let (right, _) = right.simplify(&right_seq, false)?;
    let left_order = LeafPermutation::minlex(&left);
    let right_order = LeafPermutation::minlex(&right);
    info!(
        "Resolved leaf order for {} leaves (orientation {:?}/{:?})",
        left_order.len(),
        orientation.0,
        orientation.1
    );

    Ok(ResolvedOrder {
        left,
        right,
        left_order,
        right_order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::four_sample_tree;
    use crate::untangle::CanonicalOrder;
    use rstest::rstest;

    /// Fixed answer, for driving the resolver without a process.
    struct Scripted(Vec<NodeId>, Vec<NodeId>);

    impl Untangler for Scripted {
        fn untangle(&self, _: &TimeTree, _: &TimeTree) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
            Ok((self.0.clone(), self.1.clone()))
        }
    }

    fn strains(tree: &TimeTree, perm: &LeafPermutation) -> Vec<String> {
        perm.order().iter().map(|&u| tree.strain(u).to_string()).collect()
    }

    #[test]
    fn test_mirrored_side_is_reversed() {
        let tree = four_sample_tree(0.0);
        let resolved = resolve_leaf_order(
            &CanonicalOrder,
            &tree,
            &tree,
            (Orientation::Natural, Orientation::Mirrored),
        )
        .unwrap();
        assert_eq!(strains(&resolved.left, &resolved.left_order), vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(strains(&resolved.right, &resolved.right_order), vec!["s4", "s3", "s2", "s1"]);
        // samples renumbered into drawing order
        assert_eq!(resolved.right.strain(0), "s4");
        assert_eq!(resolved.right_order.rank(0), Some(0));
    }

    #[test]
    fn test_oracle_order_is_kept_when_planar() {
        let tree = four_sample_tree(0.0);
        // ids 3..=6 are s1..s4; swap the clades and the leaves inside one
        let oracle = Scripted(vec![6, 5, 3, 4], vec![3, 4, 5, 6]);
        let resolved =
            resolve_leaf_order(&oracle, &tree, &tree, (Orientation::Natural, Orientation::Natural))
                .unwrap();
        assert_eq!(strains(&resolved.left, &resolved.left_order), vec!["s4", "s3", "s1", "s2"]);
        let by_key = resolved.left_order.ranks_by_key(&resolved.left);
        assert_eq!(by_key["s1"], 2);
    }

    #[test]
    fn test_non_planar_answer_resolved_by_topology() {
        let tree = four_sample_tree(0.0);
        // s1, s3, s2, s4 interleaves the two clades
        let oracle = Scripted(vec![3, 5, 4, 6], vec![3, 4, 5, 6]);
        let resolved =
            resolve_leaf_order(&oracle, &tree, &tree, (Orientation::Natural, Orientation::Natural))
                .unwrap();
        assert_eq!(strains(&resolved.left, &resolved.left_order), vec!["s1", "s2", "s3", "s4"]);
    }

    #[test]
    fn test_unequal_leaf_counts_rejected() {
        let tree = four_sample_tree(0.0);
        let (smaller, _) = tree.simplify(&[3, 4, 5], false).unwrap();
        assert!(matches!(
            resolve_leaf_order(
                &CanonicalOrder,
                &tree,
                &smaller,
                (Orientation::Natural, Orientation::Natural)
            ),
            Err(TanglegramError::PreconditionViolation(_))
        ));
    }

    #[rstest]
    #[case(vec![3, 4, 5], vec![3, 4, 5, 6])]
    #[case(vec![3, 4, 5, 6], vec![6, 5, 4, 4])]
    #[case(vec![3, 4, 5, 6, 1], vec![3, 4, 5, 6])]
    fn test_untangler_must_return_permutations(
        #[case] left: Vec<NodeId>,
        #[case] right: Vec<NodeId>,
    ) {
        let tree = four_sample_tree(0.0);
        let result = resolve_leaf_order(
            &Scripted(left, right),
            &tree,
            &tree,
            (Orientation::Natural, Orientation::Natural),
        );
        assert!(matches!(result, Err(TanglegramError::OracleFailure { .. })));
    }

    #[test]
    fn test_duplicate_in_permutation_rejected() {
        assert!(LeafPermutation::from_order(vec![1, 2, 1]).is_err());
        let perm = LeafPermutation::from_order(vec![4, 2, 9]).unwrap();
        assert_eq!(perm.rank(9), Some(2));
        assert_eq!(perm.rank(3), None);
    }
}
