//! Reduce two trees to a shared, comparable set of leaves.
//!
//! # Stages
//! 1. Index the named samples of each tree and take `S = keys(A) ∩ keys(B)`
//! 2. Project both trees onto `S` (unary nodes kept), with the samples of both
//!    projections numbered `0..|S|` in the same key order
//! 3. Some of those samples are ancestral (internal) in one of the trees. Only
//!    samples that are leaves in both projections go on; both trees are
//!    projected a second time onto that set, now dropping unary nodes
//!
//! After every projection, sample `i` of the left tree and sample `i` of the
//! right tree must carry the same strain. A mismatch, or unequal sample
//! counts, is a `PreconditionViolation`.

use tracing::{debug, info};

use crate::error::{Result, TanglegramError};
use crate::samples::SampleIndex;
use crate::tree::{NodeId, TimeTree};

/// Two trees restricted to the same samples.
///
/// Invariant: both trees have exactly `keys.len()` samples, every sample is a
/// leaf, and sample `i` in either tree has strain `keys[i]`.
#[derive(Debug, Clone)]
pub struct Intersection {
    pub left: TimeTree,
    pub right: TimeTree,
    pub keys: Vec<String>,
}

impl Intersection {
    /// Matched `(left, right)` sample pairs, in key order.
    pub fn pairs(&self) -> Vec<(NodeId, NodeId)> {
        self.left
            .samples()
            .into_iter()
            .zip(self.right.samples())
            .collect()
    }
}

/// Intersect `left` and `right` on their shared sample keys.
///
/// The left tree is the reference: its leaf set after the first projection
/// decides which samples are genuine tips.
pub fn intersect(left: &TimeTree, right: &TimeTree) -> Result<Intersection> {
    let left_index = SampleIndex::build(left);
    let right_index = SampleIndex::build(right);
    let shared = left_index.shared_keys(&right_index);
    if shared.is_empty() {
        return Err(TanglegramError::precondition(
            "the two trees share no named samples",
        ));
    }
    info!(
        "Num samples in intersection={} (left has {}, right has {})",
        shared.len(),
        left_index.len(),
        right_index.len()
    );

    let (left_its, right_its) = project_both(left, &left_index, right, &right_index, &shared)?;

    let tips: Vec<NodeId> = left_its
        .samples()
        .into_iter()
        .filter(|&u| left_its.is_leaf(u) && right_its.is_leaf(u))
        .collect();
    let removed = shared.len() - tips.len();
    if removed > 0 {
        debug!("Dropping {removed} samples that are internal in either tree");
    }

    let (left_tip, _) = left_its.simplify(&tips, false)?;
    let (right_tip, _) = right_its.simplify(&tips, false)?;
    verify_alignment(&left_tip, &right_tip)?;

    let keys: Vec<String> = left_tip
        .samples()
        .into_iter()
        .map(|u| left_tip.strain(u).to_string())
        .collect();
    info!(
        "Removed {removed} internal samples. Trees now have {} leaf samples",
        keys.len()
    );

    Ok(Intersection {
        left: left_tip,
        right: right_tip,
        keys,
    })
}

fn project_both(
    left: &TimeTree,
    left_index: &SampleIndex,
    right: &TimeTree,
    right_index: &SampleIndex,
    shared: &[String],
) -> Result<(TimeTree, TimeTree)> {
    let lookup = |index: &SampleIndex, side: &str| -> Result<Vec<NodeId>> {
        shared
            .iter()
            .map(|k| {
                index.get(k).ok_or_else(|| {
                    TanglegramError::precondition(format!("{side} tree lost sample {k}"))
                })
            })
            .collect()
    };
    let (left_its, _) = left.simplify(&lookup(left_index, "left")?, true)?;
    let (right_its, _) = right.simplify(&lookup(right_index, "right")?, true)?;
    verify_alignment(&left_its, &right_its)?;
    Ok((left_its, right_its))
}

/// Check that sample `i` of both trees denotes the same strain, for every `i`.
pub fn verify_alignment(left: &TimeTree, right: &TimeTree) -> Result<()> {
    let left_samples = left.samples();
    let right_samples = right.samples();
    if left_samples.len() != right_samples.len() {
        return Err(TanglegramError::precondition(format!(
            "sample counts differ: left has {}, right has {}",
            left_samples.len(),
            right_samples.len()
        )));
    }
    for (&u, &v) in left_samples.iter().zip(&right_samples) {
        if left.strain(u) != right.strain(v) {
            return Err(TanglegramError::precondition(format!(
                "strain mismatch: left node {u} is {:?} but right node {v} is {:?}",
                left.strain(u),
                right.strain(v)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::LoadOptions;
    use crate::tree::tests::four_sample_tree;

    fn newick(text: &str) -> TimeTree {
        TimeTree::from_newick(text, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_overlapping_sample_sets() {
        let a = newick("(((s1:1,s2:1):1,x1:2):1,(s3:1,s4:1):2);");
        let b = newick("((s4:2,(s2:1,y7:1):1):1,(s1:1,s3:1):2);");
        let its = intersect(&a, &b).unwrap();
        assert_eq!(its.keys, vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(its.left.num_samples(), its.right.num_samples());
        for (u, v) in its.pairs() {
            assert_eq!(its.left.strain(u), its.right.strain(v));
            assert!(its.left.is_leaf(u));
            assert!(its.right.is_leaf(v));
        }
        // unary node left behind by removing y7 is gone
        assert!(
            its.right
                .preorder()
                .into_iter()
                .all(|u| its.right.children(u).len() != 1)
        );
    }

    #[test]
    fn test_disjoint_trees_fail() {
        let a = newick("(a:1,b:1);");
        let b = newick("(c:1,d:1);");
        assert!(matches!(
            intersect(&a, &b),
            Err(TanglegramError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn test_internal_samples_pruned() {
        // left tree: "anc" is an ancestral sample above s1 and s2
        let mut a = TimeTree::with_root(10.0);
        let anc = a.add_sample(0, 5.0, "anc").unwrap();
        a.add_sample(anc, 0.0, "s1").unwrap();
        a.add_sample(anc, 0.0, "s2").unwrap();
        a.add_sample(0, 1.0, "s3").unwrap();

        let b = newick("((anc:1,s1:1):1,(s2:1,s3:1):1);");
        let its = intersect(&a, &b).unwrap();
        assert_eq!(its.keys, vec!["s1", "s2", "s3"]);
        assert_eq!(its.left.num_samples(), 3);
        assert_eq!(its.right.num_samples(), 3);
    }

    #[test]
    fn test_verify_alignment_detects_mismatch() {
        let a = four_sample_tree(0.0);
        let mut b = four_sample_tree(0.0);
        b.mark_sample(6, "other").unwrap();
        assert!(matches!(
            verify_alignment(&a, &b),
            Err(TanglegramError::PreconditionViolation(_))
        ));

        let (fewer, _) = a.simplify(&[3, 4], false).unwrap();
        assert!(verify_alignment(&a, &fewer).is_err());
        assert!(verify_alignment(&a, &a).is_ok());
    }
}
