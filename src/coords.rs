//! Place matched leaves on the shared canvas.
//!
//! Each tree is scaled to its own span, from its youngest sample (0) up to its
//! root (1), so trees covering different absolute ranges still fill the same
//! width:
//!
//! ```text
//! rel(u) = (time(u) - min sample time) / (time(root) - min sample time)
//! ```
//!
//! The left tree grows leftwards from `left_root_x` and is drawn bottom-up;
//! the right tree grows rightwards from `right_root_x` and is drawn top-down.
//! A leaf's vertical slot comes from its rank in the leaf permutation:
//!
//! ```text
//! left  = (left_root_x  - rel * tree_width, left_baseline - rank * step - leaf_margin)
//! right = (right_root_x + rel * tree_width, rank * step + leaf_margin)
//! step  = (canvas_height - vertical_inset) / number of samples
//! ```
//!
//! `rel` is not clamped; a leaf younger than every sample cannot occur after
//! intersection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TanglegramError};
use crate::order::LeafPermutation;
use crate::tree::{NodeId, TimeTree};

/// Canvas constants, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasLayout {
    pub canvas_height: f64,
    pub vertical_inset: f64,
    pub left_baseline: f64,
    pub leaf_margin: f64,
    pub left_root_x: f64,
    pub right_root_x: f64,
    pub tree_width: f64,
}

impl Default for CanvasLayout {
    fn default() -> Self {
        CanvasLayout {
            canvas_height: 800.0,
            vertical_inset: 77.0,
            left_baseline: 763.0,
            leaf_margin: 22.0,
            left_root_x: 370.0,
            right_root_x: 430.0,
            tree_width: 340.0,
        }
    }
}

impl CanvasLayout {
    fn step(&self, num_samples: usize) -> f64 {
        (self.canvas_height - self.vertical_inset) / num_samples as f64
    }

    pub fn left_anchor(&self, rel: f64, rank: usize, num_samples: usize) -> Anchor {
        Anchor {
            x: self.left_root_x - rel * self.tree_width,
            y: self.left_baseline - rank as f64 * self.step(num_samples) - self.leaf_margin,
        }
    }

    pub fn right_anchor(&self, rel: f64, rank: usize, num_samples: usize) -> Anchor {
        Anchor {
            x: self.right_root_x + rel * self.tree_width,
            y: rank as f64 * self.step(num_samples) + self.leaf_margin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

/// Normalises node times of one tree to its [youngest sample, root] span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub min_sample_time: f64,
    pub root_time: f64,
}

impl TimeSpan {
    /// # Errors
    /// `PreconditionViolation` for a tree without samples or with zero span.
    pub fn of(tree: &TimeTree) -> Result<Self> {
        let min_sample_time = tree
            .samples()
            .into_iter()
            .map(|u| tree.time(u))
            .min_by(f64::total_cmp)
            .ok_or_else(|| TanglegramError::precondition("tree has no samples"))?;
        let root_time = tree.time(tree.root());
        if !(root_time > min_sample_time) {
            return Err(TanglegramError::precondition(format!(
                "tree spans no time: root at {root_time}, youngest sample at {min_sample_time}"
            )));
        }
        Ok(TimeSpan {
            min_sample_time,
            root_time,
        })
    }

    pub fn relative(&self, t: f64) -> f64 {
        (t - self.min_sample_time) / (self.root_time - self.min_sample_time)
    }
}

/// One connector line: the same sample on both trees.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub key: String,
    pub left_node: NodeId,
    pub right_node: NodeId,
    pub left_rank: usize,
    pub right_rank: usize,
    pub left: Anchor,
    pub right: Anchor,
}

/// Anchor every leaf of the left permutation to its namesake on the right.
///
/// Output follows the left drawing order.
///
/// # Errors
/// `PreconditionViolation` if a leaf has no strain, a strain is missing from
/// the right tree, or either tree spans no time.
pub fn map_correspondences(
    left: &TimeTree,
    left_order: &LeafPermutation,
    right: &TimeTree,
    right_order: &LeafPermutation,
    layout: &CanvasLayout,
) -> Result<Vec<Correspondence>> {
    let left_span = TimeSpan::of(left)?;
    let right_span = TimeSpan::of(right)?;
    let left_n = left.num_samples();
    let right_n = right.num_samples();

    let right_by_key: HashMap<&str, (NodeId, usize)> = right_order
        .order()
        .iter()
        .enumerate()
        .map(|(rank, &v)| (right.strain(v), (v, rank)))
        .collect();

    left_order
        .order()
        .iter()
        .enumerate()
        .map(|(left_rank, &u)| {
            let key = left.strain(u);
            if key.is_empty() {
                return Err(TanglegramError::precondition(format!(
                    "left leaf {u} has no strain"
                )));
            }
            let &(v, right_rank) = right_by_key.get(key).ok_or_else(|| {
                TanglegramError::precondition(format!("{key} is missing from the right tree"))
            })?;
            Ok(Correspondence {
                key: key.to_string(),
                left_node: u,
                right_node: v,
                left_rank,
                right_rank,
                left: layout.left_anchor(left_span.relative(left.time(u)), left_rank, left_n),
                right: layout.right_anchor(right_span.relative(right.time(v)), right_rank, right_n),
            })
        })
        .collect()
}
