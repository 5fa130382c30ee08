//! Rooted time trees: the structure every pipeline stage reads.
//!
//! # Overview
//! A `TimeTree` is an arena of nodes addressed by dense `NodeId`s. Each node
//! carries a time measured backwards from the present (larger = older), so a
//! parent is never younger than its children and the root is the oldest node.
//!
//! ```text
//!          root  (t=10)
//!         /    \
//!       n1      n2   (t=4, t=3)
//!      /  \    /  \
//!     s1  s2  s3  s4 (t=0, 0, 1, 1)
//! ```
//!
//! Sample nodes carry a `strain`, the only identifier that is stable across
//! trees built by different methods. Node ids are NOT stable: they are
//! assigned at load time and reassigned by [`TimeTree::simplify`].
//!
//! Trees are never mutated by the pipeline. Every reduction (intersection,
//! tip pruning, reordering) derives a new tree through `simplify`.

use std::collections::{BTreeMap, HashMap, HashSet};

use phylotree::tree::Tree as PhyloTree;

use crate::error::{Result, TanglegramError};

/// Index of a node inside one `TimeTree`.
pub type NodeId = usize;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeNode {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Time before present, in the tree's native unit.
    pub time: f64,
    pub strain: Option<String>,
    pub is_sample: bool,
    pub metadata: BTreeMap<String, String>,
}

/// How a Newick tree is turned into a time tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    /// Multiplier applied to branch lengths (e.g. 365.25 for years → days).
    pub time_scale: f64,
    /// Branch lengths shorter than this are raised to it.
    pub min_edge_length: f64,
    /// Treat named internal nodes as (ancestral) samples.
    pub internal_samples: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            time_scale: 1.0,
            min_edge_length: 0.0,
            internal_samples: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeTree {
    nodes: Vec<TreeNode>,
    root: NodeId,
}

impl TimeTree {
    /// A tree holding only a root at `time`. Grow it with [`TimeTree::add_child`].
    pub fn with_root(time: f64) -> Self {
        TimeTree {
            nodes: vec![TreeNode {
                time,
                ..Default::default()
            }],
            root: 0,
        }
    }

    /// Attach a new unnamed node under `parent`.
    ///
    /// # Errors
    /// `InvalidTree` if `parent` does not exist or the child would be older
    /// than its parent.
    pub fn add_child(&mut self, parent: NodeId, time: f64) -> Result<NodeId> {
        let parent_time = self.node(parent)?.time;
        // Written this way round so that a NaN time is rejected too.
        if !(time <= parent_time) {
            return Err(TanglegramError::InvalidTree(format!(
                "node at time {time} would be older than its parent {parent} at time {parent_time}"
            )));
        }
        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            parent: Some(parent),
            time,
            ..Default::default()
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Attach a named sample under `parent`.
    pub fn add_sample(&mut self, parent: NodeId, time: f64, strain: &str) -> Result<NodeId> {
        let id = self.add_child(parent, time)?;
        self.mark_sample(id, strain)?;
        Ok(id)
    }

    /// Flag an existing node as a sample. An empty strain leaves it unnamed.
    pub fn mark_sample(&mut self, u: NodeId, strain: &str) -> Result<()> {
        let node = self.node_mut(u)?;
        node.is_sample = true;
        node.strain = (!strain.is_empty()).then(|| strain.to_string());
        Ok(())
    }

    pub fn set_metadata(
        &mut self,
        u: NodeId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.node_mut(u)?.metadata.insert(key.into(), value.into());
        Ok(())
    }

    /// Copy metadata rows onto the samples whose strain matches a row key.
    ///
    /// Returns the number of samples that received metadata.
    pub fn attach_metadata(&mut self, table: &HashMap<String, BTreeMap<String, String>>) -> usize {
        let mut matched = 0;
        for node in self.nodes.iter_mut().filter(|n| n.is_sample) {
            if let Some(row) = node.strain.as_ref().and_then(|s| table.get(s)) {
                node.metadata
                    .extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                matched += 1;
            }
        }
        matched
    }

    /// Parse a Newick string into a time tree.
    ///
    /// Node time is the distance from the node down to the deepest node of the
    /// tree, so the most distant tip sits at time 0 and the root is oldest.
    pub fn from_newick(newick: &str, options: &LoadOptions) -> Result<Self> {
        let phylo = PhyloTree::from_newick(newick)
            .map_err(|e| TanglegramError::Parse(format!("invalid newick: {e}")))?;
        let tree = Self::from_phylo(&phylo, options)?;
        if options.time_scale == 1.0 {
            Ok(tree)
        } else {
            tree.rescaled(options.time_scale)
        }
    }

    /// Convert a parsed `phylotree` tree, measuring time in raw branch-length units.
    ///
    /// # Algorithm
    /// 1. Preorder walk from the root accumulating root-to-node distance
    ///    (missing lengths count as 0, short ones are raised to the minimum)
    /// 2. `height` = the largest such distance
    /// 3. `time(node) = height - distance(node)`
    ///
    /// Nodes are renumbered in preorder, so a parent id is always smaller than
    /// its children's ids.
    pub fn from_phylo(tree: &PhyloTree, options: &LoadOptions) -> Result<Self> {
        let root = tree.get_root()?;

        // (name, parent, root distance, is leaf), in preorder
        let mut entries: Vec<(Option<String>, Option<NodeId>, f64, bool)> = Vec::new();
        let mut stack = vec![(root, None, 0.0f64)];
        while let Some((phylo_id, parent, depth)) = stack.pop() {
            let node = tree.get(&phylo_id)?;
            let id = entries.len();
            let name = node.name.clone().filter(|s| !s.is_empty());
            entries.push((name, parent, depth, node.children.is_empty()));
            for &child_id in node.children.iter().rev() {
                let child = tree.get(&child_id)?;
                let edge = child
                    .parent_edge
                    .unwrap_or(0.0)
                    .max(options.min_edge_length);
                stack.push((child_id, Some(id), depth + edge));
            }
        }

        let height = entries.iter().map(|e| e.2).fold(0.0, f64::max);
        let mut nodes: Vec<TreeNode> = Vec::with_capacity(entries.len());
        for (id, (name, parent, depth, is_leaf)) in entries.into_iter().enumerate() {
            let mut node = TreeNode {
                parent,
                time: height - depth,
                ..Default::default()
            };
            if let Some(p) = parent {
                if node.time > nodes[p].time {
                    return Err(TanglegramError::InvalidTree(format!(
                        "negative branch length above node {}",
                        name.as_deref().unwrap_or("<unnamed>")
                    )));
                }
                nodes[p].children.push(id);
            }
            match name {
                Some(name) if is_leaf || options.internal_samples => {
                    node.is_sample = true;
                    node.strain = Some(name);
                }
                Some(name) => {
                    node.metadata.insert("label".to_string(), name);
                }
                None => {}
            }
            nodes.push(node);
        }

        Ok(TimeTree { nodes, root: 0 })
    }

    /// Copy of this tree with every node time multiplied by `factor`.
    pub fn rescaled(&self, factor: f64) -> Result<Self> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(TanglegramError::InvalidTree(format!(
                "time scale must be positive, got {factor}"
            )));
        }
        let mut tree = self.clone();
        for node in &mut tree.nodes {
            node.time *= factor;
        }
        Ok(tree)
    }

    pub fn node(&self, u: NodeId) -> Result<&TreeNode> {
        self.nodes
            .get(u)
            .ok_or_else(|| TanglegramError::InvalidTree(format!("node {u} is not in the tree")))
    }

    fn node_mut(&mut self, u: NodeId) -> Result<&mut TreeNode> {
        self.nodes
            .get_mut(u)
            .ok_or_else(|| TanglegramError::InvalidTree(format!("node {u} is not in the tree")))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    // The accessors below index directly and panic on a foreign id, like slice
    // indexing. Ids handed out by this tree are always valid.

    pub fn time(&self, u: NodeId) -> f64 {
        self.nodes[u].time
    }

    pub fn parent(&self, u: NodeId) -> Option<NodeId> {
        self.nodes[u].parent
    }

    pub fn children(&self, u: NodeId) -> &[NodeId] {
        &self.nodes[u].children
    }

    pub fn is_leaf(&self, u: NodeId) -> bool {
        self.nodes[u].children.is_empty()
    }

    pub fn is_sample(&self, u: NodeId) -> bool {
        self.nodes[u].is_sample
    }

    /// Strain of `u`, or `""` when it has none.
    pub fn strain(&self, u: NodeId) -> &str {
        self.nodes[u].strain.as_deref().unwrap_or("")
    }

    pub fn metadata(&self, u: NodeId, key: &str) -> Option<&str> {
        self.nodes[u].metadata.get(key).map(String::as_str)
    }

    /// Sample node ids in increasing id order.
    pub fn samples(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).filter(|&u| self.nodes[u].is_sample).collect()
    }

    pub fn num_samples(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_sample).count()
    }

    /// Leaf node ids in increasing id order.
    pub fn leaves(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).filter(|&u| self.is_leaf(u)).collect()
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    /// Preorder of the subtree rooted at `u`, children in stored order.
    pub fn preorder_from(&self, u: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![u];
        while let Some(v) = stack.pop() {
            order.push(v);
            stack.extend(self.nodes[v].children.iter().rev());
        }
        order
    }

    pub fn postorder(&self) -> Vec<NodeId> {
        self.postorder_by(|children| children.to_vec())
    }

    /// Postorder visiting children by increasing minimum leaf id beneath them.
    ///
    /// The resulting leaf sequence depends only on topology and leaf ids, never
    /// on the stored child order, so it is a canonical drawing order.
    ///
    /// ```text
    ///        r                 leaves in minlex postorder:
    ///      /   \
    ///     a     b              1, 3, 0, 2   ← NOT this (stored order)
    ///    / \   / \             0, 2, 1, 3   ← this: b (min 0) before a (min 1)
    ///   1   3 0   2
    /// ```
    pub fn minlex_postorder(&self) -> Vec<NodeId> {
        let mut min_leaf = vec![NodeId::MAX; self.nodes.len()];
        for &u in self.preorder().iter().rev() {
            min_leaf[u] = if self.is_leaf(u) {
                u
            } else {
                self.nodes[u]
                    .children
                    .iter()
                    .map(|&c| min_leaf[c])
                    .min()
                    .unwrap_or(u)
            };
        }
        self.postorder_by(|children| {
            let mut sorted = children.to_vec();
            sorted.sort_by_key(|&c| min_leaf[c]);
            sorted
        })
    }

    fn postorder_by<F>(&self, arrange: F) -> Vec<NodeId>
    where
        F: Fn(&[NodeId]) -> Vec<NodeId>,
    {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((u, expanded)) = stack.pop() {
            if expanded {
                order.push(u);
                continue;
            }
            stack.push((u, true));
            for c in arrange(&self.nodes[u].children).into_iter().rev() {
                stack.push((c, false));
            }
        }
        order
    }

    /// Samples in the subtree of `u`, including `u` itself.
    pub fn samples_under(&self, u: NodeId) -> Vec<NodeId> {
        self.preorder_from(u)
            .into_iter()
            .filter(|&v| self.nodes[v].is_sample)
            .collect()
    }

    /// `u`, its parent, and so on up to the root.
    pub fn ancestors(&self, u: NodeId) -> Vec<NodeId> {
        let mut path = vec![u];
        let mut current = u;
        while let Some(p) = self.nodes[current].parent {
            path.push(p);
            current = p;
        }
        path
    }

    /// Most recent common ancestor of `nodes`; `None` for an empty slice.
    pub fn mrca(&self, nodes: &[NodeId]) -> Option<NodeId> {
        let (&first, rest) = nodes.split_first()?;
        let mut path = self.ancestors(first);
        for &u in rest {
            let lineage: HashSet<NodeId> = self.ancestors(u).into_iter().collect();
            path.retain(|a| lineage.contains(a));
        }
        path.first().copied()
    }

    /// Project the tree onto `samples`, preserving the topology connecting them.
    ///
    /// # Result shape
    /// - `samples[i]` becomes node `i` and is the only kind of sample left
    /// - the root is the MRCA of `samples`; everything above it is dropped
    /// - other kept nodes follow in preorder, numbered from `samples.len()`
    ///
    /// # Which internal nodes survive
    /// - `keep_unary = false`: only nodes where two or more sample lineages meet
    /// - `keep_unary = true`: every ancestor of a sample below the MRCA
    ///
    /// Returns the new tree and the old → new id map.
    ///
    /// # Errors
    /// `PreconditionViolation` for an empty sample list, `InvalidTree` for an
    /// unknown or repeated id.
    pub fn simplify(
        &self,
        samples: &[NodeId],
        keep_unary: bool,
    ) -> Result<(TimeTree, Vec<Option<NodeId>>)> {
        let n = self.nodes.len();
        if samples.is_empty() {
            return Err(TanglegramError::precondition(
                "cannot simplify to an empty sample set",
            ));
        }
        let mut kept = vec![false; n];
        for &s in samples {
            if s >= n {
                return Err(TanglegramError::InvalidTree(format!(
                    "sample {s} is not in the tree"
                )));
            }
            if std::mem::replace(&mut kept[s], true) {
                return Err(TanglegramError::InvalidTree(format!(
                    "sample {s} listed twice"
                )));
            }
        }

        // lineage[u]: subtree of u holds a kept sample
        // branching[u]: number of children carrying such a lineage
        let mut lineage = vec![false; n];
        let mut branching = vec![0usize; n];
        for &u in self.preorder().iter().rev() {
            branching[u] = self.nodes[u]
                .children
                .iter()
                .filter(|&&c| lineage[c])
                .count();
            lineage[u] = kept[u] || branching[u] > 0;
        }

        let mut mrca = self.root;
        while !kept[mrca] && branching[mrca] == 1 {
            match self.nodes[mrca].children.iter().copied().find(|&c| lineage[c]) {
                Some(c) => mrca = c,
                None => break,
            }
        }

        let retained =
            |u: NodeId| lineage[u] && (keep_unary || kept[u] || branching[u] >= 2);

        let mut node_map: Vec<Option<NodeId>> = vec![None; n];
        for (i, &s) in samples.iter().enumerate() {
            node_map[s] = Some(i);
        }
        let order = self.preorder_from(mrca);
        let mut next = samples.len();
        for &u in &order {
            if node_map[u].is_none() && retained(u) {
                node_map[u] = Some(next);
                next += 1;
            }
        }

        let mut nodes = vec![TreeNode::default(); next];
        for &u in &order {
            let Some(new_u) = node_map[u] else { continue };
            let source = &self.nodes[u];
            let parent = if u == mrca {
                None
            } else {
                let mut p = source.parent;
                while let Some(candidate) = p {
                    if node_map[candidate].is_some() {
                        break;
                    }
                    p = self.nodes[candidate].parent;
                }
                p.and_then(|candidate| node_map[candidate])
            };
            nodes[new_u] = TreeNode {
                parent,
                children: Vec::new(),
                time: source.time,
                strain: source.strain.clone(),
                is_sample: kept[u],
                metadata: source.metadata.clone(),
            };
            if let Some(p) = parent {
                nodes[p].children.push(new_u);
            }
        }

        let root = node_map[mrca].ok_or_else(|| {
            TanglegramError::InvalidTree("samples are not connected to the root".to_string())
        })?;
        Ok((TimeTree { nodes, root }, node_map))
    }

    /// Serialize in bracket notation with branch lengths `parent time - time`.
    ///
    /// `label` names nodes; `None` leaves a node unlabelled.
    pub fn to_newick<F>(&self, label: F) -> String
    where
        F: Fn(NodeId) -> Option<String>,
    {
        let mut out = String::new();
        self.write_newick(self.root, &label, &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, u: NodeId, label: &dyn Fn(NodeId) -> Option<String>, out: &mut String) {
        let node = &self.nodes[u];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &c) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(c, label, out);
            }
            out.push(')');
        }
        if let Some(name) = label(u) {
            out.push_str(&name);
        }
        if let Some(p) = node.parent {
            out.push_str(&format!(":{}", self.nodes[p].time - node.time));
        }
    }
}
