//! Named clades highlighted on a figure (e.g. Alpha, Delta).
//!
//! A focal clade is defined by lineage designations, not by nodes: its node in
//! a given tree is the MRCA of every sample whose lineage metadata matches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::tree::{NodeId, TimeTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocalClade {
    pub name: String,
    /// Lineage names; a trailing `*` matches any lineage with that prefix.
    pub patterns: Vec<String>,
}

impl FocalClade {
    pub fn new<I, S>(name: &str, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FocalClade {
            name: name.to_string(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, lineage: &str) -> bool {
        !lineage.is_empty()
            && self.patterns.iter().any(|p| match p.strip_suffix('*') {
                Some(prefix) => lineage.starts_with(prefix),
                None => lineage == p,
            })
    }
}

/// The clades shown on the cophylogeny figures.
pub fn default_focal_clades() -> Vec<FocalClade> {
    vec![
        FocalClade::new("Delta", ["AY*", "B.1.617.2"]),
        FocalClade::new("Alpha", ["B.1.1.7"]),
    ]
}

/// MRCA of the samples of `tree` whose `lineage_key` metadata matches `clade`.
///
/// `None` when no sample matches.
pub fn focal_mrca(tree: &TimeTree, lineage_key: &str, clade: &FocalClade) -> Option<NodeId> {
    let members: Vec<NodeId> = tree
        .samples()
        .into_iter()
        .filter(|&u| tree.metadata(u, lineage_key).is_some_and(|l| clade.matches(l)))
        .collect();
    if members.is_empty() {
        warn!("No samples of focal clade {} (key {lineage_key})", clade.name);
        return None;
    }
    let mrca = tree.mrca(&members);
    debug!(
        "Focal clade {}: {} samples, MRCA {:?}",
        clade.name,
        members.len(),
        mrca
    );
    mrca
}

/// Focal clade name → node, for every clade found in `tree`.
pub fn locate_focal_clades(
    tree: &TimeTree,
    lineage_key: &str,
    clades: &[FocalClade],
) -> Vec<(String, NodeId)> {
    clades
        .iter()
        .filter_map(|c| focal_mrca(tree, lineage_key, c).map(|u| (c.name.clone(), u)))
        .collect()
}

/// Display label per node: the strain of named samples, replaced by the clade
/// name at each focal MRCA. Later clades win when two share a node.
pub fn node_labels(tree: &TimeTree, focal: &[(String, NodeId)]) -> HashMap<NodeId, String> {
    let mut labels: HashMap<NodeId, String> = tree
        .samples()
        .into_iter()
        .filter(|&u| !tree.strain(u).is_empty())
        .map(|u| (u, tree.strain(u).to_string()))
        .collect();
    for (name, u) in focal {
        labels.insert(*u, name.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::four_sample_tree;
    use rstest::rstest;

    fn with_lineages(lineages: [&str; 4]) -> TimeTree {
        let mut tree = four_sample_tree(0.0);
        for (u, lineage) in (3..=6).zip(lineages) {
            tree.set_metadata(u, "pango_lineage", lineage).unwrap();
        }
        tree
    }

    #[rstest]
    #[case("AY.4", true)]
    #[case("AY", true)]
    #[case("B.1.617.2", true)]
    #[case("B.1.617.22", false)]
    #[case("BA.1", false)]
    #[case("", false)]
    fn test_delta_patterns(#[case] lineage: &str, #[case] expected: bool) {
        let delta = &default_focal_clades()[0];
        assert_eq!(delta.matches(lineage), expected);
    }

    #[test]
    fn test_focal_mrca() {
        let tree = with_lineages(["AY.4", "B.1.617.2", "B.1.1.7", "BA.2"]);
        let clades = default_focal_clades();
        assert_eq!(focal_mrca(&tree, "pango_lineage", &clades[0]), Some(1));
        // a single sample is its own MRCA
        assert_eq!(focal_mrca(&tree, "pango_lineage", &clades[1]), Some(5));
    }

    #[test]
    fn test_spread_clade_climbs_to_root() {
        let tree = with_lineages(["AY.4", "BA.1", "BA.2", "AY.25"]);
        assert_eq!(focal_mrca(&tree, "pango_lineage", &default_focal_clades()[0]), Some(0));
    }

    #[test]
    fn test_absent_clade() {
        let tree = with_lineages(["BA.1", "BA.1", "BA.2", "BA.2"]);
        assert!(locate_focal_clades(&tree, "pango_lineage", &default_focal_clades()).is_empty());
        // wrong key: nothing matches either
        let tree = with_lineages(["AY.4", "AY.4", "B.1.1.7", "B.1.1.7"]);
        assert_eq!(focal_mrca(&tree, "Nextclade_pango", &default_focal_clades()[0]), None);
    }

    #[test]
    fn test_node_labels() {
        let tree = with_lineages(["AY.4", "AY.4", "B.1.1.7", "B.1.1.7"]);
        let focal = locate_focal_clades(&tree, "pango_lineage", &default_focal_clades());
        assert_eq!(focal, vec![("Delta".to_string(), 1), ("Alpha".to_string(), 2)]);
        let labels = node_labels(&tree, &focal);
        assert_eq!(labels.len(), 6);
        assert_eq!(labels[&1], "Delta");
        assert_eq!(labels[&2], "Alpha");
        assert_eq!(labels[&3], "s1");
        assert!(!labels.contains_key(&0));
    }
}
