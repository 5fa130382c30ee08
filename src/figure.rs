//! Figure definitions and the end-to-end pipeline that builds one tanglegram.
//!
//! # Pipeline
//! ```text
//! load left/right ─► intersect ─► estimate offset ─► resolve leaf order
//!        │                                                 │
//!    TreeCache                       split hashes ◄────────┤
//!                                    time axes    ◄────────┤
//!                                    anchors      ◄────────┤
//!                                    focal clades ◄────────┘
//! ```
//!
//! Stages run strictly one after another; each consumes the output of the
//! previous one. Any error aborts the current figure and nothing else.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibrate::{TimeAxis, TimeOffset, TimeUnits, estimate_offset};
use crate::clades::{FocalClade, default_focal_clades, locate_focal_clades, node_labels};
use crate::coords::{CanvasLayout, Correspondence, map_correspondences};
use crate::error::{Result, TanglegramError};
use crate::intersect::intersect;
use crate::io::{read_metadata_tsv, read_tree_file, write_anchors_tsv, write_splits_tsv};
use crate::order::{LeafPermutation, Orientation, resolve_leaf_order};
use crate::splits::{SharedSplit, SplitIndex, shared_splits};
use crate::tree::{LoadOptions, NodeId, TimeTree};
use crate::untangle::Untangler;

/// Where one side's tree comes from and how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSource {
    /// File name relative to the data directory; `{}` is replaced by day0.
    pub path: String,
    pub time_scale: f64,
    pub min_edge_length: f64,
    pub internal_samples: bool,
    /// Optional metadata TSV, same templating as `path`.
    pub metadata: Option<String>,
    /// Metadata column holding the lineage designation.
    pub lineage_key: String,
}

impl Default for TreeSource {
    fn default() -> Self {
        TreeSource {
            path: String::new(),
            time_scale: 1.0,
            min_edge_length: 0.0,
            internal_samples: false,
            metadata: None,
            lineage_key: "pango_lineage".to_string(),
        }
    }
}

impl TreeSource {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            time_scale: self.time_scale,
            min_edge_length: self.min_edge_length,
            internal_samples: self.internal_samples,
        }
    }
}

/// Substitute `day0` for every `{}` in a file name template.
pub fn resolve_template(template: &str, day0: &str) -> String {
    template.replace("{}", day0)
}

fn default_colour_scheme() -> String {
    "Pango".to_string()
}

fn mirrored() -> Orientation {
    Orientation::Mirrored
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureConfig {
    pub name: String,
    /// ISO date the left tree's time 0 refers to.
    pub day0: String,
    pub left: TreeSource,
    pub right: TreeSource,
    #[serde(default)]
    pub units: TimeUnits,
    #[serde(default = "default_colour_scheme")]
    pub colour_scheme: String,
    #[serde(default)]
    pub left_orientation: Orientation,
    #[serde(default = "mirrored")]
    pub right_orientation: Orientation,
    #[serde(default = "default_focal_clades")]
    pub focal_clades: Vec<FocalClade>,
}

impl FigureConfig {
    /// Reject configurations that cannot possibly produce a figure.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TanglegramError::Config("figure without a name".to_string()));
        }
        for (side, source) in [("left", &self.left), ("right", &self.right)] {
            if source.path.trim().is_empty() {
                return Err(TanglegramError::Config(format!(
                    "figure {}: {side} tree has no path",
                    self.name
                )));
            }
        }
        TimeAxis::from_iso_date(&self.day0, self.units).map(|_| ())
    }
}

const NEXTSTRAIN_TREE: &str = "nextstrain_ncov_gisaid_global_all-time_timetree-2023-01-21.nex";

fn arg_figure(name: &str, day0: &str, stem: &str) -> FigureConfig {
    FigureConfig {
        name: name.to_string(),
        day0: day0.to_string(),
        left: TreeSource {
            path: format!("{stem}.nwk"),
            internal_samples: true,
            metadata: Some(format!("{stem}.metadata.tsv")),
            lineage_key: "Nextclade_pango".to_string(),
            ..Default::default()
        },
        right: TreeSource {
            path: NEXTSTRAIN_TREE.to_string(),
            // branch lengths in years
            time_scale: 365.25,
            min_edge_length: 0.0001 / 365.0,
            // lineages come from the tree's own node annotations
            ..Default::default()
        },
        units: TimeUnits::Days,
        colour_scheme: default_colour_scheme(),
        left_orientation: Orientation::Natural,
        right_orientation: Orientation::Mirrored,
        focal_clades: default_focal_clades(),
    }
}

/// The figures known without any configuration file.
pub fn builtin_figures() -> Vec<FigureConfig> {
    vec![
        arg_figure(
            "cophylogeny_wide",
            "2021-06-30",
            "upgma-full-md-30-mm-3-{}-recinfo-il",
        ),
        arg_figure(
            "supp_cophylogeny_long",
            "2022-06-30",
            "upgma-mds-1000-md-30-mm-3-{}-recinfo-il",
        ),
    ]
}

/// Named figures, built-ins first, overridden or extended by configuration.
#[derive(Debug, Clone, Default)]
pub struct FigureRegistry {
    figures: BTreeMap<String, FigureConfig>,
}

impl FigureRegistry {
    pub fn builtin() -> Self {
        let mut registry = FigureRegistry::default();
        for figure in builtin_figures() {
            registry.insert(figure);
        }
        registry
    }

    /// Add `figure`, replacing any figure of the same name.
    pub fn insert(&mut self, figure: FigureConfig) -> Option<FigureConfig> {
        self.figures.insert(figure.name.clone(), figure)
    }

    pub fn with_overrides(mut self, figures: impl IntoIterator<Item = FigureConfig>) -> Self {
        for figure in figures {
            if self.insert(figure).is_some() {
                debug!("Figure definition overridden by configuration");
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FigureConfig> {
        self.figures.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.figures.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FigureConfig> {
        self.figures.values()
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}

/// Trees loaded during one run, keyed by (day0, path template).
///
/// Figures sharing an input reuse the loaded tree instead of parsing it again.
#[derive(Debug)]
pub struct TreeCache {
    data_dir: PathBuf,
    trees: HashMap<(String, String), Arc<TimeTree>>,
}

impl TreeCache {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        TreeCache {
            data_dir: data_dir.into(),
            trees: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// The tree for `source` at `day0`, loading it on first use.
    pub fn load(&mut self, day0: &str, source: &TreeSource) -> Result<Arc<TimeTree>> {
        let key = (day0.to_string(), source.path.clone());
        if let Some(tree) = self.trees.get(&key) {
            debug!("Reusing loaded tree {}", source.path);
            return Ok(Arc::clone(tree));
        }

        let path = self.data_dir.join(resolve_template(&source.path, day0));
        let mut tree = read_tree_file(&path, &source.load_options())?;
        if let Some(metadata) = &source.metadata {
            let table = read_metadata_tsv(self.data_dir.join(resolve_template(metadata, day0)))?;
            let matched = tree.attach_metadata(&table);
            info!(
                "Attached metadata to {matched} of {} samples of {}",
                tree.num_samples(),
                path.display()
            );
        }
        info!(
            "Loaded {} ({} samples, root at {})",
            path.display(),
            tree.num_samples(),
            tree.time(tree.root())
        );

        let tree = Arc::new(tree);
        self.trees.insert(key, Arc::clone(&tree));
        Ok(tree)
    }
}

/// Everything needed to draw one tanglegram.
///
/// Both trees are renumbered so that sample ids follow drawing order.
#[derive(Debug, Clone)]
pub struct Tanglegram {
    pub name: String,
    pub colour_scheme: String,
    pub left: TimeTree,
    pub right: TimeTree,
    pub left_order: LeafPermutation,
    pub right_order: LeafPermutation,
    pub offset: TimeOffset,
    pub left_axis: TimeAxis,
    pub right_axis: TimeAxis,
    pub shared_splits: Vec<SharedSplit>,
    pub correspondences: Vec<Correspondence>,
    pub left_focal: Vec<(String, NodeId)>,
    pub right_focal: Vec<(String, NodeId)>,
    pub left_labels: HashMap<NodeId, String>,
    pub right_labels: HashMap<NodeId, String>,
}

impl Tanglegram {
    /// Write `<name>.anchors.tsv` and `<name>.splits.tsv` into `dir`.
    pub fn write_tables(&self, dir: &Path, gzip: bool) -> Result<(PathBuf, PathBuf)> {
        let suffix = if gzip { ".gz" } else { "" };
        let anchors = dir.join(format!("{}.anchors.tsv{suffix}", self.name));
        let splits = dir.join(format!("{}.splits.tsv{suffix}", self.name));
        write_anchors_tsv(&anchors, &self.correspondences)?;
        write_splits_tsv(
            &splits,
            &self.shared_splits,
            (&self.left, &self.left_axis),
            (&self.right, &self.right_axis),
        )?;
        Ok((anchors, splits))
    }
}

/// Build one figure from its configuration.
pub fn build_tanglegram(
    config: &FigureConfig,
    cache: &mut TreeCache,
    untangler: &dyn Untangler,
    layout: &CanvasLayout,
) -> Result<Tanglegram> {
    config.validate()?;
    let left = cache.load(&config.day0, &config.left)?;
    let right = cache.load(&config.day0, &config.right)?;
    tanglegram_from_trees(config, &left, &right, untangler, layout)
}

/// The pipeline proper, on already loaded trees.
pub fn tanglegram_from_trees(
    config: &FigureConfig,
    left: &TimeTree,
    right: &TimeTree,
    untangler: &dyn Untangler,
    layout: &CanvasLayout,
) -> Result<Tanglegram> {
    info!("Building {}", config.name);
    let intersection = intersect(left, right)?;

    let offset = estimate_offset(&intersection.left, &intersection.right, &intersection.pairs())?;
    info!(
        "Median time difference between trees: {} {}",
        offset.value(),
        config.units
    );

    let resolved = resolve_leaf_order(
        untangler,
        &intersection.left,
        &intersection.right,
        (config.left_orientation, config.right_orientation),
    )?;

    let shared = shared_splits(
        &SplitIndex::build(&resolved.left),
        &SplitIndex::build(&resolved.right),
    );
    info!("{} splits shared between the trees", shared.len());

    let left_axis = TimeAxis::from_iso_date(&config.day0, config.units)?;
    let right_axis = left_axis.shifted(offset)?;
    debug!(
        "Time axes: left day0 {}, right day0 {}",
        left_axis.day0, right_axis.day0
    );

    let correspondences = map_correspondences(
        &resolved.left,
        &resolved.left_order,
        &resolved.right,
        &resolved.right_order,
        layout,
    )?;

    let left_focal =
        locate_focal_clades(&resolved.left, &config.left.lineage_key, &config.focal_clades);
    let right_focal =
        locate_focal_clades(&resolved.right, &config.right.lineage_key, &config.focal_clades);
    let left_labels = node_labels(&resolved.left, &left_focal);
    let right_labels = node_labels(&resolved.right, &right_focal);

    Ok(Tanglegram {
        name: config.name.clone(),
        colour_scheme: config.colour_scheme.clone(),
        left: resolved.left,
        right: resolved.right,
        left_order: resolved.left_order,
        right_order: resolved.right_order,
        offset,
        left_axis,
        right_axis,
        shared_splits: shared,
        correspondences,
        left_focal,
        right_focal,
        left_labels,
        right_labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::parse_iso_date;
    use crate::untangle::CanonicalOrder;
    use std::fs;
    use tempfile::tempdir;

    const LEFT: &str = "(((s1:1,s2:1):3,(s3:2,s4:2):2):6,x9:10);";
    // same strains, five days younger, different internal topology for s3/s4
    const RIGHT: &str = "((s1:1,s2:1):3,((s3:1,s4:1):1,y7:2):2);";

    fn figure(name: &str) -> FigureConfig {
        FigureConfig {
            name: name.to_string(),
            day0: "2021-06-30".to_string(),
            left: TreeSource {
                path: "left-{}.nwk".to_string(),
                metadata: Some("left.tsv".to_string()),
                ..Default::default()
            },
            right: TreeSource {
                path: "right.nwk".to_string(),
                ..Default::default()
            },
            units: TimeUnits::Days,
            colour_scheme: "Pango".to_string(),
            left_orientation: Orientation::Natural,
            right_orientation: Orientation::Mirrored,
            focal_clades: default_focal_clades(),
        }
    }

    fn data_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("left-2021-06-30.nwk"), LEFT).unwrap();
        fs::write(dir.path().join("right.nwk"), RIGHT).unwrap();
        fs::write(
            dir.path().join("left.tsv"),
            "strain\tpango_lineage\ns1\tAY.4\ns2\tAY.25\ns3\tB.1.1.7\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_builtin_registry() {
        let registry = FigureRegistry::builtin();
        assert_eq!(registry.names(), vec!["cophylogeny_wide", "supp_cophylogeny_long"]);
        let wide = registry.get("cophylogeny_wide").unwrap();
        assert_eq!(wide.day0, "2021-06-30");
        assert_eq!(wide.colour_scheme, "Pango");
        assert_eq!(wide.right_orientation, Orientation::Mirrored);
        assert_eq!(
            resolve_template(&wide.left.path, &wide.day0),
            "upgma-full-md-30-mm-3-2021-06-30-recinfo-il.nwk"
        );
        // the Nextstrain tree carries its lineages as node annotations
        assert_eq!(wide.right.metadata, None);
        assert_eq!(wide.right.lineage_key, "pango_lineage");
        for figure in registry.iter() {
            figure.validate().unwrap();
        }
    }

    #[test]
    fn test_right_focal_clades_from_annotations() {
        let dir = data_dir();
        fs::write(
            dir.path().join("right.nwk"),
            r#"((s1[&pango_lineage="AY.4"]:1,s2[&pango_lineage="AY.25"]:1)[&pango_lineage="AY.4"]:3,((s3[&pango_lineage="B.1.1.7"]:1,s4:1):1,y7:2):2);"#,
        )
        .unwrap();
        let mut cache = TreeCache::new(dir.path());
        let t = build_tanglegram(&figure("f"), &mut cache, &CanonicalOrder, &CanvasLayout::default())
            .unwrap();
        let (name, u) = &t.right_focal[0];
        assert_eq!(name, "Delta");
        let mut under: Vec<&str> =
            t.right.samples_under(*u).iter().map(|&v| t.right.strain(v)).collect();
        under.sort();
        assert_eq!(under, vec!["s1", "s2"]);
        assert_eq!(t.right_labels[u], "Delta");
    }

    #[test]
    fn test_overrides_replace_by_name() {
        let registry = FigureRegistry::builtin()
            .with_overrides([figure("cophylogeny_wide"), figure("extra")]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("cophylogeny_wide").unwrap().right.path, "right.nwk");
    }

    #[test]
    fn test_validate() {
        let mut config = figure("f");
        config.day0 = "June".to_string();
        assert!(config.validate().is_err());
        let mut config = figure("f");
        config.right.path.clear();
        assert!(matches!(config.validate(), Err(TanglegramError::Config(_))));
    }

    #[test]
    fn test_cache_loads_once() {
        let dir = data_dir();
        let mut cache = TreeCache::new(dir.path());
        let config = figure("f");
        let first = cache.load(&config.day0, &config.left).unwrap();
        let second = cache.load(&config.day0, &config.left).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.num_samples(), 5);
    }

    #[test]
    fn test_missing_input_fails_figure() {
        let dir = tempdir().unwrap();
        let mut cache = TreeCache::new(dir.path());
        let result =
            build_tanglegram(&figure("f"), &mut cache, &CanonicalOrder, &CanvasLayout::default());
        assert!(matches!(result, Err(TanglegramError::Io { .. })));
    }

    #[test]
    fn test_build_tanglegram() {
        let dir = data_dir();
        let mut cache = TreeCache::new(dir.path());
        let t = build_tanglegram(&figure("f"), &mut cache, &CanonicalOrder, &CanvasLayout::default())
            .unwrap();

        // x9 and y7 are not shared
        assert_eq!(t.correspondences.len(), 4);
        // every tip is contemporary in both trees
        assert_eq!(t.offset.value(), 0.0);
        assert_eq!(t.right_axis.day0, parse_iso_date("2021-06-30").unwrap());

        // left drawn in canonical order, right mirrored
        let keys: Vec<&str> = t.correspondences.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["s1", "s2", "s3", "s4"]);
        let right_ranks: Vec<usize> = t.correspondences.iter().map(|c| c.right_rank).collect();
        assert_eq!(right_ranks, vec![3, 2, 1, 0]);

        // {s1,s2}, {s3,s4} and the root are shared
        assert_eq!(t.shared_splits.len(), 3);

        assert_eq!(t.left_focal.len(), 2);
        assert!(t.right_focal.is_empty());
        let (name, u) = &t.left_focal[0];
        assert_eq!(name, "Delta");
        assert_eq!(t.left.samples_under(*u).len(), 2);
        assert_eq!(t.left_labels[u], "Delta");

        let out = tempdir().unwrap();
        let (anchors, splits) = t.write_tables(out.path(), false).unwrap();
        assert_eq!(fs::read_to_string(anchors).unwrap().lines().count(), 5);
        assert_eq!(fs::read_to_string(splits).unwrap().lines().count(), 4);
    }

    #[test]
    fn test_shifted_right_tree() {
        let config = figure("f");
        let left = TimeTree::from_newick(LEFT, &LoadOptions::default()).unwrap();
        // the shared samples, five days older
        let mut shifted = TimeTree::with_root(20.0);
        let a = shifted.add_child(0, 9.0).unwrap();
        shifted.add_sample(a, 5.0, "s1").unwrap();
        shifted.add_sample(a, 5.0, "s2").unwrap();
        shifted.add_sample(a, 5.0, "s3").unwrap();
        shifted.add_sample(a, 5.0, "s4").unwrap();
        let t =
            tanglegram_from_trees(&config, &left, &shifted, &CanonicalOrder, &CanvasLayout::default())
                .unwrap();
        assert_eq!(t.offset.value(), -5.0);
        assert_eq!(t.right_axis.day0, parse_iso_date("2021-07-05").unwrap());
    }
}
