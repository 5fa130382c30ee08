//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules, in pipeline order:
//! - `tree`: arena time tree, Newick conversion, sample-subset simplification.
//! - `samples`: strain → sample node index (Sample Index).
//! - `intersect`: reduce two trees to their shared leaf samples (Intersector).
//! - `bitset` / `splits`: content hashes of the sample set under each node (Split Hasher).
//! - `untangle` / `order`: oracle ports and the drawing order they induce (Leaf Order Resolver).
//! - `calibrate`: median clock offset and calendar time axes (Time Calibrator).
//! - `coords`: canvas anchors for every matched leaf (Coordinate Mapper).
//! - `clades`: focal clade MRCAs and node labels.
//! - `io`: Newick/NEXUS and metadata input, TSV output.
//! - `figure` / `config`: figure registry, tree cache, the end-to-end pipeline, settings.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod calibrate;
pub mod clades;
pub mod config;
pub mod coords;
pub mod error;
pub mod figure;
pub mod intersect;
pub mod io;
pub mod order;
pub mod samples;
pub mod splits;
pub mod tree;
pub mod untangle;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use bitset::Bitset;
pub use calibrate::{TimeAxis, TimeOffset, TimeUnits, estimate_offset};
pub use coords::{Anchor, CanvasLayout, Correspondence, map_correspondences};
pub use error::{Result, TanglegramError};
pub use figure::{FigureConfig, FigureRegistry, Tanglegram, TreeCache, build_tanglegram};
pub use intersect::{Intersection, intersect};
pub use order::{LeafPermutation, Orientation, ResolvedOrder, resolve_leaf_order};
pub use samples::SampleIndex;
pub use splits::{SharedSplit, SplitHash, SplitIndex, shared_splits};
pub use tree::{LoadOptions, NodeId, TimeTree};
pub use untangle::{CanonicalOrder, Dendroscope, Untangler};
