//! Python binding layer for tanglegram construction.
//!
//! Provides Python functions to compare two Newick/NEXUS tree files: the
//! clock offset between them, the clades they share, and connector anchors
//! for a full tanglegram with in-process leaf ordering.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::calibrate::estimate_offset;
use crate::coords::{CanvasLayout, map_correspondences};
use crate::error::TanglegramError;
use crate::intersect::intersect;
use crate::io::read_tree_file;
use crate::order::{Orientation, resolve_leaf_order};
use crate::splits::{SplitIndex, shared_splits};
use crate::tree::{LoadOptions, TimeTree};
use crate::untangle::CanonicalOrder;

impl From<TanglegramError> for PyErr {
    fn from(e: TanglegramError) -> Self {
        match e {
            TanglegramError::Io { .. } | TanglegramError::OracleFailure { .. } => {
                PyRuntimeError::new_err(e.to_string())
            }
            _ => PyValueError::new_err(e.to_string()),
        }
    }
}

fn load(path: &str, time_scale: f64) -> PyResult<TimeTree> {
    let options = LoadOptions {
        time_scale,
        ..Default::default()
    };
    Ok(read_tree_file(path, &options)?)
}

/// Median time difference between matched samples of two trees.
///
/// Args:
///     left_path: Newick or NEXUS file of the reference tree
///     right_path: Newick or NEXUS file of the other tree
///     left_time_scale: Multiplier for left branch lengths (default: 1.0)
///     right_time_scale: Multiplier for right branch lengths (default: 1.0)
///
/// Returns:
///     The offset to add to right-tree times to put them on the left clock.
///
/// Raises:
///     ValueError: If the trees share no samples
#[pyfunction]
#[pyo3(signature = (left_path, right_path, left_time_scale=1.0, right_time_scale=1.0))]
fn calibration_offset(
    left_path: &str,
    right_path: &str,
    left_time_scale: f64,
    right_time_scale: f64,
) -> PyResult<f64> {
    let left = load(left_path, left_time_scale)?;
    let right = load(right_path, right_time_scale)?;
    let intersection = intersect(&left, &right)?;
    let offset = estimate_offset(&intersection.left, &intersection.right, &intersection.pairs())?;
    Ok(offset.value())
}

/// Clades present in both trees, after reducing them to their shared samples.
///
/// Returns:
///     A list of (hash, strains) tuples, where hash is the hex SHA-256 of the
///     sorted strain names and strains are the samples under the clade.
#[pyfunction]
fn common_splits(left_path: &str, right_path: &str) -> PyResult<Vec<(String, Vec<String>)>> {
    let left = load(left_path, 1.0)?;
    let right = load(right_path, 1.0)?;
    let intersection = intersect(&left, &right)?;
    let tree = &intersection.left;

    let shared = shared_splits(
        &SplitIndex::build(tree),
        &SplitIndex::build(&intersection.right),
    );
    Ok(shared
        .into_iter()
        .map(|s| {
            let mut strains: Vec<String> = tree
                .samples_under(s.left)
                .into_iter()
                .map(|u| tree.strain(u).to_string())
                .collect();
            strains.sort();
            (s.hash.to_string(), strains)
        })
        .collect())
}

/// Connector anchors for a tanglegram of two trees, leaves in canonical order.
///
/// Returns:
///     A list of (strain, left_x, left_y, right_x, right_y) tuples in left
///     drawing order, using the default canvas layout.
#[pyfunction]
#[pyo3(signature = (left_path, right_path, left_time_scale=1.0, right_time_scale=1.0, mirror_right=true))]
fn tanglegram_anchors(
    left_path: &str,
    right_path: &str,
    left_time_scale: f64,
    right_time_scale: f64,
    mirror_right: bool,
) -> PyResult<Vec<(String, f64, f64, f64, f64)>> {
    let left = load(left_path, left_time_scale)?;
    let right = load(right_path, right_time_scale)?;
    let intersection = intersect(&left, &right)?;
    let right_orientation = if mirror_right {
        Orientation::Mirrored
    } else {
        Orientation::Natural
    };
    let resolved = resolve_leaf_order(
        &CanonicalOrder,
        &intersection.left,
        &intersection.right,
        (Orientation::Natural, right_orientation),
    )?;
    let correspondences = map_correspondences(
        &resolved.left,
        &resolved.left_order,
        &resolved.right,
        &resolved.right_order,
        &CanvasLayout::default(),
    )?;
    Ok(correspondences
        .into_iter()
        .map(|c| (c.key, c.left.x, c.left.y, c.right.x, c.right.y))
        .collect())
}

/// Python module definition
#[pymodule]
fn tanglegram(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(calibration_offset, m)?)?;
    m.add_function(wrap_pyfunction!(common_splits, m)?)?;
    m.add_function(wrap_pyfunction!(tanglegram_anchors, m)?)?;
    Ok(())
}
