//! Ports to the leaf-untangling oracle.
//!
//! An [`Untangler`] receives the two pruned trees and answers with one leaf
//! sequence per tree that keeps connector lines between matched leaves from
//! crossing. How it finds them is its own business; the pipeline only checks
//! that each answer is a permutation of that tree's leaves.
//!
//! [`Dendroscope`] runs the external program through a file exchange:
//!
//! ```text
//! scratch dir/
//!   cophylo.nwk   ← both trees, one bracket-notation line each, leaves
//!                   labelled n<id>; overwritten by the oracle
//!   commands.txt  ← open file; compute tanglegram; save (overwrite); quit
//! ```
//!
//! The reordered trees are read back and the `n<id>` tokens of each line, in
//! order, are the answer. The scratch directory lives for one call and is
//! removed however the call ends.
//!
//! [`CanonicalOrder`] answers in-process with each tree's minlex postorder
//! leaves. It makes no attempt to reduce crossings.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::debug;

use crate::error::{Result, TanglegramError};
use crate::tree::{NodeId, TimeTree};

/// Oracle answering a two-tree untangling request.
pub trait Untangler {
    /// Leaf sequences for `left` and `right`, in drawing order.
    fn untangle(&self, left: &TimeTree, right: &TimeTree) -> Result<(Vec<NodeId>, Vec<NodeId>)>;
}

/// Leaf label used in the exchange file.
pub fn leaf_label(u: NodeId) -> String {
    format!("n{u}")
}

/// Bracket notation of `tree` with every leaf labelled `n<id>`.
pub fn oracle_newick(tree: &TimeTree) -> String {
    tree.to_newick(|u| tree.is_leaf(u).then(|| leaf_label(u)))
}

/// The external Dendroscope tanglegram program.
#[derive(Debug, Clone, PartialEq)]
pub struct Dendroscope {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before Dendroscope's own (e.g. a script path when
    /// `program` is a wrapper such as `xvfb-run` or `sh`).
    pub launcher: Vec<String>,
    /// Tanglegram method passed to `compute tanglegram method=...`.
    pub method: String,
}

impl Dendroscope {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Dendroscope {
            program: program.into(),
            launcher: Vec::new(),
            method: "nnet".to_string(),
        }
    }

    /// Command script telling the oracle to untangle `newick_path` in place.
    pub fn command_script(&self, newick_path: &Path) -> String {
        let path = newick_path.display();
        format!(
            "open file='{path}';\ncompute tanglegram method={};\nsave format=newick file='{path}';\nquit;\n",
            self.method
        )
    }

    fn run(&self, command_path: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.launcher)
            .arg("-g")
            .arg("-c")
            .arg(command_path);
        debug!("Running untangling oracle: {command:?}");

        let output = command.output().map_err(|e| {
            TanglegramError::oracle(format!(
                "could not start {}: {e}",
                self.program.display()
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TanglegramError::OracleFailure {
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    stderr.trim()
                ),
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }
}

impl Untangler for Dendroscope {
    fn untangle(&self, left: &TimeTree, right: &TimeTree) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        let (n_left, n_right) = (left.leaves().len(), right.leaves().len());
        if n_left != n_right {
            return Err(TanglegramError::precondition(format!(
                "untangling needs equal leaf counts, got {n_left} and {n_right}"
            )));
        }

        let scratch = tempfile::TempDir::new()
            .map_err(|e| TanglegramError::io("create oracle scratch directory", e))?;
        let newick_path = scratch.path().join("cophylo.nwk");
        let command_path = scratch.path().join("commands.txt");

        let input = format!("{}\n{}\n", oracle_newick(left), oracle_newick(right));
        fs::write(&newick_path, input)
            .map_err(|e| TanglegramError::io(format!("write {}", newick_path.display()), e))?;
        fs::write(&command_path, self.command_script(&newick_path))
            .map_err(|e| TanglegramError::io(format!("write {}", command_path.display()), e))?;

        self.run(&command_path)?;

        let output = fs::read_to_string(&newick_path).map_err(|e| {
            TanglegramError::oracle(format!("no readable output at {}: {e}", newick_path.display()))
        })?;
        parse_oracle_output(&output, left, right)
        // `scratch` is dropped here, removing both files
    }
}

/// Recover the two leaf sequences from the oracle's rewritten file.
///
/// Each non-empty line is one tree; its `n<id>` tokens, in order, are that
/// tree's leaf sequence. Anything other than exactly two lines, each a
/// permutation of the corresponding tree's leaves, is an `OracleFailure`.
pub fn parse_oracle_output(
    text: &str,
    left: &TimeTree,
    right: &TimeTree,
) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
    let token = Regex::new(r"\bn(\d+)\b")
        .map_err(|e| TanglegramError::oracle(format!("bad token pattern: {e}")))?;

    let mut orders = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let ids = token
            .captures_iter(line)
            .map(|c| {
                c[1].parse::<NodeId>()
                    .map_err(|e| TanglegramError::oracle(format!("bad node id {:?}: {e}", &c[1])))
            })
            .collect::<Result<Vec<_>>>()?;
        orders.push(ids);
    }
    if orders.len() != 2 {
        return Err(TanglegramError::oracle(format!(
            "expected 2 trees in oracle output, found {}",
            orders.len()
        )));
    }
    let right_order = orders.pop().unwrap_or_default();
    let left_order = orders.pop().unwrap_or_default();
    check_permutation(&left_order, left, "left")?;
    check_permutation(&right_order, right, "right")?;
    Ok((left_order, right_order))
}

/// `OracleFailure` unless `order` lists every leaf of `tree` exactly once.
pub(crate) fn check_permutation(order: &[NodeId], tree: &TimeTree, side: &str) -> Result<()> {
    let mut sorted = order.to_vec();
    sorted.sort_unstable();
    if sorted != tree.leaves() {
        return Err(TanglegramError::oracle(format!(
            "{side} tree order is not a permutation of its {} leaves",
            tree.leaves().len()
        )));
    }
    Ok(())
}

/// In-process fallback: minlex postorder leaves of each tree, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalOrder;

impl CanonicalOrder {
    fn leaves(tree: &TimeTree) -> Vec<NodeId> {
        tree.minlex_postorder()
            .into_iter()
            .filter(|&u| tree.is_leaf(u))
            .collect()
    }
}

impl Untangler for CanonicalOrder {
    fn untangle(&self, left: &TimeTree, right: &TimeTree) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        Ok((Self::leaves(left), Self::leaves(right)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::four_sample_tree;

    #[test]
    fn test_oracle_newick_labels_leaves_only() {
        let tree = four_sample_tree(0.0);
        assert_eq!(oracle_newick(&tree), "((n3:4,n4:4):6,(n5:2,n6:2):7);");
    }

    #[test]
    fn test_command_script() {
        let oracle = Dendroscope::new("Dendroscope");
        let script = oracle.command_script(Path::new("/tmp/x/cophylo.nwk"));
        assert_eq!(
            script,
            "open file='/tmp/x/cophylo.nwk';\ncompute tanglegram method=nnet;\nsave format=newick file='/tmp/x/cophylo.nwk';\nquit;\n"
        );
    }

    #[test]
    fn test_parse_output_in_token_order() {
        let tree = four_sample_tree(0.0);
        let text = "((n6:2,n5:2):7,(n4:4,n3:4):6);\n((n3,n4),(n5,n6));\n";
        let (left, right) = parse_oracle_output(text, &tree, &tree).unwrap();
        assert_eq!(left, vec![6, 5, 4, 3]);
        assert_eq!(right, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_parse_output_rejects_wrong_tree_count() {
        let tree = four_sample_tree(0.0);
        let err = parse_oracle_output("((n3,n4),(n5,n6));\n", &tree, &tree).unwrap_err();
        assert!(matches!(err, TanglegramError::OracleFailure { .. }));
    }

    #[test]
    fn test_parse_output_rejects_non_permutation() {
        let tree = four_sample_tree(0.0);
        let text = "((n3,n4),(n5,n6));\n((n3,n3),(n5,n6));\n";
        assert!(parse_oracle_output(text, &tree, &tree).is_err());
        let text = "((n3,n4),(n5,n6));\n((n3,n4),(n5,n9));\n";
        assert!(parse_oracle_output(text, &tree, &tree).is_err());
    }

    #[test]
    fn test_canonical_order() {
        let tree = four_sample_tree(0.0);
        let (left, right) = CanonicalOrder.untangle(&tree, &tree).unwrap();
        assert_eq!(left, vec![3, 4, 5, 6]);
        assert_eq!(left, right);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use tempfile::TempDir;

        /// Oracle stand-in: `sh <script> -g -c <commands>`.
        fn scripted(dir: &TempDir, body: &str) -> Dendroscope {
            let script = dir.path().join("oracle.sh");
            fs::write(&script, body).unwrap();
            Dendroscope {
                program: PathBuf::from("sh"),
                launcher: vec![script.display().to_string()],
                method: "nnet".to_string(),
            }
        }

        // $3 is the command file; its first line names the exchange file.
        const EXCHANGE_FILE: &str =
            "f=$(sed -n \"s/^open file='\\(.*\\)';$/\\1/p\" \"$3\")\n";

        #[test]
        fn test_untouched_file_returns_input_order() {
            let dir = TempDir::new().unwrap();
            let oracle = scripted(&dir, "exit 0\n");
            let tree = four_sample_tree(0.0);
            let (left, right) = oracle.untangle(&tree, &tree).unwrap();
            assert_eq!(left, vec![3, 4, 5, 6]);
            assert_eq!(right, vec![3, 4, 5, 6]);
        }

        #[test]
        fn test_rewritten_file_is_parsed() {
            let dir = TempDir::new().unwrap();
            let body = format!(
                "{EXCHANGE_FILE}printf '((n5,n6),(n4,n3));\\n((n6,n5),(n3,n4));\\n' > \"$f\"\n"
            );
            let oracle = scripted(&dir, &body);
            let tree = four_sample_tree(0.0);
            let (left, right) = oracle.untangle(&tree, &tree).unwrap();
            assert_eq!(left, vec![5, 6, 4, 3]);
            assert_eq!(right, vec![6, 5, 3, 4]);
        }

        #[test]
        fn test_nonzero_exit_is_oracle_failure() {
            let dir = TempDir::new().unwrap();
            let oracle = scripted(&dir, "echo boom >&2\nexit 3\n");
            let tree = four_sample_tree(0.0);
            match oracle.untangle(&tree, &tree) {
                Err(TanglegramError::OracleFailure { exit_code, message }) => {
                    assert_eq!(exit_code, Some(3));
                    assert!(message.contains("boom"));
                }
                other => panic!("expected oracle failure, got {other:?}"),
            }
        }

        #[test]
        fn test_missing_output_is_oracle_failure() {
            let dir = TempDir::new().unwrap();
            let oracle = scripted(&dir, &format!("{EXCHANGE_FILE}rm \"$f\"\n"));
            let tree = four_sample_tree(0.0);
            assert!(matches!(
                oracle.untangle(&tree, &tree),
                Err(TanglegramError::OracleFailure { .. })
            ));
        }

        #[test]
        fn test_garbage_output_is_oracle_failure() {
            let dir = TempDir::new().unwrap();
            let oracle = scripted(&dir, &format!("{EXCHANGE_FILE}echo nothing > \"$f\"\n"));
            let tree = four_sample_tree(0.0);
            assert!(matches!(
                oracle.untangle(&tree, &tree),
                Err(TanglegramError::OracleFailure { .. })
            ));
        }

        #[test]
        fn test_missing_program_is_oracle_failure() {
            let oracle = Dendroscope::new("/nonexistent/dendroscope");
            let tree = four_sample_tree(0.0);
            assert!(matches!(
                oracle.untangle(&tree, &tree),
                Err(TanglegramError::OracleFailure { .. })
            ));
        }

        #[test]
        fn test_scratch_directory_removed() {
            let dir = TempDir::new().unwrap();
            let record = dir.path().join("seen");
            let body = format!("{EXCHANGE_FILE}dirname \"$f\" > '{}'\nexit 1\n", record.display());
            let oracle = scripted(&dir, &body);
            let tree = four_sample_tree(0.0);
            assert!(oracle.untangle(&tree, &tree).is_err());
            let scratch = fs::read_to_string(&record).unwrap();
            assert!(!Path::new(scratch.trim()).exists());
        }
    }
}
