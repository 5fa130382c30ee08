use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use phylotree::tree::Tree;
use tracing::debug;

use crate::calibrate::TimeAxis;
use crate::coords::Correspondence;
use crate::error::{Result, TanglegramError};
use crate::splits::SharedSplit;
use crate::tree::{LoadOptions, TimeTree};

/// Metadata rows keyed by strain, one map of column → value per row.
pub type MetadataTable = HashMap<String, BTreeMap<String, String>>;

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

/// Strip BEAST annotations from Newick strings.
///
/// BEAST format includes annotations like :[&rate=0.123]2.45 where 2.45 is the actual branch length.
/// This function removes the [&...] annotations while preserving the branch lengths.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

/// Key/value annotations of every node, in preorder with children in file order.
///
/// Nextstrain and BEAST attach `[&key=value,...]` comments to a node, after
/// its label or inside its branch length. Comments without `&` are ignored,
/// as are entries without `=` (such as the `[&R]` rooting flag).
fn node_annotations(newick: &str) -> std::result::Result<Annotations, String> {
    let mut nodes = vec![BTreeMap::new()];
    let mut open: Vec<usize> = Vec::new();
    let mut current = 0;
    let mut chars = newick.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '(' => {
                open.push(current);
                current = nodes.len();
                nodes.push(BTreeMap::new());
            }
            ',' => {
                if open.is_empty() {
                    return Err("',' outside of any subtree".to_string());
                }
                current = nodes.len();
                nodes.push(BTreeMap::new());
            }
            ')' => {
                current = open.pop().ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            '\'' | '"' => {
                // quoted label: skip to the matching quote
                for c in chars.by_ref() {
                    if c == ch {
                        break;
                    }
                }
            }
            '[' => {
                let comment: String = chars.by_ref().take_while(|&c| c != ']').collect();
                if let Some(body) = comment.strip_prefix('&') {
                    nodes[current].extend(parse_annotation(body));
                }
            }
            ';' => break,
            _ => {}
        }
    }
    if !open.is_empty() {
        return Err("unbalanced '('".to_string());
    }
    Ok(nodes)
}

/// Split `key=value,key={a,b},key="x"` on its top-level commas.
fn parse_annotation(body: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let (mut depth, mut quoted, mut start) = (0usize, false, 0);
    for (i, c) in body.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '{' if !quoted => depth += 1,
            '}' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                fields.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&body[start..]);

    fields
        .into_iter()
        .filter_map(|field| {
            let (key, value) = field.split_once('=')?;
            let key = key.trim().trim_start_matches('&');
            if key.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Read one tree from a Newick or NEXUS file.
///
/// NEXUS is recognised by its `#NEXUS` header; the first `TREE` statement is
/// used and tip ids are renamed through the TRANSLATE block when present.
/// Plain files are read up to the first `;`.
///
/// `[&key=value,...]` node annotations become node metadata, on internal
/// nodes as well as samples.
pub fn read_tree_file<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<TimeTree> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| TanglegramError::io(format!("reading tree {}", path.display()), e))?;
    let (tree, annotations) = parse_tree_text(&content)
        .map_err(|e| TanglegramError::Parse(format!("{}: {e}", path.display())))?;

    let mut tree = TimeTree::from_phylo(&tree, options)?;
    // from_phylo numbers nodes in preorder, the order annotations were collected in
    if annotations.len() != tree.num_nodes() {
        return Err(TanglegramError::Parse(format!(
            "{}: found annotations for {} nodes, tree has {}",
            path.display(),
            annotations.len(),
            tree.num_nodes()
        )));
    }
    let mut annotated = 0;
    for (u, fields) in annotations.into_iter().enumerate() {
        annotated += usize::from(!fields.is_empty());
        for (key, value) in fields {
            tree.set_metadata(u, key, value)?;
        }
    }
    if annotated > 0 {
        debug!("{annotated} annotated nodes in {}", path.display());
    }
    let tree = if options.time_scale == 1.0 {
        tree
    } else {
        tree.rescaled(options.time_scale)?
    };
    debug!(
        "Loaded {} nodes ({} samples) from {}",
        tree.num_nodes(),
        tree.num_samples(),
        path.display()
    );
    Ok(tree)
}

type Annotations = Vec<BTreeMap<String, String>>;

fn parse_tree_text(content: &str) -> std::result::Result<(Tree, Annotations), String> {
    if content.trim_start().to_ascii_uppercase().starts_with("#NEXUS") {
        let block = collect_tree_blocks(content)
            .into_iter()
            .next()
            .ok_or_else(|| "no TREE statement in NEXUS file".to_string())?;
        debug!("Using NEXUS statement {:?}", block.header);
        let annotations = node_annotations(&block.body)?;
        let newick = strip_beast_annotations(&block.body);
        let mut tree = Tree::from_newick(newick.trim()).map_err(|e| e.to_string())?;
        let taxons = parse_taxon_block(content);
        if !taxons.is_empty() {
            rename_leaf_nodes(&mut tree, &taxons);
        }
        Ok((tree, annotations))
    } else {
        let end = content.find(';').ok_or_else(|| "missing ';'".to_string())?;
        let annotations = node_annotations(&content[..=end])?;
        let newick = strip_beast_annotations(&content[..=end]);
        let tree = Tree::from_newick(newick.trim()).map_err(|e| e.to_string())?;
        Ok((tree, annotations))
    }
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let (header, body) = line.split_once('=')?;
            Some(TreeBlock {
                header: header.trim(),
                body: body.trim().to_string(),
            })
        })
        .collect()
}

fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    // the block ends at a lone ';' or with the entry that carries it
    let mut closed = false;
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(move |line| {
            let line = line.trim();
            if closed || line.starts_with(';') {
                return false;
            }
            closed = line.ends_with(';');
            true
        })
        // STRUCTURE:
        // 1 'hCoV-19/England/MILK-9E05B3/2020',
        // 2 'hCoV-19/Wales/PHWC-4A8F5/2020';
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(';').trim_end_matches(',');
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect::<HashMap<_, _>>()
}

/// Replace leaf names by their TRANSLATE label; names without one are kept.
fn rename_leaf_nodes(phylo_tree: &mut Tree, translate: &HashMap<String, String>) {
    for leaf_id in phylo_tree.get_leaves() {
        if let Ok(node) = phylo_tree.get_mut(&leaf_id) {
            if let Some(label) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(label.clone());
            }
        }
    }
}

/// Read a tab-separated metadata sidecar (optionally gzip-compressed).
///
/// The first row names the columns and the first column holds the strain.
/// Empty cells are omitted from the row.
pub fn read_metadata_tsv<P: AsRef<Path>>(path: P) -> Result<MetadataTable> {
    let path = path.as_ref();
    let context = || format!("reading metadata {}", path.display());
    let file = File::open(path).map_err(|e| TanglegramError::io(context(), e))?;
    let reader: Box<dyn Read> = if is_gz(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut lines = BufReader::new(reader).lines();
    let header: Vec<String> = match lines.next() {
        Some(line) => line
            .map_err(|e| TanglegramError::io(context(), e))?
            .split('\t')
            .map(|s| s.trim().to_string())
            .collect(),
        None => return Ok(HashMap::new()),
    };

    let mut table = HashMap::new();
    for (i, line) in lines.enumerate() {
        let line = line.map_err(|e| TanglegramError::io(context(), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() > header.len() {
            return Err(TanglegramError::Parse(format!(
                "{}: row {} has {} fields, header has {}",
                path.display(),
                i + 2,
                fields.len(),
                header.len()
            )));
        }
        let row: BTreeMap<String, String> = header[1..]
            .iter()
            .zip(&fields[1..])
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();
        table.insert(fields[0].trim().to_string(), row);
    }
    debug!("Read {} metadata rows from {}", table.len(), path.display());
    Ok(table)
}

/// Open `path` for writing, gzip-compressed when it ends in `.gz`.
/// Writing to stdout (`-`) is not supported.
fn create_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Err(TanglegramError::io(
            "opening output",
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "writing to stdout is not supported",
            ),
        ));
    }
    let f = File::create(path)
        .map_err(|e| TanglegramError::io(format!("creating {}", path.display()), e))?;
    Ok(if is_gz(path) {
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(f))
    })
}

fn write_rows<P, I>(path: P, header: &[&str], rows: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Vec<String>>,
{
    let path = path.as_ref();
    let mut out = create_output(path)?;
    write_table(&mut out, header, rows)
        .map_err(|e| TanglegramError::io(format!("writing {}", path.display()), e))
}

fn write_table<I>(out: &mut dyn Write, header: &[&str], rows: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    writeln!(out, "{}", header.join("\t"))?;
    for row in rows {
        writeln!(out, "{}", row.join("\t"))?;
    }
    out.flush()
}

/// Write one row per correspondence, in left drawing order.
pub fn write_anchors_tsv<P: AsRef<Path>>(path: P, correspondences: &[Correspondence]) -> Result<()> {
    write_rows(
        path,
        &[
            "key", "left_node", "right_node", "left_rank", "right_rank", "left_x", "left_y",
            "right_x", "right_y",
        ],
        correspondences.iter().map(|c| {
            vec![
                c.key.clone(),
                c.left_node.to_string(),
                c.right_node.to_string(),
                c.left_rank.to_string(),
                c.right_rank.to_string(),
                c.left.x.to_string(),
                c.left.y.to_string(),
                c.right.x.to_string(),
                c.right.y.to_string(),
            ]
        }),
    )
}

/// Write one row per shared split with its node times and calendar dates.
pub fn write_splits_tsv<P: AsRef<Path>>(
    path: P,
    splits: &[SharedSplit],
    (left, left_axis): (&TimeTree, &TimeAxis),
    (right, right_axis): (&TimeTree, &TimeAxis),
) -> Result<()> {
    // dates are resolved before the file is created, so a bad time leaves no partial table
    let rows = splits
        .iter()
        .map(|s| {
            let (t_left, t_right) = (left.time(s.left), right.time(s.right));
            Ok(vec![
                s.hash.to_string(),
                s.left.to_string(),
                s.right.to_string(),
                left.samples_under(s.left).len().to_string(),
                t_left.to_string(),
                t_right.to_string(),
                left_axis.date_of(t_left)?.format("%Y-%m-%d").to_string(),
                right_axis.date_of(t_right)?.format("%Y-%m-%d").to_string(),
            ])
        })
        .collect::<Result<Vec<_>>>()?;
    write_rows(
        path,
        &[
            "hash", "left_node", "right_node", "num_samples", "left_time", "right_time",
            "left_date", "right_date",
        ],
        rows,
    )
}
