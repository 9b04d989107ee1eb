//! Persisted clustered artifacts.
//!
//! A clustering run ends with a small family of tab-separated text files,
//! one table each, so any reader can reconstruct the clustered view
//! without re-running the algorithms:
//!
//! - `<stem>.cdt`: the reordered data table, labels in the new order plus
//!   the matrix values. Rows clustered into a tree get a leading `GID`
//!   column of `ROW{i}X` ids; columns clustered into a tree get an `AID`
//!   row of `COL{j}X` ids. The ids key into the tree tables.
//! - `<stem>.gtr` / `<stem>.atr`: row/column merge trees, one line per
//!   internal node: `NODE{s}X  <left>  <right>  <height>`, children named
//!   by element or node id.
//! - `<stem>.kgg` / `<stem>.kag`: row/column k-means group tables,
//!   `label  group` per element in the new order.
//!
//! Values are written with `f64`'s shortest round-trip formatting, so
//! re-parsing reproduces the stored value bit-for-bit; that is the
//! artifact's precision contract.
//!
//! Each file is staged in a temp file in the destination directory and
//! persisted into place, so a failed or cancelled run never leaves a
//! partial artifact behind.

use crate::cluster::Partition;
use crate::error::{Error, Result};
use crate::matrix::{Axis, DataMatrix};
use crate::order::Permutation;
use crate::tree::MergeTree;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Locations of the files produced by one clustering run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// The reordered data table (`.cdt`).
    pub data: PathBuf,
    /// Row merge tree (`.gtr`), for tree-clustered rows.
    pub row_tree: Option<PathBuf>,
    /// Column merge tree (`.atr`), for tree-clustered columns.
    pub col_tree: Option<PathBuf>,
    /// Row group table (`.kgg`), for k-means-clustered rows.
    pub row_groups: Option<PathBuf>,
    /// Column group table (`.kag`), for k-means-clustered columns.
    pub col_groups: Option<PathBuf>,
}

/// Everything one write needs: the original matrix, labels, the per-axis
/// permutations, and whichever clustering results exist per axis.
#[derive(Debug, Clone, Copy)]
pub struct WriteJob<'a> {
    /// The original (unpermuted) data matrix.
    pub matrix: &'a DataMatrix,
    /// Row labels, by original index.
    pub row_labels: &'a [String],
    /// Column labels, by original index.
    pub col_labels: &'a [String],
    /// Row permutation (identity when rows were not clustered).
    pub row_order: &'a Permutation,
    /// Column permutation (identity when columns were not clustered).
    pub col_order: &'a Permutation,
    /// Row merge tree, when rows were hierarchically clustered.
    pub row_tree: Option<&'a MergeTree>,
    /// Column merge tree, when columns were hierarchically clustered.
    pub col_tree: Option<&'a MergeTree>,
    /// Row partition, when rows were k-means clustered.
    pub row_groups: Option<&'a Partition>,
    /// Column partition, when columns were k-means clustered.
    pub col_groups: Option<&'a Partition>,
}

/// Serializes a clustering result into its artifact files.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    stem: String,
}

impl OutputWriter {
    /// Writer producing `<dir>/<stem>.{cdt,gtr,atr,kgg,kag}`.
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    /// Write all artifact files for `job` and return their locations.
    ///
    /// Fails with [`Error::DimensionMismatch`] when labels or
    /// permutations do not match the matrix shape, and [`Error::Io`] when
    /// the destination cannot be written.
    pub fn write(&self, job: &WriteJob<'_>) -> Result<ArtifactPaths> {
        let n_rows = job.matrix.n_rows();
        let n_cols = job.matrix.n_cols();

        for (len, expected) in [
            (job.row_labels.len(), n_rows),
            (job.row_order.len(), n_rows),
            (job.col_labels.len(), n_cols),
            (job.col_order.len(), n_cols),
        ] {
            if len != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    found: len,
                });
            }
        }

        let data = self.write_file("cdt", |w| self.write_cdt(w, job))?;

        let row_tree = match job.row_tree {
            Some(tree) => Some(self.write_file("gtr", |w| write_tree(w, tree, Axis::Row))?),
            None => None,
        };
        let col_tree = match job.col_tree {
            Some(tree) => Some(self.write_file("atr", |w| write_tree(w, tree, Axis::Column))?),
            None => None,
        };
        let row_groups = match job.row_groups {
            Some(p) => Some(self.write_file("kgg", |w| {
                write_groups(w, p, job.row_labels, job.row_order)
            })?),
            None => None,
        };
        let col_groups = match job.col_groups {
            Some(p) => Some(self.write_file("kag", |w| {
                write_groups(w, p, job.col_labels, job.col_order)
            })?),
            None => None,
        };

        let paths = ArtifactPaths {
            data,
            row_tree,
            col_tree,
            row_groups,
            col_groups,
        };
        info!(path = %paths.data.display(), "clustered artifact written");

        Ok(paths)
    }

    /// Stage one file through a temp file and persist it atomically.
    fn write_file(
        &self,
        ext: &str,
        fill: impl FnOnce(&mut dyn Write) -> io::Result<()>,
    ) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.{ext}", self.stem));

        let tmp = NamedTempFile::new_in(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let mut writer = BufWriter::new(tmp);
        fill(&mut writer).map_err(|e| Error::io(&path, e))?;

        let tmp = writer
            .into_inner()
            .map_err(|e| Error::io(&path, e.into_error()))?;
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;

        Ok(path)
    }

    fn write_cdt(&self, w: &mut dyn Write, job: &WriteJob<'_>) -> io::Result<()> {
        let has_gid = job.row_tree.is_some();
        let has_aid = job.col_tree.is_some();
        let row_order = job.row_order.as_slice();
        let col_order = job.col_order.as_slice();

        // Header: [GID] NAME <column labels in new order>.
        let mut header: Vec<String> = Vec::new();
        if has_gid {
            header.push("GID".to_string());
        }
        header.push("NAME".to_string());
        for &c in col_order {
            header.push(job.col_labels[c].clone());
        }
        write_record(w, &header)?;

        // AID row keys tree-clustered columns into the .atr table.
        if has_aid {
            let mut row: Vec<String> = vec!["AID".to_string()];
            if has_gid {
                row.push(String::new());
            }
            for &c in col_order {
                row.push(element_id(Axis::Column, c));
            }
            write_record(w, &row)?;
        }

        for &r in row_order {
            let mut row: Vec<String> = Vec::new();
            if has_gid {
                row.push(element_id(Axis::Row, r));
            }
            row.push(job.row_labels[r].clone());
            for &c in col_order {
                row.push(format_value(job.matrix.get(r, c)));
            }
            write_record(w, &row)?;
        }

        Ok(())
    }
}

/// `ROW3X` / `COL7X` element ids shared by the data and tree tables.
fn element_id(axis: Axis, index: usize) -> String {
    format!("{}{index}X", axis.base_id())
}

/// `NODE5X` internal node ids. `step` is the 0-based merge step.
fn node_id(step: usize) -> String {
    format!("NODE{}X", step + 1)
}

fn child_name(tree: &MergeTree, axis: Axis, id: usize) -> String {
    if tree.is_leaf(id) {
        element_id(axis, id)
    } else {
        node_id(id - tree.n_leaves())
    }
}

/// Shortest-round-trip formatting; NaN marks missing values.
fn format_value(value: f64) -> String {
    value.to_string()
}

fn write_record(w: &mut dyn Write, cells: &[String]) -> io::Result<()> {
    writeln!(w, "{}", cells.join("\t"))
}

fn write_tree(w: &mut dyn Write, tree: &MergeTree, axis: Axis) -> io::Result<()> {
    write_record(
        w,
        &[
            "NODEID".to_string(),
            "LEFT".to_string(),
            "RIGHT".to_string(),
            "HEIGHT".to_string(),
        ],
    )?;

    for (step, node) in tree.merges().enumerate() {
        write_record(
            w,
            &[
                node_id(step),
                child_name(tree, axis, node.left),
                child_name(tree, axis, node.right),
                format_value(node.height),
            ],
        )?;
    }

    Ok(())
}

fn write_groups(
    w: &mut dyn Write,
    partition: &Partition,
    labels: &[String],
    order: &Permutation,
) -> io::Result<()> {
    write_record(w, &["NAME".to_string(), "GROUP".to_string()])?;

    for &i in order.as_slice() {
        write_record(
            w,
            &[labels[i].clone(), partition.group_of(i).to_string()],
        )?;
    }

    Ok(())
}

/// One internal node read back from a tree table.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeRecord {
    /// Node id string (`NODE3X`).
    pub node: String,
    /// Left child id string.
    pub left: String,
    /// Right child id string.
    pub right: String,
    /// Merge height.
    pub height: f64,
}

/// An artifact re-loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    /// Matrix values in stored (permuted) order; NaN marks missing.
    pub values: Vec<Vec<f64>>,
    /// `GID` ids per stored row, when rows were tree-clustered.
    pub row_ids: Option<Vec<String>>,
    /// `AID` ids per stored column, when columns were tree-clustered.
    pub col_ids: Option<Vec<String>>,
    /// Row labels in stored order.
    pub row_labels: Vec<String>,
    /// Column labels in stored order.
    pub col_labels: Vec<String>,
    /// Row tree table, when present.
    pub row_tree: Option<Vec<TreeRecord>>,
    /// Column tree table, when present.
    pub col_tree: Option<Vec<TreeRecord>>,
    /// Row `label → group` table, when present.
    pub row_groups: Option<Vec<(String, usize)>>,
    /// Column `label → group` table, when present.
    pub col_groups: Option<Vec<(String, usize)>>,
}

/// Re-load a written artifact. The returned values, labels and tree
/// tables reproduce what was written bit-for-bit; a dendrogram can be
/// redrawn from this alone.
pub fn read_artifact(paths: &ArtifactPaths) -> Result<LoadedArtifact> {
    let records = read_records(&paths.data)?;
    if records.is_empty() {
        return Err(Error::Io {
            path: paths.data.clone(),
            message: "empty artifact data table".to_string(),
        });
    }

    let header = &records[0];
    let has_gid = header.first().map(String::as_str) == Some("GID");
    let label_cols = if has_gid { 2 } else { 1 };
    if header.len() <= label_cols {
        return Err(Error::Io {
            path: paths.data.clone(),
            message: "artifact data table has no data columns".to_string(),
        });
    }
    let col_labels: Vec<String> = header[label_cols..].to_vec();

    let mut col_ids = None;
    let mut rows: Vec<&Vec<String>> = Vec::new();

    for record in &records[1..] {
        if col_ids.is_none() && record.first().map(String::as_str) == Some("AID") {
            col_ids = Some(record[label_cols..].to_vec());
            continue;
        }
        rows.push(record);
    }

    let mut row_ids = has_gid.then(Vec::new);
    let mut row_labels = Vec::with_capacity(rows.len());
    let mut values = Vec::with_capacity(rows.len());

    for record in rows {
        if record.len() != label_cols + col_labels.len() {
            return Err(Error::Io {
                path: paths.data.clone(),
                message: format!("malformed data row of {} cells", record.len()),
            });
        }
        if let Some(ids) = row_ids.as_mut() {
            ids.push(record[0].clone());
        }
        row_labels.push(record[label_cols - 1].clone());

        let row: std::result::Result<Vec<f64>, _> =
            record[label_cols..].iter().map(|s| s.parse::<f64>()).collect();
        values.push(row.map_err(|e| Error::Io {
            path: paths.data.clone(),
            message: format!("unparseable value: {e}"),
        })?);
    }

    let row_tree = paths.row_tree.as_deref().map(read_tree).transpose()?;
    let col_tree = paths.col_tree.as_deref().map(read_tree).transpose()?;
    let row_groups = paths.row_groups.as_deref().map(read_groups).transpose()?;
    let col_groups = paths.col_groups.as_deref().map(read_groups).transpose()?;

    Ok(LoadedArtifact {
        values,
        row_ids,
        col_ids,
        row_labels,
        col_labels,
        row_tree,
        col_tree,
        row_groups,
        col_groups,
    })
}

fn read_records(path: &Path) -> Result<Vec<Vec<String>>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        records.push(line.split('\t').map(str::to_string).collect());
    }
    Ok(records)
}

fn read_tree(path: &Path) -> Result<Vec<TreeRecord>> {
    let records = read_records(path)?;
    records
        .into_iter()
        .skip(1) // header
        .map(|r| {
            if r.len() != 4 {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    message: format!("malformed tree row of {} cells", r.len()),
                });
            }
            let height = r[3].parse::<f64>().map_err(|e| Error::Io {
                path: path.to_path_buf(),
                message: format!("unparseable height: {e}"),
            })?;
            Ok(TreeRecord {
                node: r[0].clone(),
                left: r[1].clone(),
                right: r[2].clone(),
                height,
            })
        })
        .collect()
}

fn read_groups(path: &Path) -> Result<Vec<(String, usize)>> {
    let records = read_records(path)?;
    records
        .into_iter()
        .skip(1)
        .map(|r| {
            if r.len() != 2 {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    message: format!("malformed group row of {} cells", r.len()),
                });
            }
            let group = r[1].parse::<usize>().map_err(|e| Error::Io {
                path: path.to_path_buf(),
                message: format!("unparseable group id: {e}"),
            })?;
            Ok((r[0].clone(), group))
        })
        .collect()
}
