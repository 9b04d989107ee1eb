//! Hierarchical (agglomerative) clustering.
//!
//! Bottom-up clustering that builds a merge tree by repeatedly fusing the
//! closest pair of live clusters until one remains. Exactly N-1 merges are
//! performed; past input validation the algorithm cannot fail, only be
//! cancelled.
//!
//! # Linkage Methods
//!
//! The key choice: how do we define "distance between clusters"?
//!
//! | Linkage | Formula | Effect |
//! |---------|---------|--------|
//! | Single | min(d(A,C), d(B,C)) | Chaining; elongated clusters |
//! | Complete | max(d(A,C), d(B,C)) | Compact, spherical clusters |
//! | Average | (nA·d(A,C) + nB·d(B,C)) / (nA+nB) | Balanced compromise |
//!
//! Distances from a freshly merged cluster to the rest are recomputed with
//! the Lance–Williams update on a working copy of the distance matrix; the
//! caller's matrix is never mutated.
//!
//! # Determinism
//!
//! Naive iteration order is not a stable tie-break, so ties are pinned
//! down explicitly: live clusters are scanned in ascending order of their
//! minimum original element index, and the first strictly-minimal pair
//! wins. Equal-distance candidates therefore resolve to the pair with the
//! lexicographically smallest (minLeaf(A), minLeaf(B)). A merged cluster
//! keeps the lower of its two slots, which preserves the scan order
//! invariant across iterations.

use crate::control::RunControl;
use crate::distance::DistanceMatrix;
use crate::error::{Error, Result};
use crate::tree::MergeTree;

/// Linkage method for hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Single linkage: minimum distance between clusters.
    Single,
    /// Complete linkage: maximum distance between clusters.
    Complete,
    /// Average linkage: size-weighted mean distance between clusters.
    Average,
}

impl Linkage {
    /// Lowercase name used in artifact file stems ("single", ...).
    pub fn name(self) -> &'static str {
        match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        }
    }
}

/// Hierarchical (agglomerative) clusterer over a precomputed
/// [`DistanceMatrix`].
#[derive(Debug, Clone)]
pub struct HierarchicalClustering {
    /// Linkage method.
    linkage: Linkage,
}

impl Default for HierarchicalClustering {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchicalClustering {
    /// Create a new hierarchical clusterer with average linkage.
    pub fn new() -> Self {
        Self {
            linkage: Linkage::Average,
        }
    }

    /// Set linkage method.
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// The configured linkage.
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// Run the full agglomeration and return the merge tree.
    ///
    /// Fails with [`Error::DegenerateInput`] for fewer than 2 elements.
    /// Cancellation is polled once per merge.
    pub fn fit(&self, distances: &DistanceMatrix, ctl: &RunControl) -> Result<MergeTree> {
        let n = distances.size();
        if n < 2 {
            return Err(Error::DegenerateInput { n_items: n });
        }

        // Working full-symmetric copy; the original matrix stays intact
        // for the caller.
        let mut work = vec![0.0f64; n * n];
        for i in 0..n {
            for j in 0..n {
                work[i * n + j] = distances.get(i, j);
            }
        }

        // Slot state. A cluster always occupies the slot of its minimum
        // original element, so ascending slot order is ascending
        // min-element order.
        let mut alive = vec![true; n];
        let mut size = vec![1usize; n];
        let mut node_id: Vec<usize> = (0..n).collect();

        let mut tree = MergeTree::new(n);

        for step in 0..n - 1 {
            ctl.checkpoint()?;
            ctl.tick(step);

            // Find the minimal live pair; strict < keeps the first
            // (lexicographically smallest) pair on ties.
            let mut best = (0usize, 0usize);
            let mut best_d = f64::INFINITY;
            for i in 0..n {
                if !alive[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if !alive[j] {
                        continue;
                    }
                    let d = work[i * n + j];
                    if d < best_d {
                        best_d = d;
                        best = (i, j);
                    }
                }
            }

            let (i, j) = best;
            let merged = tree.push_merge(node_id[i], node_id[j], best_d);

            // Lance–Williams update of distances from the merged cluster
            // to every other live cluster.
            for c in 0..n {
                if !alive[c] || c == i || c == j {
                    continue;
                }
                let d_ic = work[i * n + c];
                let d_jc = work[j * n + c];
                let d_new = match self.linkage {
                    Linkage::Single => d_ic.min(d_jc),
                    Linkage::Complete => d_ic.max(d_jc),
                    Linkage::Average => {
                        let si = size[i] as f64;
                        let sj = size[j] as f64;
                        (si * d_ic + sj * d_jc) / (si + sj)
                    }
                };
                work[i * n + c] = d_new;
                work[c * n + i] = d_new;
            }

            size[i] += size[j];
            node_id[i] = merged;
            alive[j] = false;
        }

        Ok(tree)
    }
}
