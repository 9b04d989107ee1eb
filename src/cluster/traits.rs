//! Clustering result traits.

use crate::cluster::kmeans::Partition;
use crate::tree::MergeTree;

/// Trait for clustering results that imply an element ordering.
///
/// Both result kinds (the hierarchical merge tree and the k-means
/// partition) reduce to a permutation of the original element indices;
/// this is the seam the reordering step works through.
pub trait LeafOrdered {
    /// The clustered element order: new position → original index.
    /// Always a bijection over `[0, N)`.
    fn leaf_order(&self) -> Vec<usize>;

    /// Number of ordered elements.
    fn n_elements(&self) -> usize;
}

impl LeafOrdered for MergeTree {
    fn leaf_order(&self) -> Vec<usize> {
        MergeTree::leaf_order(self)
    }

    fn n_elements(&self) -> usize {
        self.n_leaves()
    }
}

impl LeafOrdered for Partition {
    /// Elements ordered by ascending group id, original index within a
    /// group. Keeps the output grouped and reproducible.
    fn leaf_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| (self.group_of(i), i));
        order
    }

    fn n_elements(&self) -> usize {
        self.len()
    }
}
