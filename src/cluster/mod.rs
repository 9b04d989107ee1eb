//! Clustering algorithms over one matrix axis.
//!
//! Two mutually exclusive modes per clustering run:
//!
//! ## Hierarchical (Agglomerative)
//!
//! Bottom-up: start with each element as its own cluster, repeatedly merge
//! the two closest clusters until one remains. The merge history forms a
//! binary tree whose in-order traversal gives the element ordering; the
//! tree itself is persisted alongside the reordered matrix so a viewer can
//! redraw the dendrogram without re-running the algorithm.
//!
//! **Linkage methods** determine "distance between clusters":
//!
//! | Linkage | Distance | Effect |
//! |---------|----------|--------|
//! | Single | min(pairwise) | Chaining; elongated clusters |
//! | Complete | max(pairwise) | Compact, spherical clusters |
//! | Average | size-weighted mean | Balanced compromise |
//!
//! ## K-means
//!
//! Partition into a fixed number of groups by Lloyd refinement: assign
//! each element to the nearest centroid, move each centroid to the mean of
//! its members, repeat up to the iteration budget. Elements come out
//! ordered by group, original order within each group.
//!
//! Both modes poll a cancellation flag once per outer iteration and tick a
//! shared progress scale; see [`crate::control`].

mod hierarchical;
mod kmeans;
mod traits;

pub use hierarchical::{HierarchicalClustering, Linkage};
pub use kmeans::{KmeansClustering, Partition};
pub use traits::LeafOrdered;
