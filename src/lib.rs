//! # clustergram
//!
//! The clustering engine behind a heatmap/dendrogram matrix viewer:
//! pairwise distance computation, agglomerative tree building, k-means
//! partitioning, element reordering, and persistence of the clustered
//! result as a re-loadable text artifact.
//!
//! The engine consumes an already-parsed numeric matrix plus labels and
//! produces a permutation per axis, optional tree metadata, and the
//! serialized artifact; it knows nothing about rendering or file-open UI.
//!
//! ## Pipeline
//!
//! [`ClusterTaskCoordinator`] runs, per requested axis: distance matrix →
//! hierarchical tree or k-means partition → element ordering; then writes
//! the reordered matrix with per-axis tree/group tables. Long loops poll
//! a [`CancelToken`] and push [`ProgressEvent`]s through a channel, and
//! the whole pipeline can run on a background thread via
//! [`ClusterTaskCoordinator::spawn`].
//!
//! ```no_run
//! use clustergram::{
//!     AxisRequest, CancelToken, ClusterMethod, ClusterTaskCoordinator, DataMatrix,
//!     Linkage, Metric, Outcome,
//! };
//!
//! # fn main() -> clustergram::Result<()> {
//! let matrix = DataMatrix::from_rows(&[
//!     vec![1.0, 2.0, 3.0],
//!     vec![1.0, 2.0, 4.0],
//!     vec![9.0, 8.0, 7.0],
//! ])?;
//!
//! let rows = AxisRequest {
//!     metric: Metric::PearsonCentered,
//!     method: ClusterMethod::Hierarchical { linkage: Linkage::Average },
//! };
//!
//! let coordinator = ClusterTaskCoordinator::new("/tmp/out", "expr");
//! let outcome = coordinator.run(
//!     &matrix,
//!     &["a".into(), "b".into(), "c".into()],
//!     &["s1".into(), "s2".into(), "s3".into()],
//!     Some(&rows),
//!     None,
//!     &CancelToken::new(),
//! );
//!
//! if let Outcome::Complete(paths) = outcome {
//!     println!("clustered artifact at {}", paths.data.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod control;
pub mod distance;
/// Error types used across `clustergram`.
pub mod error;
pub mod matrix;
pub mod order;
pub mod output;
pub mod task;
pub mod tree;

pub use cluster::{HierarchicalClustering, KmeansClustering, LeafOrdered, Linkage, Partition};
pub use control::{CancelToken, ProgressEvent, RunControl};
pub use distance::{DistanceCalculator, DistanceMatrix, Metric};
pub use error::{Error, Result};
pub use matrix::{Axis, DataMatrix};
pub use order::{derive_order, Permutation};
pub use output::{read_artifact, ArtifactPaths, LoadedArtifact, OutputWriter, WriteJob};
pub use task::{AxisRequest, ClusterMethod, ClusterRun, ClusterTaskCoordinator, Outcome};
pub use tree::{MergeNode, MergeTree};
