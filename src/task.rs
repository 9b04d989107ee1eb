//! Clustering run coordination.
//!
//! A [`ClusterTaskCoordinator`] drives one clustering run end to end:
//! row distance → row clustering → column distance → column clustering →
//! write, skipping the steps of any axis that was not requested. All
//! per-run state is owned by the coordinator instance; progress flows out
//! through an explicit channel and cancellation flows in through a shared
//! [`CancelToken`], so nothing is communicated through shared mutable
//! state.
//!
//! The pipeline can run synchronously ([`ClusterTaskCoordinator::run`])
//! or on a dedicated background thread ([`ClusterTaskCoordinator::spawn`])
//! so an interactive caller stays responsive. Either way the result is a
//! single [`Outcome`]: the artifact locations, `Cancelled`, or
//! `Failed` with the first error. Cancellation always wins over partial
//! work; nothing is written once the flag is set.

use crate::cluster::{HierarchicalClustering, KmeansClustering, Linkage, Partition};
use crate::control::{CancelToken, ProgressEvent, RunControl};
use crate::distance::{DistanceCalculator, Metric};
use crate::error::{Error, Result};
use crate::matrix::{Axis, DataMatrix};
use crate::order::{derive_order, Permutation};
use crate::output::{ArtifactPaths, OutputWriter, WriteJob};
use crate::tree::MergeTree;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Clustering mode and its parameters for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMethod {
    /// Agglomerative clustering with the given linkage.
    Hierarchical {
        /// Linkage rule for cluster-to-cluster distances.
        linkage: Linkage,
    },
    /// K-means partitioning.
    KMeans {
        /// Number of groups.
        k: usize,
        /// Iteration budget.
        iterations: usize,
    },
}

/// What to do with one axis of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRequest {
    /// Distance metric; [`Metric::None`] skips the axis entirely.
    pub metric: Metric,
    /// Clustering mode for the axis.
    pub method: ClusterMethod,
}

impl AxisRequest {
    fn is_skipped(&self) -> bool {
        self.metric.is_none()
    }

    /// Progress units this request contributes to the run-wide scale.
    fn work_units(&self, n: usize) -> usize {
        if self.is_skipped() {
            return 0;
        }
        match self.method {
            // Distance rows plus merges.
            ClusterMethod::Hierarchical { .. } => n + n.saturating_sub(1),
            ClusterMethod::KMeans { iterations, .. } => iterations,
        }
    }

    /// Validate against the axis length before any heavy work starts.
    fn validate(&self, n: usize) -> Result<()> {
        if self.is_skipped() {
            return Ok(());
        }
        match self.method {
            ClusterMethod::Hierarchical { .. } => {
                if n < 2 {
                    return Err(Error::DegenerateInput { n_items: n });
                }
            }
            ClusterMethod::KMeans { k, iterations } => {
                if k == 0 || k > n {
                    return Err(Error::InvalidClusterCount {
                        requested: k,
                        n_items: n,
                    });
                }
                if iterations == 0 {
                    return Err(Error::InvalidParameter {
                        name: "iterations",
                        message: "iteration budget must be at least 1",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Final result of a clustering run.
#[derive(Debug)]
pub enum Outcome {
    /// The run finished and the artifact was written.
    Complete(ArtifactPaths),
    /// The run was cancelled; no artifact was written.
    Cancelled,
    /// The run failed; no artifact was written.
    Failed(Error),
}

/// Per-axis clustering result, held until both axes are done.
enum AxisResult {
    Tree(MergeTree),
    Groups(Partition),
}

impl AxisResult {
    fn permutation(result: Option<&AxisResult>, n: usize) -> Permutation {
        match result {
            Some(AxisResult::Tree(tree)) => derive_order(Some(tree), n),
            Some(AxisResult::Groups(partition)) => derive_order(Some(partition), n),
            None => derive_order(None, n),
        }
    }
}

/// Orchestrates one clustering run over a matrix.
///
/// One coordinator per run and per target artifact; independent
/// coordinators are fully independent.
#[derive(Debug, Clone)]
pub struct ClusterTaskCoordinator {
    dir: PathBuf,
    stem: String,
    progress: Option<Sender<ProgressEvent>>,
}

impl ClusterTaskCoordinator {
    /// Coordinator writing artifacts named `<stem>...` into `dir`.
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            progress: None,
        }
    }

    /// Attach a progress channel. Events never block the computation.
    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Run the whole pipeline on the calling thread.
    ///
    /// At least one axis must carry a real metric, otherwise the run
    /// fails with [`Error::NothingToCluster`] before any work happens.
    pub fn run(
        &self,
        matrix: &DataMatrix,
        row_labels: &[String],
        col_labels: &[String],
        row_request: Option<&AxisRequest>,
        col_request: Option<&AxisRequest>,
        cancel: &CancelToken,
    ) -> Outcome {
        match self.execute(
            matrix,
            row_labels,
            col_labels,
            row_request,
            col_request,
            cancel,
        ) {
            Ok(paths) => Outcome::Complete(paths),
            Err(Error::Cancelled) => {
                self.send_status("Clustering cancelled.");
                info!("clustering run cancelled");
                Outcome::Cancelled
            }
            Err(err) => {
                info!(error = %err, "clustering run failed");
                Outcome::Failed(err)
            }
        }
    }

    /// Run the pipeline on a dedicated background thread.
    ///
    /// The returned [`ClusterRun`] carries the cancellation token and the
    /// join handle for the eventual [`Outcome`].
    pub fn spawn(
        self,
        matrix: DataMatrix,
        row_labels: Vec<String>,
        col_labels: Vec<String>,
        row_request: Option<AxisRequest>,
        col_request: Option<AxisRequest>,
    ) -> ClusterRun {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = thread::spawn(move || {
            self.run(
                &matrix,
                &row_labels,
                &col_labels,
                row_request.as_ref(),
                col_request.as_ref(),
                &worker_cancel,
            )
        });

        ClusterRun { cancel, handle }
    }

    fn execute(
        &self,
        matrix: &DataMatrix,
        row_labels: &[String],
        col_labels: &[String],
        row_request: Option<&AxisRequest>,
        col_request: Option<&AxisRequest>,
        cancel: &CancelToken,
    ) -> Result<ArtifactPaths> {
        let row_request = row_request.filter(|r| !r.is_skipped());
        let col_request = col_request.filter(|r| !r.is_skipped());

        if row_request.is_none() && col_request.is_none() {
            return Err(Error::NothingToCluster);
        }

        // All input validation happens before any heavy computation.
        if let Some(req) = row_request {
            req.validate(matrix.axis_len(Axis::Row))?;
        }
        if let Some(req) = col_request {
            req.validate(matrix.axis_len(Axis::Column))?;
        }

        let max = row_request.map_or(0, |r| r.work_units(matrix.n_rows()))
            + col_request.map_or(0, |r| r.work_units(matrix.n_cols()));
        let mut ctl = RunControl::new(cancel.clone(), self.progress.clone(), max);

        ctl.status("Clustering started.");
        info!(stem = %self.stem, "clustering run started");

        let row_result = self.cluster_axis(matrix, Axis::Row, row_request, &mut ctl)?;
        let col_result = self.cluster_axis(matrix, Axis::Column, col_request, &mut ctl)?;

        ctl.checkpoint()?;
        ctl.status("Saving started.");

        let row_order = AxisResult::permutation(row_result.as_ref(), matrix.n_rows());
        let col_order = AxisResult::permutation(col_result.as_ref(), matrix.n_cols());

        let stem = self.artifact_stem(row_request, col_request);
        let paths = OutputWriter::new(&self.dir, stem).write(&WriteJob {
            matrix,
            row_labels,
            col_labels,
            row_order: &row_order,
            col_order: &col_order,
            row_tree: match &row_result {
                Some(AxisResult::Tree(tree)) => Some(tree),
                _ => None,
            },
            col_tree: match &col_result {
                Some(AxisResult::Tree(tree)) => Some(tree),
                _ => None,
            },
            row_groups: match &row_result {
                Some(AxisResult::Groups(p)) => Some(p),
                _ => None,
            },
            col_groups: match &col_result {
                Some(AxisResult::Groups(p)) => Some(p),
                _ => None,
            },
        })?;

        ctl.status("Clustering finished.");
        Ok(paths)
    }

    /// Distance + clustering for one axis; `None` request skips both.
    fn cluster_axis(
        &self,
        matrix: &DataMatrix,
        axis: Axis,
        request: Option<&AxisRequest>,
        ctl: &mut RunControl,
    ) -> Result<Option<AxisResult>> {
        let Some(request) = request else {
            return Ok(None);
        };

        let n = matrix.axis_len(axis);
        debug!(?axis, metric = ?request.metric, "clustering axis");

        match request.method {
            ClusterMethod::Hierarchical { linkage } => {
                let distances =
                    DistanceCalculator::new(request.metric).compute(matrix, axis, ctl)?;
                ctl.advance(n);

                let tree = HierarchicalClustering::new()
                    .with_linkage(linkage)
                    .fit(&distances, ctl)?;
                ctl.advance(n.saturating_sub(1));

                Ok(Some(AxisResult::Tree(tree)))
            }
            ClusterMethod::KMeans { k, iterations } => {
                // The partitioner consumes the raw axis vectors under the
                // requested metric, so no distance matrix is built here.
                let partition = KmeansClustering::new(k)
                    .with_max_iter(iterations)
                    .with_metric(request.metric)
                    .fit(matrix, axis, ctl)?;
                ctl.advance(iterations);

                Ok(Some(AxisResult::Groups(partition)))
            }
        }
    }

    /// File stem carrying the clustering parameters, in the spirit of the
    /// classic `<name>_<linkage>` / `<name>_K_G<k>` naming.
    fn artifact_stem(
        &self,
        row_request: Option<&AxisRequest>,
        col_request: Option<&AxisRequest>,
    ) -> String {
        let mut stem = self.stem.clone();
        let mut kmeans_tagged = false;

        for (request, group_tag) in [(row_request, "G"), (col_request, "A")] {
            match request.map(|r| r.method) {
                Some(ClusterMethod::Hierarchical { linkage }) => {
                    let name = linkage.name();
                    if !stem.ends_with(name) {
                        stem.push('_');
                        stem.push_str(name);
                    }
                }
                Some(ClusterMethod::KMeans { k, .. }) => {
                    if !kmeans_tagged {
                        stem.push_str("_K");
                        kmeans_tagged = true;
                    }
                    stem.push_str(&format!("_{group_tag}{k}"));
                }
                None => {}
            }
        }

        stem
    }

    fn send_status(&self, text: &str) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent::Status(text.to_string()));
        }
    }
}

/// Handle to a background clustering run.
#[derive(Debug)]
pub struct ClusterRun {
    cancel: CancelToken,
    handle: JoinHandle<Outcome>,
}

impl ClusterRun {
    /// Token shared with the running pipeline.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish and return its outcome.
    pub fn join(self) -> Outcome {
        self.handle
            .join()
            .unwrap_or_else(|_| Outcome::Failed(Error::Other("clustering worker panicked".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn labels(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn sample_matrix() -> DataMatrix {
        DataMatrix::from_rows(&[
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 4.0],
            vec![9.0, 8.0, 7.0],
            vec![9.0, 9.0, 9.0],
        ])
        .unwrap()
    }

    fn hier(metric: Metric, linkage: Linkage) -> AxisRequest {
        AxisRequest {
            metric,
            method: ClusterMethod::Hierarchical { linkage },
        }
    }

    fn kmeans(metric: Metric, k: usize, iterations: usize) -> AxisRequest {
        AxisRequest {
            metric,
            method: ClusterMethod::KMeans { k, iterations },
        }
    }

    fn dir_is_empty(dir: &std::path::Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_nothing_to_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();
        let coordinator = ClusterTaskCoordinator::new(dir.path(), "expr");

        let none_request = hier(Metric::None, Linkage::Average);
        let outcome = coordinator.run(
            &matrix,
            &labels("r", 4),
            &labels("c", 3),
            Some(&none_request),
            Some(&none_request),
            &CancelToken::new(),
        );

        assert!(matches!(outcome, Outcome::Failed(Error::NothingToCluster)));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_row_hierarchical_run_to_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();
        let (tx, rx) = mpsc::channel();

        let coordinator =
            ClusterTaskCoordinator::new(dir.path(), "expr").with_progress(tx);
        let outcome = coordinator.run(
            &matrix,
            &labels("gene", 4),
            &labels("sample", 3),
            Some(&hier(Metric::Euclidean, Linkage::Single)),
            None,
            &CancelToken::new(),
        );

        let paths = match outcome {
            Outcome::Complete(paths) => paths,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(paths.data.ends_with("expr_single.cdt"));
        assert!(paths.row_tree.is_some());
        assert!(paths.col_tree.is_none());
        assert!(paths.row_groups.is_none());

        // The clustered order keeps the separated pairs adjacent.
        let loaded = crate::output::read_artifact(&paths).unwrap();
        let pos = |label: &str| {
            loaded
                .row_labels
                .iter()
                .position(|l| l == label)
                .unwrap()
        };
        assert_eq!(pos("gene0").abs_diff(pos("gene1")), 1);
        assert_eq!(pos("gene2").abs_diff(pos("gene3")), 1);

        // Progress: ticks are monotone over one run-wide scale, with the
        // expected status bookends.
        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(
            events.first(),
            Some(&ProgressEvent::Status("Clustering started.".to_string()))
        );
        assert!(events
            .iter()
            .any(|e| *e == ProgressEvent::Status("Saving started.".to_string())));

        let ticks: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Tick { current, max } => Some((*current, *max)),
                _ => None,
            })
            .collect();
        assert!(!ticks.is_empty());
        assert!(ticks.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(ticks.iter().all(|&(current, max)| {
            // 4 distance rows + 3 merges.
            max == 7 && current < max
        }));
    }

    #[test]
    fn test_both_axes_mixed_modes() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();

        let coordinator = ClusterTaskCoordinator::new(dir.path(), "expr");
        let outcome = coordinator.run(
            &matrix,
            &labels("gene", 4),
            &labels("sample", 3),
            Some(&kmeans(Metric::Euclidean, 2, 10)),
            Some(&hier(Metric::PearsonCentered, Linkage::Average)),
            &CancelToken::new(),
        );

        let paths = match outcome {
            Outcome::Complete(paths) => paths,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(paths.data.ends_with("expr_K_G2_average.cdt"));
        assert!(paths.row_groups.is_some());
        assert!(paths.col_tree.is_some());

        let loaded = crate::output::read_artifact(&paths).unwrap();
        assert_eq!(loaded.values.len(), 4);
        assert_eq!(loaded.col_labels.len(), 3);
        assert_eq!(loaded.row_groups.unwrap().len(), 4);
        assert_eq!(loaded.col_tree.unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_parameters_fail_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();
        let (tx, rx) = mpsc::channel();

        // Column k-means is invalid (k > 3 columns); the row request must
        // not run either.
        let coordinator =
            ClusterTaskCoordinator::new(dir.path(), "expr").with_progress(tx);
        let outcome = coordinator.run(
            &matrix,
            &labels("r", 4),
            &labels("c", 3),
            Some(&hier(Metric::Euclidean, Linkage::Average)),
            Some(&kmeans(Metric::Euclidean, 9, 10)),
            &CancelToken::new(),
        );

        assert!(matches!(
            outcome,
            Outcome::Failed(Error::InvalidClusterCount {
                requested: 9,
                n_items: 3
            })
        ));
        assert!(dir_is_empty(dir.path()));
        assert!(rx
            .try_iter()
            .all(|e| !matches!(e, ProgressEvent::Tick { .. })));
    }

    #[test]
    fn test_pre_cancelled_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();
        let token = CancelToken::new();
        token.cancel();

        let coordinator = ClusterTaskCoordinator::new(dir.path(), "expr");
        let outcome = coordinator.run(
            &matrix,
            &labels("r", 4),
            &labels("c", 3),
            Some(&hier(Metric::Euclidean, Linkage::Single)),
            None,
            &token,
        );

        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_background_cancellation_latency() {
        let dir = tempfile::tempdir().unwrap();

        // Large enough that the run cannot finish before the cancel
        // request lands: 1000 elements means ~500k pair computations
        // followed by a 999-merge loop.
        let rows: Vec<Vec<f64>> = (0..1000)
            .map(|i| vec![i as f64, (i * 7 % 13) as f64, (i % 5) as f64])
            .collect();
        let matrix = DataMatrix::from_rows(&rows).unwrap();
        let (tx, rx) = mpsc::channel();

        let run = ClusterTaskCoordinator::new(dir.path(), "big")
            .with_progress(tx)
            .spawn(
                matrix,
                labels("r", 1000),
                labels("c", 3),
                Some(hier(Metric::Euclidean, Linkage::Single)),
                None,
            );

        // Wait until the pipeline is demonstrably inside its first loop,
        // then cancel.
        loop {
            match rx.recv().unwrap() {
                ProgressEvent::Tick { .. } => break,
                ProgressEvent::Status(_) => continue,
            }
        }
        run.cancel();

        assert!(matches!(run.join(), Outcome::Cancelled));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_spawned_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let matrix = sample_matrix();

        let run = ClusterTaskCoordinator::new(dir.path(), "expr").spawn(
            matrix,
            labels("r", 4),
            labels("c", 3),
            None,
            Some(kmeans(Metric::Euclidean, 2, 5)),
        );

        let outcome = run.join();
        let paths = match outcome {
            Outcome::Complete(paths) => paths,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(paths.data.ends_with("expr_K_A2.cdt"));
        assert!(paths.col_groups.is_some());
    }
}
