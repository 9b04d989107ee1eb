//! K-means partitioning.
//!
//! Lloyd-style iterative refinement over the raw element vectors of one
//! matrix axis: assign every element to its nearest centroid, recompute
//! centroids as member means, repeat until nothing moves or the iteration
//! budget is spent.
//!
//! Assignment distances use the same metric family as the distance
//! computation step, pairwise-complete over missing values; centroids are
//! element-wise means of the non-missing member values.
//!
//! # Determinism
//!
//! Only `k` and the iteration budget are exposed at the interaction
//! boundary, so the initialization policy is pinned down here: k-means++
//! seeded with [`StdRng::seed_from_u64`], default seed
//! [`KmeansClustering::DEFAULT_SEED`]. Identical input and parameters
//! always reproduce the same partition.
//!
//! # Failure Modes
//!
//! This is a heuristic local refinement, not an exact solver: the result
//! is a fixed point (or the budget ran out), never a guaranteed global
//! optimum. An iteration that strands a centroid with zero members
//! reseeds it from the element farthest from its nearest surviving
//! centroid, so the output never degenerates to fewer than `k` usable
//! groups silently.

use crate::control::RunControl;
use crate::distance::{metric_distance, Metric};
use crate::error::{Error, Result};
use crate::matrix::{Axis, DataMatrix};
use rand::prelude::*;
use tracing::debug;

/// K-means clusterer for one matrix axis.
#[derive(Debug, Clone)]
pub struct KmeansClustering {
    /// Number of clusters.
    k: usize,
    /// Maximum iterations.
    max_iter: usize,
    /// Metric family used for assignment.
    metric: Metric,
    /// Random seed.
    seed: u64,
}

impl KmeansClustering {
    /// Seed used when the caller does not provide one. Fixed so that
    /// repeated runs over the same input agree.
    pub const DEFAULT_SEED: u64 = 0x5EED;

    /// Create a new k-means clusterer producing `k` groups.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 100,
            metric: Metric::Euclidean,
            seed: Self::DEFAULT_SEED,
        }
    }

    /// Set the iteration budget.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the assignment metric (defaults to Euclidean).
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Partition the elements of `axis` into `k` groups.
    ///
    /// Fails with [`Error::InvalidClusterCount`] when `k` is 0 or exceeds
    /// the axis length, and [`Error::InvalidParameter`] for a zero
    /// iteration budget. Cancellation is polled once per iteration.
    pub fn fit(&self, data: &DataMatrix, axis: Axis, ctl: &RunControl) -> Result<Partition> {
        let n = data.axis_len(axis);

        if self.k == 0 || self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        if self.max_iter == 0 {
            return Err(Error::InvalidParameter {
                name: "iterations",
                message: "iteration budget must be at least 1",
            });
        }
        if self.metric.is_none() {
            return Err(Error::InvalidMetric);
        }

        let vectors = data.axis_vectors(axis);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut centroids = self.init_centroids(&vectors, &mut rng);
        let mut assignment = self.assign(&vectors, &centroids);

        for iter in 0..self.max_iter {
            ctl.checkpoint()?;
            ctl.tick(iter);

            self.update_centroids(&vectors, &assignment, &mut centroids);

            let next = self.assign(&vectors, &centroids);
            if next == assignment {
                debug!(iter, "k-means converged");
                break;
            }
            assignment = next;
        }

        Ok(Partition {
            k: self.k,
            assignment,
            centroids,
        })
    }

    /// K-means++ initialization: first centroid drawn uniformly, each
    /// subsequent one proportional to the squared distance from its
    /// nearest already-chosen centroid.
    fn init_centroids(&self, vectors: &[Vec<f64>], rng: &mut StdRng) -> Vec<Vec<f64>> {
        let n = vectors.len();
        let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(self.k);

        let first = rng.random_range(0..n);
        centroids.push(vectors[first].clone());

        while centroids.len() < self.k {
            let weights: Vec<f64> = vectors
                .iter()
                .map(|v| {
                    let d = centroids
                        .iter()
                        .map(|c| self.distance(v, c))
                        .fold(f64::INFINITY, f64::min);
                    if d.is_finite() {
                        d * d
                    } else {
                        0.0
                    }
                })
                .collect();

            let total: f64 = weights.iter().sum();
            if total == 0.0 {
                // All remaining elements coincide with a centroid.
                let idx = rng.random_range(0..n);
                centroids.push(vectors[idx].clone());
                continue;
            }

            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = n - 1;
            for (i, &w) in weights.iter().enumerate() {
                cumsum += w;
                if cumsum >= threshold {
                    selected = i;
                    break;
                }
            }
            centroids.push(vectors[selected].clone());
        }

        centroids
    }

    /// Metric distance with NaN (no usable overlap) treated as maximal.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let d = metric_distance(self.metric, a, b);
        if d.is_nan() {
            f64::INFINITY
        } else {
            d
        }
    }

    /// Nearest-centroid assignment; ties go to the lower group id.
    fn assign(&self, vectors: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
        vectors
            .iter()
            .map(|v| {
                let mut best_group = 0;
                let mut best_d = f64::INFINITY;
                for (g, c) in centroids.iter().enumerate() {
                    let d = self.distance(v, c);
                    if d < best_d {
                        best_d = d;
                        best_group = g;
                    }
                }
                best_group
            })
            .collect()
    }

    /// Recompute centroids as element-wise means of their members,
    /// reseeding any centroid left without members.
    fn update_centroids(
        &self,
        vectors: &[Vec<f64>],
        assignment: &[usize],
        centroids: &mut [Vec<f64>],
    ) {
        let dim = vectors[0].len();
        let mut sums = vec![vec![0.0f64; dim]; self.k];
        let mut counts = vec![vec![0usize; dim]; self.k];
        let mut members = vec![0usize; self.k];

        for (v, &g) in vectors.iter().zip(assignment.iter()) {
            members[g] += 1;
            for (pos, &value) in v.iter().enumerate() {
                if !DataMatrix::is_missing(value) {
                    sums[g][pos] += value;
                    counts[g][pos] += 1;
                }
            }
        }

        let mut reseeded: Vec<usize> = Vec::new();
        for g in 0..self.k {
            if members[g] == 0 {
                // Reseed from the element farthest from its nearest
                // surviving centroid.
                let survivors: Vec<usize> = (0..self.k).filter(|&c| members[c] > 0).collect();
                let farthest = (0..vectors.len())
                    .filter(|i| !reseeded.contains(i))
                    .max_by(|&a, &b| {
                        let da = self.nearest_distance(&vectors[a], centroids, &survivors);
                        let db = self.nearest_distance(&vectors[b], centroids, &survivors);
                        da.total_cmp(&db)
                    });
                if let Some(idx) = farthest {
                    debug!(group = g, element = idx, "reseeding empty cluster");
                    centroids[g] = vectors[idx].clone();
                    reseeded.push(idx);
                }
                continue;
            }

            for pos in 0..dim {
                centroids[g][pos] = if counts[g][pos] > 0 {
                    sums[g][pos] / counts[g][pos] as f64
                } else {
                    f64::NAN
                };
            }
        }
    }

    fn nearest_distance(&self, v: &[f64], centroids: &[Vec<f64>], groups: &[usize]) -> f64 {
        groups
            .iter()
            .map(|&g| self.distance(v, &centroids[g]))
            .fold(f64::INFINITY, f64::min)
    }
}

/// The result of a k-means run: a group per element plus the final
/// centroids (NaN where no member carried data at a position).
#[derive(Debug, Clone)]
pub struct Partition {
    k: usize,
    /// Group id in `[0, k)` per element, by original index.
    assignment: Vec<usize>,
    /// One centroid per group, in the element-vector space.
    centroids: Vec<Vec<f64>>,
}

impl Partition {
    /// Number of groups.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    /// Whether the partition is empty.
    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }

    /// Group of one element.
    pub fn group_of(&self, element: usize) -> usize {
        self.assignment[element]
    }

    /// Group assignment by original element index.
    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Final centroids.
    pub fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CancelToken;

    fn ctl() -> RunControl {
        RunControl::detached(CancelToken::new())
    }

    fn matrix(rows: &[Vec<f64>]) -> DataMatrix {
        DataMatrix::from_rows(rows).unwrap()
    }

    fn separated() -> DataMatrix {
        matrix(&[
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 4.0],
            vec![9.0, 8.0, 7.0],
            vec![9.0, 9.0, 9.0],
        ])
    }

    #[test]
    fn test_separated_groups_converge() {
        let partition = KmeansClustering::new(2)
            .with_max_iter(10)
            .fit(&separated(), Axis::Row, &ctl())
            .unwrap();

        let a = partition.group_of(0);
        let b = partition.group_of(2);
        assert_eq!(partition.group_of(1), a);
        assert_eq!(partition.group_of(3), b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_element_assigned_in_range() {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![i as f64 * 0.25, (i % 7) as f64])
            .collect();

        let partition = KmeansClustering::new(5)
            .fit(&matrix(&rows), Axis::Row, &ctl())
            .unwrap();

        assert_eq!(partition.len(), 40);
        for &g in partition.assignment() {
            assert!(g < 5, "group {} out of range", g);
        }
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![(i * 13 % 17) as f64, i as f64]).collect();
        let m = matrix(&rows);

        let run = |seed| {
            KmeansClustering::new(4)
                .with_seed(seed)
                .fit(&m, Axis::Row, &ctl())
                .unwrap()
                .assignment()
                .to_vec()
        };

        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_converged_assignment_is_fixed_point() {
        let kmeans = KmeansClustering::new(2).with_max_iter(50);
        let m = separated();
        let partition = kmeans.fit(&m, Axis::Row, &ctl()).unwrap();

        let again = kmeans.assign(&m.axis_vectors(Axis::Row), partition.centroids());
        assert_eq!(again, partition.assignment());
    }

    #[test]
    fn test_k_equals_n() {
        let m = matrix(&[vec![0.0, 0.0], vec![5.0, 0.0], vec![0.0, 5.0]]);
        let partition = KmeansClustering::new(3).fit(&m, Axis::Row, &ctl()).unwrap();

        let unique: std::collections::HashSet<_> =
            partition.assignment().iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let m = separated();

        assert_eq!(
            KmeansClustering::new(0).fit(&m, Axis::Row, &ctl()).unwrap_err(),
            Error::InvalidClusterCount {
                requested: 0,
                n_items: 4
            }
        );
        assert_eq!(
            KmeansClustering::new(9).fit(&m, Axis::Row, &ctl()).unwrap_err(),
            Error::InvalidClusterCount {
                requested: 9,
                n_items: 4
            }
        );
        assert!(matches!(
            KmeansClustering::new(2)
                .with_max_iter(0)
                .fit(&m, Axis::Row, &ctl())
                .unwrap_err(),
            Error::InvalidParameter { name: "iterations", .. }
        ));
    }

    #[test]
    fn test_duplicate_heavy_input_keeps_coverage() {
        // Three coincident elements and one outlier; k = 3 forces the
        // degenerate-initialization and empty-cluster paths.
        let m = matrix(&[
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
            vec![10.0, 10.0],
        ]);

        let partition = KmeansClustering::new(3)
            .with_max_iter(20)
            .fit(&m, Axis::Row, &ctl())
            .unwrap();

        assert_eq!(partition.len(), 4);
        for &g in partition.assignment() {
            assert!(g < 3);
        }
    }

    #[test]
    fn test_missing_values_tolerated() {
        let m = matrix(&[
            vec![1.0, f64::NAN, 3.0],
            vec![1.0, 2.0, 3.5],
            vec![9.0, 9.0, f64::NAN],
            vec![9.0, 8.5, 9.0],
        ]);

        let partition = KmeansClustering::new(2)
            .with_max_iter(10)
            .fit(&m, Axis::Row, &ctl())
            .unwrap();

        assert_eq!(partition.group_of(0), partition.group_of(1));
        assert_eq!(partition.group_of(2), partition.group_of(3));
        assert_ne!(partition.group_of(0), partition.group_of(2));
    }

    #[test]
    fn test_cancellation_mid_iteration_loop() {
        let token = CancelToken::new();
        token.cancel();

        let result = KmeansClustering::new(2)
            .fit(&separated(), Axis::Row, &RunControl::detached(token));
        assert_eq!(result.unwrap_err(), Error::Cancelled);
    }

    #[test]
    fn test_column_axis_partitioning() {
        // Columns 0/1 are close, column 2 is far from both.
        let m = matrix(&[vec![1.0, 1.1, 50.0], vec![2.0, 2.1, 60.0]]);

        let partition = KmeansClustering::new(2)
            .fit(&m, Axis::Column, &ctl())
            .unwrap();

        assert_eq!(partition.group_of(0), partition.group_of(1));
        assert_ne!(partition.group_of(0), partition.group_of(2));
    }
}
