//! Pairwise distance computation.
//!
//! Builds a symmetric N×N dissimilarity matrix over the elements of one
//! matrix axis. At O(N² · M) for vector length M this is the dominant
//! cost of the whole engine, so the inner loop runs over vector
//! positions and the outer loops poll cancellation once per row.
//!
//! # Metrics
//!
//! | Metric | Distance | Range |
//! |--------|----------|-------|
//! | Euclidean | sqrt(Σ (aᵢ - bᵢ)²) | [0, ∞) |
//! | CityBlock | Σ \|aᵢ - bᵢ\| | [0, ∞) |
//! | Pearson (un)centered | 1 - r | [0, 2] |
//! | Absolute correlation | 1 - \|r\| | [0, 1] |
//! | Spearman | 1 - r on average ranks | [0, 2] |
//!
//! The uncentered Pearson variants treat the mean as 0 (raw dot products);
//! the centered variants subtract the per-vector mean. Spearman rank-
//! transforms each vector (ties get their average rank) and then applies
//! centered Pearson.
//!
//! # Missing data
//!
//! All metrics are pairwise-complete: a position contributes only when
//! both vectors are non-missing there. A pair with fewer than 2
//! overlapping positions falls back to a maximal-distance sentinel
//! (1.0 for the correlation family, the largest finite distance observed
//! elsewhere in the matrix for Euclidean/CityBlock) so downstream
//! linkage never sees a non-finite value. The fallback measurably changes
//! clustering for sparse inputs and is logged when applied.

use crate::control::RunControl;
use crate::error::{Error, Result};
use crate::matrix::{Axis, DataMatrix};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Distance measure for one axis of a clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Do not cluster this axis.
    None,
    /// Pearson correlation with the mean treated as 0; distance `1 - r`.
    PearsonUncentered,
    /// Standard (mean-subtracted) Pearson correlation; distance `1 - r`.
    PearsonCentered,
    /// Uncentered correlation in absolute terms; distance `1 - |r|`.
    AbsCorrUncentered,
    /// Centered correlation in absolute terms; distance `1 - |r|`.
    AbsCorrCentered,
    /// Centered Pearson on rank-transformed values; distance `1 - rₛ`.
    Spearman,
    /// Euclidean distance over pairwise-complete positions.
    Euclidean,
    /// Manhattan / city-block distance.
    CityBlock,
}

impl Metric {
    /// Whether this metric means "skip the axis".
    pub fn is_none(self) -> bool {
        matches!(self, Metric::None)
    }

    /// Whether distances derive from a correlation coefficient.
    pub fn is_correlation(self) -> bool {
        matches!(
            self,
            Metric::PearsonUncentered
                | Metric::PearsonCentered
                | Metric::AbsCorrUncentered
                | Metric::AbsCorrCentered
                | Metric::Spearman
        )
    }
}

/// Symmetric matrix of pairwise distances, stored as the condensed
/// strictly-lower triangle (the full matrix is redundant by symmetry).
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    n: usize,
    cells: Vec<f64>,
}

impl DistanceMatrix {
    /// Zero-filled matrix for `n` elements.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            cells: vec![0.0; n * n.saturating_sub(1) / 2],
        }
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    fn index(i: usize, j: usize) -> usize {
        debug_assert!(i > j);
        i * (i - 1) / 2 + j
    }

    /// Distance between elements `i` and `j`. The diagonal is 0.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            0.0
        } else if i > j {
            self.cells[Self::index(i, j)]
        } else {
            self.cells[Self::index(j, i)]
        }
    }

    /// Set the distance between distinct elements `i` and `j`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        debug_assert_ne!(i, j);
        let idx = if i > j {
            Self::index(i, j)
        } else {
            Self::index(j, i)
        };
        self.cells[idx] = value;
    }

    /// Largest finite off-diagonal distance, if any.
    pub fn max_finite(&self) -> Option<f64> {
        self.cells
            .iter()
            .copied()
            .filter(|d| d.is_finite())
            .fold(None, |acc, d| Some(acc.map_or(d, |m: f64| m.max(d))))
    }
}

/// Computes a [`DistanceMatrix`] for one axis of a [`DataMatrix`].
///
/// Pure function of (matrix, axis, metric); holds no state between calls.
#[derive(Debug, Clone)]
pub struct DistanceCalculator {
    metric: Metric,
}

impl DistanceCalculator {
    /// Create a calculator for the given metric.
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }

    /// Compute the symmetric distance matrix for `axis`.
    ///
    /// Fails with [`Error::InvalidMetric`] for [`Metric::None`] and with
    /// [`Error::DegenerateInput`] when the axis has fewer than 2 elements.
    /// Cancellation is polled once per outer row.
    pub fn compute(
        &self,
        data: &DataMatrix,
        axis: Axis,
        ctl: &RunControl,
    ) -> Result<DistanceMatrix> {
        if self.metric.is_none() {
            return Err(Error::InvalidMetric);
        }

        let n = data.axis_len(axis);
        if n < 2 {
            return Err(Error::DegenerateInput { n_items: n });
        }

        let mut vectors = data.axis_vectors(axis);

        // Spearman reduces to centered Pearson on ranked vectors. The
        // ranking pass is cheap next to the pair loop, so it polls
        // cancellation but does not tick the progress scale.
        if self.metric == Metric::Spearman {
            for v in vectors.iter_mut() {
                ctl.checkpoint()?;
                *v = rank_with_ties(v);
            }
        }

        let mut matrix = DistanceMatrix::new(n);
        for i in 0..n {
            ctl.checkpoint()?;
            ctl.tick(i);

            #[cfg(feature = "parallel")]
            {
                let row: Vec<f64> = (0..i)
                    .into_par_iter()
                    .map(|j| self.pair_distance(&vectors[i], &vectors[j]))
                    .collect();
                for (j, d) in row.into_iter().enumerate() {
                    matrix.set(i, j, d);
                }
            }

            #[cfg(not(feature = "parallel"))]
            for j in 0..i {
                matrix.set(i, j, self.pair_distance(&vectors[i], &vectors[j]));
            }
        }

        self.patch_deficient_pairs(&mut matrix);

        Ok(matrix)
    }

    /// Distance between two vectors, NaN when fewer than 2 positions
    /// overlap (patched afterwards).
    fn pair_distance(&self, a: &[f64], b: &[f64]) -> f64 {
        metric_distance(self.metric, a, b)
    }

    /// Replace the NaN placeholders left by pairs with fewer than 2
    /// overlapping positions. Keeps the matrix total for linkage.
    fn patch_deficient_pairs(&self, matrix: &mut DistanceMatrix) {
        let fallback = if self.metric.is_correlation() {
            1.0
        } else {
            matrix.max_finite().unwrap_or(1.0)
        };

        let mut patched = 0usize;
        for cell in matrix.cells.iter_mut() {
            if cell.is_nan() {
                *cell = fallback;
                patched += 1;
            }
        }

        if patched > 0 {
            debug!(
                patched,
                fallback, "pairs with insufficient overlap set to fallback distance"
            );
        }
    }
}

/// Pairwise-complete distance between two vectors under `metric`. NaN
/// when fewer than 2 positions overlap. Shared with the k-means
/// assignment step so partitioning uses the same metric family as
/// distance computation.
pub(crate) fn metric_distance(metric: Metric, a: &[f64], b: &[f64]) -> f64 {
    match metric {
        Metric::Euclidean => magnitude_distance(a, b, true),
        Metric::CityBlock => magnitude_distance(a, b, false),
        Metric::PearsonUncentered => correlation_distance(a, b, false, false),
        Metric::PearsonCentered | Metric::Spearman => correlation_distance(a, b, true, false),
        Metric::AbsCorrUncentered => correlation_distance(a, b, false, true),
        Metric::AbsCorrCentered => correlation_distance(a, b, true, true),
        Metric::None => f64::NAN,
    }
}

/// Euclidean (`sqrt = true`) or city-block distance over pairwise-complete
/// positions. NaN when fewer than 2 positions overlap.
fn magnitude_distance(a: &[f64], b: &[f64], euclid: bool) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;

    for (&x, &y) in a.iter().zip(b.iter()) {
        if DataMatrix::is_missing(x) || DataMatrix::is_missing(y) {
            continue;
        }
        let diff = x - y;
        sum += if euclid { diff * diff } else { diff.abs() };
        count += 1;
    }

    if count < 2 {
        return f64::NAN;
    }

    if euclid {
        sum.sqrt()
    } else {
        sum
    }
}

/// Correlation-derived distance over pairwise-complete positions.
///
/// A zero root product (zero variance on the overlap) yields distance 0.0.
/// The result is truncated toward zero at 10 decimal places to suppress
/// floating-point noise such as `-1.1e-16` standing in for zero.
fn correlation_distance(a: &[f64], b: &[f64], centered: bool, absolute: bool) -> f64 {
    let mut count = 0usize;
    let mut mean_x = 0.0;
    let mut mean_y = 0.0;

    if centered {
        for (&x, &y) in a.iter().zip(b.iter()) {
            if DataMatrix::is_missing(x) || DataMatrix::is_missing(y) {
                continue;
            }
            mean_x += x;
            mean_y += y;
            count += 1;
        }
        if count < 2 {
            return f64::NAN;
        }
        mean_x /= count as f64;
        mean_y /= count as f64;
        count = 0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;

    for (&x, &y) in a.iter().zip(b.iter()) {
        if DataMatrix::is_missing(x) || DataMatrix::is_missing(y) {
            continue;
        }
        let dx = x - mean_x;
        let dy = y - mean_y;
        sum_x += dx * dx;
        sum_y += dy * dy;
        sum_xy += dx * dy;
        count += 1;
    }

    if count < 2 {
        return f64::NAN;
    }

    let root_product = sum_x.sqrt() * sum_y.sqrt();
    let distance = if root_product != 0.0 {
        let r = sum_xy / root_product;
        1.0 - if absolute { r.abs() } else { r }
    } else {
        0.0
    };

    truncate_decimals(distance)
}

/// Truncate toward zero at 10 decimal places.
fn truncate_decimals(value: f64) -> f64 {
    const SCALE: f64 = 1e10;
    (value * SCALE).trunc() / SCALE
}

/// Rank-transform a vector, missing positions staying missing. Tied
/// values receive their average rank (ranks are 1-based).
fn rank_with_ties(values: &[f64]) -> Vec<f64> {
    let mut present: Vec<usize> = (0..values.len())
        .filter(|&i| !DataMatrix::is_missing(values[i]))
        .collect();
    present.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![f64::NAN; values.len()];
    let mut pos = 0;
    while pos < present.len() {
        let mut end = pos + 1;
        while end < present.len() && values[present[end]] == values[present[pos]] {
            end += 1;
        }
        // Average of the 1-based ranks pos+1 ..= end.
        let avg = (pos + 1 + end) as f64 / 2.0;
        for &idx in &present[pos..end] {
            ranks[idx] = avg;
        }
        pos = end;
    }

    ranks
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

    fn compute(rows: &[Vec<f64>], metric: Metric) -> DistanceMatrix {
        DistanceCalculator::new(metric)
            .compute(&matrix(rows), Axis::Row, &ctl())
            .unwrap()
    }

    #[test]
    fn test_none_metric_rejected() {
        let result = DistanceCalculator::new(Metric::None).compute(
            &matrix(&[vec![1.0], vec![2.0]]),
            Axis::Row,
            &ctl(),
        );
        assert_eq!(result.unwrap_err(), Error::InvalidMetric);
    }

    #[test]
    fn test_degenerate_axis_rejected() {
        let result = DistanceCalculator::new(Metric::Euclidean).compute(
            &matrix(&[vec![1.0, 2.0]]),
            Axis::Row,
            &ctl(),
        );
        assert_eq!(result.unwrap_err(), Error::DegenerateInput { n_items: 1 });
    }

    #[test]
    fn test_euclidean_known_values() {
        let d = compute(&[vec![0.0, 0.0], vec![3.0, 4.0]], Metric::Euclidean);
        assert!((d.get(0, 1) - 5.0).abs() < 1e-12);
        assert_eq!(d.get(1, 0), d.get(0, 1));
        assert_eq!(d.get(0, 0), 0.0);
    }

    #[test]
    fn test_city_block_known_values() {
        let d = compute(&[vec![0.0, 0.0], vec![3.0, 4.0]], Metric::CityBlock);
        assert!((d.get(0, 1) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_centered_perfect_correlation() {
        // y = 2x + 1: centered r is exactly 1, so distance 0.
        let d = compute(
            &[vec![1.0, 2.0, 3.0], vec![3.0, 5.0, 7.0]],
            Metric::PearsonCentered,
        );
        assert_eq!(d.get(0, 1), 0.0);
    }

    #[test]
    fn test_pearson_centered_anticorrelation() {
        let d = compute(
            &[vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]],
            Metric::PearsonCentered,
        );
        assert!((d.get(0, 1) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_abs_corr_folds_anticorrelation() {
        let d = compute(
            &[vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]],
            Metric::AbsCorrCentered,
        );
        assert!(d.get(0, 1).abs() < 1e-9);
    }

    #[test]
    fn test_uncentered_differs_from_centered() {
        // Offset vectors: centered r = 1, uncentered r < 1.
        let rows = vec![vec![1.0, 2.0, 3.0], vec![101.0, 102.0, 103.0]];
        let centered = compute(&rows, Metric::PearsonCentered);
        let uncentered = compute(&rows, Metric::PearsonUncentered);

        assert_eq!(centered.get(0, 1), 0.0);
        assert!(uncentered.get(0, 1) > 0.0);
    }

    #[test]
    fn test_zero_variance_pair_matches_reference_behavior() {
        // A constant vector has zero variance: the root product is 0 and
        // the reference implementation reports distance 0.
        let d = compute(
            &[vec![5.0, 5.0, 5.0], vec![1.0, 2.0, 3.0]],
            Metric::PearsonCentered,
        );
        assert_eq!(d.get(0, 1), 0.0);
    }

    #[test]
    fn test_spearman_monotonic_transform_invariant() {
        // x and exp(x) have identical ranks, so rank correlation is 1.
        let rows = vec![
            vec![1.0, 2.0, 3.0, 4.0],
            vec![
                (1.0f64).exp(),
                (2.0f64).exp(),
                (3.0f64).exp(),
                (4.0f64).exp(),
            ],
        ];
        let d = compute(&rows, Metric::Spearman);
        assert_eq!(d.get(0, 1), 0.0);
    }

    #[test]
    fn test_rank_with_ties_averages() {
        let ranks = rank_with_ties(&[10.0, 20.0, 20.0, 30.0]);
        assert_eq!(ranks, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_rank_preserves_missing() {
        let ranks = rank_with_ties(&[3.0, f64::NAN, 1.0]);
        assert_eq!(ranks[0], 2.0);
        assert!(ranks[1].is_nan());
        assert_eq!(ranks[2], 1.0);
    }

    #[test]
    fn test_missing_positions_are_pairwise_excluded() {
        // Position 2 is missing in row 1, so only the first two columns
        // count: distance sqrt((0-1)^2 + (0-1)^2).
        let d = compute(
            &[vec![0.0, 0.0, 9.0], vec![1.0, 1.0, f64::NAN]],
            Metric::Euclidean,
        );
        assert!((d.get(0, 1) - (2.0f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_overlap_falls_back_for_correlation() {
        // Rows 0 and 1 share no positions; fallback is the maximal
        // correlation distance 1.0.
        let rows = vec![
            vec![1.0, 2.0, f64::NAN, f64::NAN],
            vec![f64::NAN, f64::NAN, 1.0, 2.0],
            vec![1.0, 2.0, 1.0, 2.0],
        ];
        let d = compute(&rows, Metric::PearsonCentered);
        assert_eq!(d.get(0, 1), 1.0);
    }

    #[test]
    fn test_insufficient_overlap_falls_back_to_max_observed() {
        let rows = vec![
            vec![0.0, 0.0, f64::NAN, f64::NAN],
            vec![f64::NAN, f64::NAN, 5.0, 5.0],
            vec![3.0, 4.0, 5.0, 5.0],
        ];
        let d = compute(&rows, Metric::Euclidean);

        let max_real = d.get(0, 2).max(d.get(1, 2));
        assert_eq!(d.get(0, 1), max_real);
    }

    #[test]
    fn test_symmetry_and_range_across_metrics() {
        let rows = vec![
            vec![1.0, 4.0, 2.0, 8.0],
            vec![2.0, 3.0, 7.0, 1.0],
            vec![5.0, 5.0, 5.0, 4.0],
            vec![9.0, 0.0, 3.0, 6.0],
        ];

        for metric in [
            Metric::PearsonUncentered,
            Metric::PearsonCentered,
            Metric::AbsCorrUncentered,
            Metric::AbsCorrCentered,
            Metric::Spearman,
            Metric::Euclidean,
            Metric::CityBlock,
        ] {
            let d = compute(&rows, metric);
            for i in 0..4 {
                assert_eq!(d.get(i, i), 0.0);
                for j in 0..4 {
                    let v = d.get(i, j);
                    assert_eq!(v, d.get(j, i), "{metric:?} not symmetric");
                    assert!(v >= 0.0, "{metric:?} produced negative distance");
                    assert!(v.is_finite(), "{metric:?} produced non-finite distance");
                    if metric.is_correlation() {
                        assert!(v <= 2.0, "{metric:?} out of correlation range");
                    }
                }
            }
        }
    }

    #[test]
    fn test_cancellation_stops_computation() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i * i) as f64]).collect();
        let token = CancelToken::new();
        token.cancel();

        let result = DistanceCalculator::new(Metric::Euclidean).compute(
            &matrix(&rows),
            Axis::Row,
            &RunControl::detached(token),
        );
        assert_eq!(result.unwrap_err(), Error::Cancelled);
    }

    #[test]
    fn test_column_axis_clusters_columns() {
        let rows = vec![vec![0.0, 0.0, 10.0], vec![0.0, 0.0, 10.0]];
        let d = DistanceCalculator::new(Metric::Euclidean)
            .compute(&matrix(&rows), Axis::Column, &ctl())
            .unwrap();

        assert_eq!(d.size(), 3);
        assert_eq!(d.get(0, 1), 0.0);
        assert!(d.get(0, 2) > 0.0);
    }
}
