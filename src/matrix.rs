//! Input data matrix and axis selection.
//!
//! The engine consumes a fully-parsed rectangular matrix of `f64` values.
//! Missing values are encoded as `f64::NAN`; callers that use their own
//! sentinel must map it to NaN before constructing a [`DataMatrix`]. The
//! matrix is immutable for the duration of a clustering run.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1};

/// Which axis of the matrix is being clustered.
///
/// Clustering rows treats each row as a vector over columns; clustering
/// columns treats each column as a vector over rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Cluster the rows of the matrix.
    Row,
    /// Cluster the columns of the matrix.
    Column,
}

impl Axis {
    /// Base identifier used for element ids in persisted artifacts
    /// ("ROW3X", "COL7X").
    pub fn base_id(self) -> &'static str {
        match self {
            Axis::Row => "ROW",
            Axis::Column => "COL",
        }
    }
}

/// A rectangular matrix of `f64` values, row-major, with NaN as the
/// missing-value sentinel.
#[derive(Debug, Clone)]
pub struct DataMatrix {
    values: Array2<f64>,
}

impl DataMatrix {
    /// Build a matrix from a list of equal-length rows.
    ///
    /// Returns [`Error::EmptyInput`] for zero rows or zero columns and
    /// [`Error::DimensionMismatch`] for ragged input.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        if rows.is_empty() || rows[0].is_empty() {
            return Err(Error::EmptyInput);
        }

        let n = rows.len();
        let d = rows[0].len();

        let mut flat: Vec<f64> = Vec::with_capacity(n * d);
        for row in rows {
            if row.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }

        let values = Array2::from_shape_vec((n, d), flat)
            .map_err(|_| Error::DimensionMismatch { expected: d, found: 0 })?;

        Ok(Self { values })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    /// Value at `(row, col)`. NaN means missing.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[[row, col]]
    }

    /// Whether a value is the missing sentinel.
    #[inline]
    pub fn is_missing(value: f64) -> bool {
        value.is_nan()
    }

    /// Number of elements along the given axis.
    pub fn axis_len(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.n_rows(),
            Axis::Column => self.n_cols(),
        }
    }

    /// Length of each element vector along the given axis.
    pub fn vector_len(&self, axis: Axis) -> usize {
        match axis {
            Axis::Row => self.n_cols(),
            Axis::Column => self.n_rows(),
        }
    }

    /// View of one element vector along the given axis.
    pub fn vector(&self, axis: Axis, index: usize) -> ArrayView1<'_, f64> {
        match axis {
            Axis::Row => self.values.row(index),
            Axis::Column => self.values.column(index),
        }
    }

    /// Copy of all element vectors along the given axis. Columns are
    /// materialized so downstream loops read contiguous slices.
    pub fn axis_vectors(&self, axis: Axis) -> Vec<Vec<f64>> {
        (0..self.axis_len(axis))
            .map(|i| self.vector(axis, i).to_vec())
            .collect()
    }

    /// A new matrix with rows and columns permuted. `row_order[p]` and
    /// `col_order[p]` give the original index placed at new position `p`.
    pub fn reordered(&self, row_order: &[usize], col_order: &[usize]) -> Self {
        let n = self.n_rows();
        let d = self.n_cols();
        debug_assert_eq!(row_order.len(), n);
        debug_assert_eq!(col_order.len(), d);

        let mut out = Array2::zeros((n, d));
        for (new_r, &old_r) in row_order.iter().enumerate() {
            for (new_c, &old_c) in col_order.iter().enumerate() {
                out[[new_r, new_c]] = self.values[[old_r, old_c]];
            }
        }

        Self { values: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_rejects_ragged() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        let result = DataMatrix::from_rows(&rows);
        assert_eq!(
            result.unwrap_err(),
            Error::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_from_rows_rejects_empty() {
        assert_eq!(DataMatrix::from_rows(&[]).unwrap_err(), Error::EmptyInput);
        assert_eq!(
            DataMatrix::from_rows(&[vec![]]).unwrap_err(),
            Error::EmptyInput
        );
    }

    #[test]
    fn test_axis_vectors() {
        let m = DataMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();

        assert_eq!(m.axis_len(Axis::Row), 2);
        assert_eq!(m.axis_len(Axis::Column), 3);

        let cols = m.axis_vectors(Axis::Column);
        assert_eq!(cols[0], vec![1.0, 4.0]);
        assert_eq!(cols[2], vec![3.0, 6.0]);
    }

    #[test]
    fn test_reordered() {
        let m = DataMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let r = m.reordered(&[1, 0], &[1, 0]);

        assert_eq!(r.get(0, 0), 4.0);
        assert_eq!(r.get(1, 1), 1.0);
    }

    #[test]
    fn test_missing_sentinel() {
        assert!(DataMatrix::is_missing(f64::NAN));
        assert!(!DataMatrix::is_missing(0.0));
    }
}
