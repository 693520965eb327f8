//! Row-major matrix views over caller-owned storage.
//!
//! An index never copies the vectors it is built over; it borrows them
//! through [`Dataset`] and refers to rows by index. The backing slice must
//! outlive every index built on top of it, which the lifetime parameter
//! enforces at compile time.

use crate::error::{NaborError, Result};

/// Read-only row-major matrix view (`rows` x `cols`).
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a, T = f32> {
    rows: usize,
    cols: usize,
    data: &'a [T],
}

impl<'a, T> Dataset<'a, T> {
    /// Create a view over `data`, which must hold exactly `rows * cols` values.
    pub fn new(rows: usize, cols: usize, data: &'a [T]) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(NaborError::InvalidArgument(format!(
                "dataset shape must be positive, got {rows}x{cols}"
            )));
        }
        if data.len() != rows * cols {
            return Err(NaborError::InvalidArgument(format!(
                "dataset storage holds {} values, expected {}",
                data.len(),
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows (points).
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (vector dimension).
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Row `i` as a slice of length `cols`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= rows`.
    #[inline]
    pub fn row(&self, i: usize) -> &'a [T] {
        let start = i * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Iterate over all rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        (0..self.rows).map(|i| self.row(i))
    }
}

/// Mutable row-major matrix view, used for caller-supplied output matrices.
#[derive(Debug)]
pub struct DatasetMut<'a, T> {
    rows: usize,
    cols: usize,
    data: &'a mut [T],
}

impl<'a, T> DatasetMut<'a, T> {
    /// Create a mutable view over `data` (`rows * cols` values).
    pub fn new(rows: usize, cols: usize, data: &'a mut [T]) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(NaborError::InvalidArgument(format!(
                "matrix shape must be positive, got {rows}x{cols}"
            )));
        }
        if data.len() != rows * cols {
            return Err(NaborError::InvalidArgument(format!(
                "matrix storage holds {} values, expected {}",
                data.len(),
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Mutable access to row `i`.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        let start = i * self.cols;
        &mut self.data[start..start + self.cols]
    }
}
