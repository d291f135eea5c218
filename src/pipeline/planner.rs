//! Batch planner: split a row list into payload-bounded batches
//!
//! The per-row size is an estimate. It only has to keep a single statement
//! payload below the server's packet ceiling.

/// Splits row lists into contiguous slices of at most `batch_rows()` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlanner {
    max_bytes: usize,
    est_row_bytes: usize,
}

impl BatchPlanner {
    pub fn new(max_bytes: usize, est_row_bytes: usize) -> Self {
        Self {
            max_bytes,
            est_row_bytes,
        }
    }

    /// Rows per batch: `floor(max_bytes / est_row_bytes)`, at least 1
    pub fn batch_rows(&self) -> usize {
        (self.max_bytes / self.est_row_bytes.max(1)).max(1)
    }

    pub fn plan<'a, T>(&self, rows: &'a [T]) -> Vec<&'a [T]> {
        rows.chunks(self.batch_rows()).collect()
    }

    /// Number of batches `plan` would produce for `row_count` rows
    pub fn batch_count(&self, row_count: usize) -> usize {
        row_count.div_ceil(self.batch_rows())
    }
}

/// Plan batches for `rows` under a `max_bytes` payload budget.
pub fn plan<T>(rows: &[T], max_bytes: usize, est_row_bytes: usize) -> Vec<&[T]> {
    BatchPlanner::new(max_bytes, est_row_bytes).plan(rows)
}
