/// Rows per batch so that one batch stays within `budget_bytes`.
///
/// Always at least 1, never more than `n_rows` (unless `n_rows` is 0).
///
/// # Example
/// ```
/// use dm_core::batch::batch_size;
/// assert_eq!(batch_size(1000, 128, 1024), 8);
/// assert_eq!(batch_size(4, 128, 1 << 20), 4);
/// ```
#[must_use]
pub fn batch_size(n_rows: usize, row_bytes: usize, budget_bytes: usize) -> usize {
    let rows = (budget_bytes / row_bytes.max(1)).max(1);
    rows.min(n_rows.max(1))
}

/// Half-open `(start, end)` ranges of at most `batch_size` rows covering `0..n_rows`.
///
/// # Example
/// ```
/// use dm_core::batch::batch_limits;
/// assert_eq!(batch_limits(5, 2), vec![(0, 2), (2, 4), (4, 5)]);
/// ```
#[must_use]
pub fn batch_limits(n_rows: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let step = batch_size.max(1);
    (0..n_rows)
        .step_by(step)
        .map(|start| (start, (start + step).min(n_rows)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_cover_every_row_once() {
        for (n, size) in [(0, 3), (1, 3), (9, 3), (10, 3), (7, 100)] {
            let limits = batch_limits(n, size);
            let mut expected = 0;
            for &(start, end) in &limits {
                assert_eq!(start, expected);
                assert!(end > start && end - start <= size);
                expected = end;
            }
            assert_eq!(expected, n);
        }
    }

    #[test]
    fn size_never_zero() {
        assert_eq!(batch_size(0, 128, 1024), 1);
        assert_eq!(batch_size(10, 4096, 1024), 1);
        assert_eq!(batch_size(10, 0, 1024), 10);
    }
}
