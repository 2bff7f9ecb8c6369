// --- File: src/data/minibatch.rs ---

//! Index ranges for minibatch slicing.

use std::iter::FusedIterator;
use std::ops::Range;

/// Number of minibatches needed to cover `count` items.
///
/// Zero items or a zero batch size give zero minibatches.
pub fn nb_minibatches(count: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        (count + batch_size - 1) / batch_size
    }
}

/// Returns the half-open ranges `[0, b), [b, 2b), ...` covering `[0, count)`.
///
/// Every range has length `batch_size` except possibly the last one.
pub fn minibatch_ranges(count: usize, batch_size: usize) -> MinibatchRanges {
    MinibatchRanges {
        count,
        batch_size,
        start: 0,
    }
}

/// Lazy, finite and restartable sequence of minibatch index ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinibatchRanges {
    count: usize,
    batch_size: usize,
    start: usize,
}

impl MinibatchRanges {
    /// Total number of items covered.
    pub fn nb_items(&self) -> usize {
        self.count
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rewinds to the first range.
    pub fn reset(&mut self) {
        self.start = 0;
    }
}

impl Iterator for MinibatchRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 0 || self.start >= self.count {
            return None;
        }
        let start = self.start;
        let end = (start + self.batch_size).min(self.count);
        self.start = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = nb_minibatches(self.count.saturating_sub(self.start), self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for MinibatchRanges {}

impl FusedIterator for MinibatchRanges {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_minibatches() {
        assert_eq!(nb_minibatches(0, 10), 0);
        assert_eq!(nb_minibatches(0, 1), 0);
        assert_eq!(nb_minibatches(0, 0), 0);
        assert_eq!(nb_minibatches(10, 0), 0);
        assert_eq!(nb_minibatches(25, 1), 25);
        assert_eq!(nb_minibatches(25, 10), 3);
        assert_eq!(nb_minibatches(30, 10), 3);
    }

    #[test]
    fn test_ranges_cover_exactly() {
        for count in 0..40 {
            for batch_size in 1..12 {
                let ranges: Vec<_> = minibatch_ranges(count, batch_size).collect();
                assert_eq!(ranges.len(), nb_minibatches(count, batch_size));

                let mut expected_start = 0;
                for (i, r) in ranges.iter().enumerate() {
                    // Contiguous and non-overlapping.
                    assert_eq!(r.start, expected_start);
                    if i + 1 < ranges.len() {
                        assert_eq!(r.len(), batch_size);
                    } else {
                        assert!(r.len() >= 1 && r.len() <= batch_size);
                    }
                    expected_start = r.end;
                }
                assert_eq!(expected_start, count);
            }
        }
    }

    #[test]
    fn test_empty_cases() {
        assert_eq!(minibatch_ranges(0, 10).next(), None);
        assert_eq!(minibatch_ranges(10, 0).next(), None);
        assert_eq!(minibatch_ranges(10, 0).len(), 0);
    }

    #[test]
    fn test_reset_restarts() {
        let mut ranges = minibatch_ranges(25, 10);
        let first: Vec<_> = ranges.by_ref().collect();
        assert_eq!(first, vec![0..10, 10..20, 20..25]);
        assert_eq!(ranges.next(), None);

        ranges.reset();
        assert_eq!(ranges.len(), 3);
        let second: Vec<_> = ranges.collect();
        assert_eq!(first, second);
    }
}
