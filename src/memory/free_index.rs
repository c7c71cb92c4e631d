//! Free-space index.
//!
//! Records are ordered by (length, address) so a range query yields the
//! smallest adequate span, lowest address first. Neighbour lookup for
//! coalescing goes through boundary tags, not through this index.

use std::collections::BTreeSet;

/// One free span: payload offset and payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FreeSpan {
    pub len: usize,
    pub addr: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FreeIndex {
    spans: BTreeSet<FreeSpan>,
    total: usize,
}

impl FreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: usize, len: usize) {
        if self.spans.insert(FreeSpan { len, addr }) {
            self.total += len;
        }
    }

    /// Remove a record. Returns false if it was not indexed.
    pub fn remove(&mut self, addr: usize, len: usize) -> bool {
        let removed = self.spans.remove(&FreeSpan { len, addr });
        if removed {
            self.total -= len;
        }
        removed
    }

    pub fn contains(&self, addr: usize, len: usize) -> bool {
        self.spans.contains(&FreeSpan { len, addr })
    }

    /// Smallest span of at least `len` bytes.
    pub fn best_fit(&self, len: usize) -> Option<FreeSpan> {
        self.spans.range(FreeSpan { len, addr: 0 }..).next().copied()
    }

    pub fn largest(&self) -> Option<FreeSpan> {
        self.spans.iter().next_back().copied()
    }

    /// Sum of payload bytes across all records.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_fit_prefers_smallest_then_lowest_address() {
        let mut index = FreeIndex::new();
        index.insert(1000, 64);
        index.insert(200, 128);
        index.insert(100, 128);
        index.insert(5000, 4096);

        assert_eq!(index.best_fit(100), Some(FreeSpan { len: 128, addr: 100 }));
        assert_eq!(index.best_fit(64), Some(FreeSpan { len: 64, addr: 1000 }));
        assert_eq!(index.best_fit(4097), None);
    }

    #[test]
    fn test_totals_track_inserts_and_removes() {
        let mut index = FreeIndex::new();
        index.insert(8, 100);
        index.insert(200, 50);
        assert_eq!(index.total_bytes(), 150);
        assert!(index.remove(8, 100));
        assert!(!index.remove(8, 100));
        assert_eq!(index.total_bytes(), 50);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_largest() {
        let mut index = FreeIndex::new();
        assert_eq!(index.largest(), None);
        index.insert(8, 100);
        index.insert(400, 300);
        assert_eq!(index.largest().map(|s| s.len), Some(300));
    }
}
