// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bitmap allocator over the cell area.
//!
//! First-fit scan for a run of contiguous clear bits. The allocator itself is
//! not synchronized; it lives inside the session state and is only touched
//! under the session lock.

use crate::error::ResourceError;

const WORD_BITS: usize = u64::BITS as usize;

/// A contiguous run of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub first: usize,
    pub count: usize,
}

impl CellRange {
    pub fn end(&self) -> usize {
        self.first + self.count
    }

    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.first < other.end() && other.first < self.end()
    }
}

/// Bitmap of allocated cells.
#[derive(Debug, Clone)]
pub struct CellAllocator {
    bits: Vec<u64>,
    total: usize,
    used: usize,
}

impl CellAllocator {
    pub fn new(total: usize) -> Self {
        Self {
            bits: vec![0; total.div_ceil(WORD_BITS)],
            total,
            used: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free_count(&self) -> usize {
        self.total - self.used
    }

    fn is_set(&self, cell: usize) -> bool {
        self.bits[cell / WORD_BITS] & (1 << (cell % WORD_BITS)) != 0
    }

    fn set(&mut self, cell: usize) {
        self.bits[cell / WORD_BITS] |= 1 << (cell % WORD_BITS);
    }

    fn clear(&mut self, cell: usize) {
        self.bits[cell / WORD_BITS] &= !(1 << (cell % WORD_BITS));
    }

    /// Allocate `count` contiguous cells.
    ///
    /// Either the whole run is marked or nothing is.
    pub fn allocate(&mut self, count: usize) -> Result<CellRange, ResourceError> {
        if count == 0 || count > self.free_count() {
            return Err(self.exhausted(count));
        }

        let mut run_start = 0;
        let mut run_len = 0;
        let mut cell = 0;

        while cell < self.total {
            // Skip fully used words quickly.
            if cell % WORD_BITS == 0 && run_len == 0 && self.bits[cell / WORD_BITS] == u64::MAX {
                cell += WORD_BITS;
                continue;
            }

            if self.is_set(cell) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = cell;
                }
                run_len += 1;
                if run_len == count {
                    for c in run_start..run_start + count {
                        self.set(c);
                    }
                    self.used += count;
                    tracing::debug!(first = run_start, count = count, "Allocated cells");
                    return Ok(CellRange {
                        first: run_start,
                        count,
                    });
                }
            }
            cell += 1;
        }

        Err(self.exhausted(count))
    }

    fn exhausted(&self, requested: usize) -> ResourceError {
        ResourceError::CellsExhausted {
            requested,
            free: self.free_count(),
            total: self.total,
        }
    }

    /// Release a run previously returned by [`Self::allocate`].
    ///
    /// Freeing cells that are out of range or not allocated is a bookkeeping
    /// bug; it is reported and the bitmap is left untouched.
    pub fn free(&mut self, range: CellRange) -> bool {
        if range.end() > self.total || !(range.first..range.end()).all(|c| self.is_set(c)) {
            tracing::error!(
                first = range.first,
                count = range.count,
                "Refusing to free cells that are not allocated"
            );
            debug_assert!(false, "double free of cells {:?}", range);
            return false;
        }

        for c in range.first..range.end() {
            self.clear(c);
        }
        self.used -= range.count;
        tracing::debug!(first = range.first, count = range.count, "Freed cells");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit() {
        let mut cells = CellAllocator::new(16);
        let a = cells.allocate(4).unwrap();
        let b = cells.allocate(2).unwrap();
        assert_eq!(a, CellRange { first: 0, count: 4 });
        assert_eq!(b, CellRange { first: 4, count: 2 });
        assert_eq!(cells.used(), 6);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_exhaustion_is_all_or_nothing() {
        let mut cells = CellAllocator::new(8);
        cells.allocate(6).unwrap();
        let err = cells.allocate(3).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::CellsExhausted {
                requested: 3,
                free: 2,
                total: 8
            }
        ));
        assert_eq!(cells.used(), 6);
        assert!(cells.allocate(0).is_err());
    }

    #[test]
    fn test_fragmentation_needs_contiguous_run() {
        let mut cells = CellAllocator::new(6);
        let a = cells.allocate(2).unwrap();
        let _b = cells.allocate(2).unwrap();
        let _c = cells.allocate(2).unwrap();
        cells.free(a);
        // 2 free, but a run of 3 does not exist.
        assert!(cells.allocate(3).is_err());
        assert_eq!(cells.allocate(2).unwrap(), a);
    }

    #[test]
    fn test_free_then_allocate_reuses_cells() {
        let mut cells = CellAllocator::new(16);
        let _a = cells.allocate(3).unwrap();
        let b = cells.allocate(5).unwrap();
        let _c = cells.allocate(2).unwrap();
        assert!(cells.free(b));
        assert_eq!(cells.allocate(5).unwrap(), b);
    }

    #[test]
    fn test_scan_across_word_boundary() {
        let mut cells = CellAllocator::new(200);
        cells.allocate(64).unwrap();
        cells.allocate(60).unwrap();
        let r = cells.allocate(10).unwrap();
        assert_eq!(r.first, 124);
        assert_eq!(cells.free_count(), 200 - 134);
    }

    #[test]
    fn test_overlaps() {
        let a = CellRange { first: 2, count: 3 };
        assert!(a.overlaps(&CellRange { first: 4, count: 1 }));
        assert!(!a.overlaps(&CellRange { first: 5, count: 1 }));
        assert!(!a.overlaps(&CellRange { first: 0, count: 2 }));
    }
}
