//! Searches over a window `[from, to)` of slots.
//!
//! Every search encodes the query first, so a value that cannot be represented by the width is
//! reported as not found rather than compared against truncated data.

use super::{Width, UNUSED};
use std::cmp::Ordering;

impl Width {
    /// Stored representation of a query, or `None` if it can never be present.
    fn key(self, value: u64) -> Option<u64> {
        self.encode(value).ok()
    }

    /// Stored `(begin, end)` of span slot `slot`.
    #[inline]
    fn load_span(self, buf: &[u8], slot: usize) -> (u64, u64) {
        (self.load(buf, slot * 2), self.load(buf, slot * 2 + 1))
    }

    /// Linear scan for the first slot holding `value`.
    pub fn find(self, buf: &[u8], from: usize, to: usize, value: u64) -> Option<usize> {
        let key = self.key(value)?;
        (from..to).find(|&slot| self.load(buf, slot) == key)
    }

    /// Linear scan for the first span slot containing `value`.
    pub fn find_span(self, buf: &[u8], from: usize, to: usize, value: u64) -> Option<usize> {
        let key = self.key(value)?;
        (from..to).find(|&slot| {
            let (begin, end) = self.load_span(buf, slot);
            begin != UNUSED && begin <= key && key <= end
        })
    }

    /// Binary search for `value` in a fully populated ascending window.
    pub fn find_sorted(self, buf: &[u8], from: usize, to: usize, value: u64) -> Option<usize> {
        let key = self.key(value)?;
        let (mut low, mut high) = (from, to);
        while low < high {
            let mid = low + (high - low) / 2;
            match self.load(buf, mid).cmp(&key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Binary search for the span containing `value` in a fully populated window of ascending,
    /// disjoint spans.
    pub fn find_sorted_span(
        self,
        buf: &[u8],
        from: usize,
        to: usize,
        value: u64,
    ) -> Option<usize> {
        let key = self.key(value)?;
        let (mut low, mut high) = (from, to);
        while low < high {
            let mid = low + (high - low) / 2;
            let (begin, end) = self.load_span(buf, mid);
            if key < begin {
                high = mid;
            } else if key > end {
                low = mid + 1;
            } else {
                return Some(mid);
            }
        }
        None
    }

    /// Binary search for `value` in an ascending window that may end in a run of unused slots.
    ///
    /// When the probed midpoint is unused, the left boundary is compared instead: an unused or
    /// smaller left boundary advances `low`, a larger one proves absence, an equal one is the
    /// answer. On a fully populated window this is exactly [Width::find_sorted].
    pub fn sparse_find_sorted(
        self,
        buf: &[u8],
        from: usize,
        to: usize,
        value: u64,
    ) -> Option<usize> {
        let key = self.key(value)?;
        let (mut low, mut high) = (from, to);
        while low < high {
            let mid = low + (high - low) / 2;
            let stored = self.load(buf, mid);
            if stored == UNUSED {
                let anchor = self.load(buf, low);
                if anchor == UNUSED || anchor < key {
                    low += 1;
                } else if anchor > key {
                    return None;
                } else {
                    return Some(low);
                }
                continue;
            }
            match stored.cmp(&key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Span variant of [Width::sparse_find_sorted]: the left boundary span is consulted when the
    /// midpoint span is unused.
    pub fn sparse_find_sorted_span(
        self,
        buf: &[u8],
        from: usize,
        to: usize,
        value: u64,
    ) -> Option<usize> {
        let key = self.key(value)?;
        let (mut low, mut high) = (from, to);
        while low < high {
            let mid = low + (high - low) / 2;
            let (begin, end) = self.load_span(buf, mid);
            if begin == UNUSED {
                let (anchor_begin, anchor_end) = self.load_span(buf, low);
                if anchor_begin == UNUSED || anchor_end < key {
                    low += 1;
                } else if anchor_begin > key {
                    return None;
                } else {
                    return Some(low);
                }
                continue;
            }
            if key < begin {
                high = mid;
            } else if key > end {
                low = mid + 1;
            } else {
                return Some(mid);
            }
        }
        None
    }
}
