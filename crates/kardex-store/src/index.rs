//! In-memory key index.
//!
//! One `KeyIndex` per defined search key: an array of live slot numbers
//! ordered by the slot's encoded key bytes, searched by raw byte compare.
//! Mutations mark the array unsorted; the next search re-collects the live
//! slots from the image and re-sorts in place.

use crate::layout::SlotImage;

/// Invalid cursor/selection position.
pub const INVALID_POSITION: u32 = u32::MAX;

/// Outcome of a key search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The key matched; `slot` is the first matching slot in key order,
    /// `start` its array position, `count` the size of the equal range.
    Found { slot: u32, start: u32, count: u32 },
    /// No match; `insertion` is the array position where the key would be
    /// inserted.
    NotFound { insertion: u32 },
}

/// Sorted slot array for one search key.
#[derive(Debug)]
pub struct KeyIndex {
    /// Live slot ids, ordered by encoded key once `sorted` is set.
    records: Vec<u32>,
    /// Iteration cursor within the current selection.
    position: u32,
    /// First array position of the current selection.
    selection_start: u32,
    /// Last array position of the current selection (inclusive).
    selection_end: u32,
    /// Byte offset of this key within an image entry (slot struct included).
    key_offset: u16,
    /// Encoded size of this key.
    key_size: u16,
    sorted: bool,
}

impl KeyIndex {
    /// Creates an index for the key stored at `key_offset` within an image
    /// entry.
    pub fn new(key_offset: u16, key_size: u16) -> Self {
        Self {
            records: Vec::new(),
            position: INVALID_POSITION,
            selection_start: INVALID_POSITION,
            selection_end: INVALID_POSITION,
            key_offset,
            key_size,
            sorted: false,
        }
    }

    /// Encoded size of this key.
    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    /// Marks the array unsorted. Called after any image mutation.
    pub fn invalidate(&mut self) {
        self.sorted = false;
    }

    /// Returns true if a selection from a previous search is active.
    pub fn has_selection(&self) -> bool {
        self.selection_start != INVALID_POSITION
    }

    fn clear_selection(&mut self) {
        self.position = INVALID_POSITION;
        self.selection_start = INVALID_POSITION;
        self.selection_end = INVALID_POSITION;
    }

    fn key_of<'a>(&self, image: &'a SlotImage, slot: u32, len: usize) -> &'a [u8] {
        image.key_bytes(slot, self.key_offset as usize, len)
    }

    /// Re-sorts the array if any mutation invalidated it. Live slots are
    /// re-collected from the image first, so deleted and reserved slots
    /// never surface in search results.
    pub fn ensure_sorted(&mut self, image: &SlotImage) {
        if self.sorted {
            return;
        }
        self.clear_selection();

        self.records.clear();
        for slot in 0..image.len() {
            if image.slot(slot).status.is_live() {
                self.records.push(slot);
            }
        }

        self.shell_sort(image);
        self.sorted = true;
    }

    /// Diminishing-increment Shell sort over the slot array, comparing the
    /// encoded key bytes of each slot. Knuth's gap sequence: inc(1) = 1,
    /// inc(k+1) = 3*inc(k) + 1, grown until it reaches the element count,
    /// then stepped back down. Small arrays degenerate to straight
    /// insertion sort.
    fn shell_sort(&mut self, image: &SlotImage) {
        let n = self.records.len();
        if n < 2 {
            return;
        }
        let len = self.key_size as usize;

        let mut gap = 1usize;
        if n > 13 {
            while gap < n {
                gap = 3 * gap + 1;
            }
            gap /= 9;
        }

        while gap > 0 {
            for i in gap..n {
                let current = self.records[i];
                let mut j = i;
                while j >= gap
                    && self.key_of(image, self.records[j - gap], len)
                        > self.key_of(image, current, len)
                {
                    self.records[j] = self.records[j - gap];
                    j -= gap;
                }
                self.records[j] = current;
            }
            gap /= 3;
        }
    }

    /// Binary search for a (partial) encoded key.
    ///
    /// The needle may be shorter than the full key; comparisons then cover
    /// only the prefix. On a hit the equal range is expanded linearly in
    /// both directions and the iteration cursor is set to its start. On a
    /// miss the selection is cleared and the insertion point reported.
    pub fn search(&mut self, image: &SlotImage, needle: &[u8]) -> SearchOutcome {
        self.clear_selection();

        let n = self.records.len();
        if n == 0 {
            return SearchOutcome::NotFound { insertion: 0 };
        }
        let len = needle.len();

        let mut left = 0i64;
        let mut right = n as i64 - 1;
        let mut hit: Option<usize> = None;
        let mut insertion = 0u32;

        while left <= right {
            let mid = ((left + right) >> 1) as usize;
            match needle.cmp(self.key_of(image, self.records[mid], len)) {
                std::cmp::Ordering::Less => {
                    right = mid as i64 - 1;
                    insertion = mid as u32;
                }
                std::cmp::Ordering::Greater => {
                    left = mid as i64 + 1;
                    insertion = mid as u32 + 1;
                }
                std::cmp::Ordering::Equal => {
                    hit = Some(mid);
                    break;
                }
            }
        }

        let Some(mid) = hit else {
            return SearchOutcome::NotFound { insertion };
        };

        let mut start = mid;
        while start > 0 && needle == self.key_of(image, self.records[start - 1], len) {
            start -= 1;
        }
        let mut end = mid;
        while end + 1 < n && needle == self.key_of(image, self.records[end + 1], len) {
            end += 1;
        }

        self.position = start as u32;
        self.selection_start = start as u32;
        self.selection_end = end as u32;

        SearchOutcome::Found {
            slot: self.records[start],
            start: start as u32,
            count: (end - start + 1) as u32,
        }
    }

    /// Advances the iteration cursor and returns the next slot of the
    /// current selection, or None once the selection is exhausted. The
    /// first match was already yielded by the search itself.
    pub fn next(&mut self) -> Option<u32> {
        if self.position >= self.selection_end {
            return None;
        }
        self.position += 1;
        Some(self.records[self.position as usize])
    }
}
