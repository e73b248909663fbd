//! The three placement strategies (`spec.md` §4.3): first-fit, best-fit,
//! and next-fit, plus the public [`Strategy`] tag that selects among them.

use crate::allocator::AllocatorState;
use crate::block::{validate, BlockHeader};
use crate::error::{AllocError, AllocResult};

/// Which placement algorithm services a call. Exposed through the
/// strategy-tagged API variants in `spec.md` §4.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    FirstFit,
    NextFit,
    BestFit,
}

impl AllocatorState {
    /// Dispatches to the requested strategy. `size` is the full block size
    /// (header + payload + tail canary), already aligned.
    pub(crate) fn find_fit(&mut self, size: usize, strategy: Strategy) -> AllocResult<*mut BlockHeader> {
        match strategy {
            Strategy::FirstFit => self.first_fit(size),
            Strategy::BestFit => self.best_fit(size),
            Strategy::NextFit => self.next_fit(size),
        }
    }

    fn validate_candidate(&self, block: *mut BlockHeader) -> bool {
        unsafe { validate(block, self.heap_base, self.heap_end, &self.config).is_ok() }
    }

    /// From `bin(size)` upward, returns the first free block that
    /// validates and is large enough.
    pub(crate) fn first_fit(&mut self, size: usize) -> AllocResult<*mut BlockHeader> {
        let start_bin = self.free_lists.bin_of(size);
        for bin in start_bin..self.free_lists.bin_count() {
            let mut cur = self.free_lists.head(bin);
            while !cur.is_null() {
                let next = unsafe { (*cur).free_next };
                if unsafe { (*cur).size } >= size && self.validate_candidate(cur) {
                    return Ok(cur);
                }
                cur = next;
            }
        }
        Err(AllocError::NoSpace)
    }

    /// From `bin(size)` upward, returns the minimum-size fit in the first
    /// bin that yields any candidate at all — it does not keep searching
    /// larger bins once a bin has produced a match.
    pub(crate) fn best_fit(&mut self, size: usize) -> AllocResult<*mut BlockHeader> {
        let start_bin = self.free_lists.bin_of(size);
        for bin in start_bin..self.free_lists.bin_count() {
            let mut best: Option<*mut BlockHeader> = None;
            let mut cur = self.free_lists.head(bin);
            while !cur.is_null() {
                let next = unsafe { (*cur).free_next };
                if unsafe { (*cur).size } >= size && self.validate_candidate(cur) {
                    best = Some(match best {
                        None => cur,
                        Some(b) if unsafe { (*cur).size } < unsafe { (*b).size } => cur,
                        Some(b) => b,
                    });
                }
                cur = next;
            }
            if let Some(b) = best {
                return Ok(b);
            }
        }
        Err(AllocError::NoSpace)
    }

    /// Walks the physical chain forward from `last_allocated`, wrapping to
    /// the first user block at the heap end. Falls back to first-fit if
    /// `last_allocated` is null or no longer a valid header.
    pub(crate) fn next_fit(&mut self, size: usize) -> AllocResult<*mut BlockHeader> {
        let start = self.last_allocated;
        if start.is_null() || !self.validate_candidate(start) {
            return self.first_fit(size);
        }

        let wrap_target = self.first_user_block();
        let mut cur = start;
        let mut wrapped = false;

        loop {
            if unsafe { (*cur).free } && unsafe { (*cur).size } >= size && self.validate_candidate(cur) {
                self.last_allocated = cur;
                return Ok(cur);
            }

            let next = unsafe { (*cur).phys_next };
            cur = if next.is_null() {
                if wrapped {
                    break;
                }
                wrapped = true;
                wrap_target
            } else {
                next
            };
            if cur.is_null() || cur == start {
                break;
            }
        }

        Err(AllocError::NoSpace)
    }
}
