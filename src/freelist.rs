//! The segregated free list (`spec.md` §4.2): a vector of bin heads, each
//! an intrusive doubly-linked list threaded through
//! [`crate::block::BlockHeader::free_prev`]/`free_next`.

use crate::block::BlockHeader;
use crate::config::Config;

/// `N` free-list bin heads, each a possibly-null pointer to the most
/// recently inserted block in that size class.
pub(crate) struct FreeLists {
    bins: Vec<*mut BlockHeader>,
    bytes_per_class: usize,
}

impl FreeLists {
    pub(crate) fn new(config: &Config) -> Self {
        FreeLists {
            bins: vec![core::ptr::null_mut(); config.bin_count],
            bytes_per_class: config.bytes_per_class,
        }
    }

    /// `bin = ceil(size / bytes_per_class)` clamped to the last (overflow)
    /// bin.
    pub(crate) fn bin_of(&self, size: usize) -> usize {
        let raw = size.div_ceil(self.bytes_per_class);
        raw.min(self.bins.len() - 1)
    }

    pub(crate) fn bin_count(&self) -> usize {
        self.bins.len()
    }

    pub(crate) fn head(&self, bin: usize) -> *mut BlockHeader {
        self.bins[bin]
    }

    /// Prepends `block` to its size class's bin. O(1).
    ///
    /// # Safety
    /// `block` must not already be linked into any free list, and must
    /// point to a live, writable `BlockHeader`.
    pub(crate) unsafe fn insert(&mut self, block: *mut BlockHeader) {
        unsafe {
            let bin = self.bin_of((*block).size);
            let old_head = self.bins[bin];
            (*block).free = true;
            (*block).free_prev = core::ptr::null_mut();
            (*block).free_next = old_head;
            if !old_head.is_null() {
                (*old_head).free_prev = block;
            }
            self.bins[bin] = block;
        }
    }

    /// Unlinks `block` from whichever bin it currently heads or sits in.
    /// O(1). Clears both free-list links on `block` itself.
    ///
    /// # Safety
    /// `block` must currently be linked into the bin `bin_of(block.size)`.
    pub(crate) unsafe fn remove(&mut self, block: *mut BlockHeader) {
        unsafe {
            let bin = self.bin_of((*block).size);
            let prev = (*block).free_prev;
            let next = (*block).free_next;
            if prev.is_null() {
                debug_assert_eq!(self.bins[bin], block, "block was not the bin head it claims to be");
                self.bins[bin] = next;
            } else {
                (*prev).free_next = next;
            }
            if !next.is_null() {
                (*next).free_prev = prev;
            }
            (*block).free = false;
            (*block).free_prev = core::ptr::null_mut();
            (*block).free_next = core::ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_of_clamps_to_overflow_bin() {
        let config = Config { bin_count: 4, bytes_per_class: 128, ..Config::default() };
        let fl = FreeLists::new(&config);
        assert_eq!(fl.bin_of(1), 1);
        assert_eq!(fl.bin_of(128), 1);
        assert_eq!(fl.bin_of(129), 2);
        assert_eq!(fl.bin_of(10_000), 3); // clamped to bin_count - 1
    }
}
