//! Split and merge (`spec.md` §4.4): carving a block down to the requested
//! size, and coalescing adjacent free neighbors back together.

use crate::allocator::AllocatorState;
use crate::block::{min_block_size, BlockHeader};

impl AllocatorState {
    /// Carves `req` bytes off the front of `block`, leaving the remainder
    /// (if any) as a new free block immediately after it on the physical
    /// chain. If the remainder would be smaller than the minimum block
    /// size, the whole block is handed out unsplit.
    ///
    /// `block` must not be in any free list when this is called (the
    /// caller removes it from its bin first); the returned pointer is
    /// guaranteed allocated (`free == false`, both free-list links null).
    ///
    /// # Safety
    /// `block` must be a validated, physically-linked header with
    /// `size >= req`.
    pub(crate) unsafe fn split(&mut self, block: *mut BlockHeader, req: usize) {
        unsafe {
            let original_size = (*block).size;
            debug_assert!(original_size >= req, "split requires size >= req, pre-validated by caller");
            let remainder = original_size - req;

            if remainder < min_block_size(&self.config) {
                (*block).free = false;
                (*block).free_prev = core::ptr::null_mut();
                (*block).free_next = core::ptr::null_mut();
                return;
            }

            (*block).size = req;
            BlockHeader::rearm(block, &self.config);
            (*block).free = false;
            (*block).free_prev = core::ptr::null_mut();
            (*block).free_next = core::ptr::null_mut();

            let new_base = (block as usize) + req;
            let new_block = new_base as *mut BlockHeader;
            let old_next = (*block).phys_next;

            new_block.write(BlockHeader {
                magic: self.config.magic,
                head_canary: self.config.head_canary,
                size: remainder,
                free: true,
                marked: false,
                origin: None,
                phys_prev: block,
                phys_next: old_next,
                free_prev: core::ptr::null_mut(),
                free_next: core::ptr::null_mut(),
            });
            BlockHeader::arm_tail_canary(new_block, &self.config);

            (*block).phys_next = new_block;
            if !old_next.is_null() {
                (*old_next).phys_prev = new_block;
            }
            if self.phys_tail == block {
                self.phys_tail = new_block;
            }

            self.free_lists.insert(new_block);
        }
    }

    /// Coalesces `block` with its physically adjacent free neighbors (both
    /// directions, at most one absorption each), re-establishes magic and
    /// canaries on the survivor, re-links the physical chain, and inserts
    /// the survivor into its free list exactly once.
    ///
    /// `block` must already be marked free but must NOT be linked into a
    /// free-list bin yet; the caller inserts it (or its merged survivor)
    /// after this returns. Neighbors that are merged away are removed from
    /// their own bins here.
    ///
    /// # Safety
    /// `block` must be a validated, physically-linked header within
    /// `[heap_base, heap_end)`.
    pub(crate) unsafe fn merge(&mut self, mut block: *mut BlockHeader) -> *mut BlockHeader {
        unsafe {
            // Forward neighbor: sits immediately after `block`.
            let forward = (*block).phys_next;
            if !forward.is_null()
                && (forward as usize) < self.heap_end
                && (*forward).free
            {
                self.free_lists.remove(forward);
                (*block).size += (*forward).size;
                let forward_next = (*forward).phys_next;
                (*block).phys_next = forward_next;
                if !forward_next.is_null() {
                    (*forward_next).phys_prev = block;
                }
                if self.phys_tail == forward {
                    self.phys_tail = block;
                }
                BlockHeader::rearm(block, &self.config);
            }

            // Backward neighbor: reached via the physical-chain back
            // pointer, never by address arithmetic, so merging never
            // crosses into an adjacent mapped region or off-heap memory.
            let backward = (*block).phys_prev;
            if !backward.is_null() && (*backward).free {
                self.free_lists.remove(backward);
                (*backward).size += (*block).size;
                let block_next = (*block).phys_next;
                (*backward).phys_next = block_next;
                if !block_next.is_null() {
                    (*block_next).phys_prev = backward;
                }
                if self.phys_tail == block {
                    self.phys_tail = backward;
                }
                BlockHeader::rearm(backward, &self.config);
                block = backward;
            }

            self.free_lists.insert(block);
            block
        }
    }
}
