//! Heap growth/tail-shrink discipline (`spec.md` §4.5) and the large-block
//! page-mapping path (`spec.md` §4.6).

use crate::align_up;
use crate::allocator::AllocatorState;
use crate::block::BlockHeader;
use crate::error::{AllocError, AllocResult};

/// A single OS-mapped region backing one large allocation.
///
/// `spec.md` §3 models these as a singly linked list the allocator owns
/// exclusively; a `Vec` gives the same externally observable semantics
/// (membership test, O(n) scan on free) without hand-rolled intrusive
/// links for a structure that is never on the hot allocate/free path the
/// way the free list or physical chain are.
#[derive(Clone, Copy)]
pub(crate) struct MappedRegion {
    pub(crate) base: usize,
    pub(crate) len: usize,
}

impl AllocatorState {
    /// Grows the heap by `delta` bytes via the break primitive. On success,
    /// records the new `[last_brk_start, last_brk_end)` lease, advances
    /// `heap_end`, zeroes the new region, and returns the previous
    /// `heap_end` (the base of the freshly grown span).
    pub(crate) fn grow_heap(&mut self, delta: usize) -> AllocResult<usize> {
        let prev_end = self.heap_end;
        let prev_brk = self
            .sys
            .sbrk(delta as isize)
            .ok_or(AllocError::NoMem)?;
        debug_assert_eq!(prev_brk, prev_end, "break moved out from under the allocator");
        self.last_brk_start = prev_brk;
        self.last_brk_end = prev_brk + delta;
        self.heap_end = self.last_brk_end;
        // `BreakSource::sbrk` already zeroes the newly returned span.
        Ok(prev_end)
    }

    /// Attempts to shrink the heap tail after freeing `block`, per the
    /// three-condition discipline in `spec.md` §4.5. All three conditions
    /// are checked; an earlier revision of this allocator checked only two
    /// (`spec.md` §9 "Open Questions"), which could shrink the break out
    /// from under a lease another allocation had already extended past.
    ///
    /// Returns `true` if the heap was shrunk (and the block consumed by
    /// the shrink, not reinserted into a free list).
    pub(crate) fn try_tail_shrink(&mut self, block: *mut BlockHeader) -> bool {
        unsafe {
            let base = block as usize;
            let size = (*block).size;
            let block_end = base + size;

            if block_end != self.heap_end {
                return false;
            }
            if base > self.last_brk_start || block_end < self.last_brk_end {
                return false;
            }
            let current_brk = match self.sys.sbrk(0) {
                Some(b) => b,
                None => return false,
            };
            if current_brk != self.heap_end {
                return false;
            }

            match self.sys.sbrk(-(size as isize)) {
                Some(_) => {
                    self.heap_end = base;
                    // The shrunk block was, by the `block_end == heap_end`
                    // check above, the physical-chain tail; it no longer
                    // occupies owned memory, so it must be fully unlinked
                    // rather than left dangling off a retreated heap_end.
                    let prev = (*block).phys_prev;
                    self.phys_tail = prev;
                    if prev.is_null() {
                        self.phys_head = core::ptr::null_mut();
                    } else {
                        (*prev).phys_next = core::ptr::null_mut();
                    }
                    self.last_allocated = self.first_user_block();
                    true
                }
                None => {
                    log::warn!("tail shrink failed: break primitive refused to retreat");
                    false
                }
            }
        }
    }

    /// The first block on the physical chain, or null if the heap is empty.
    /// Used both as the next-fit wrap target and the post-shrink
    /// `last_allocated` sentinel.
    pub(crate) fn first_user_block(&self) -> *mut BlockHeader {
        self.phys_head
    }

    /// Services a request whose payload size exceeds
    /// `config.mmap_threshold` by mapping fresh pages instead of growing
    /// the heap break (`spec.md` §4.6). `total_size` is the already-computed
    /// full block size (header + payload + tail canary, aligned) to map.
    pub(crate) fn map_large_block(&mut self, total_size: usize) -> AllocResult<*mut BlockHeader> {
        let page = self.sys.page_size();
        let mapped_len = align_up!(total_size, page);
        let base = self.sys.map(mapped_len).ok_or(AllocError::NoMem)?;

        let hdr = base as *mut BlockHeader;
        unsafe {
            hdr.write(BlockHeader {
                magic: self.config.magic,
                head_canary: self.config.head_canary,
                size: mapped_len,
                free: false,
                marked: false,
                origin: None,
                phys_prev: core::ptr::null_mut(),
                phys_next: core::ptr::null_mut(),
                free_prev: core::ptr::null_mut(),
                free_next: core::ptr::null_mut(),
            });
            BlockHeader::arm_tail_canary(hdr, &self.config);
        }

        self.mapped_regions.push(MappedRegion { base, len: mapped_len });
        Ok(hdr)
    }

    /// Frees a block previously returned by [`AllocatorState::map_large_block`].
    /// `addr` must already have been confirmed to be a mapped-region base
    /// (not a heap address) by the caller.
    pub(crate) fn unmap_large_block(&mut self, hdr: *mut BlockHeader) -> AllocResult<()> {
        let base = hdr as usize;
        unsafe {
            if (*hdr).magic != self.config.magic {
                return Err(AllocError::CorruptMagic);
            }
            if (*hdr).head_canary != self.config.head_canary {
                return Err(AllocError::CorruptHeadCanary);
            }
            if (*hdr).free {
                return Err(AllocError::DoubleFree);
            }
        }
        let pos = self
            .mapped_regions
            .iter()
            .position(|r| r.base == base)
            .ok_or(AllocError::OutOfHeap)?;
        let region = self.mapped_regions.swap_remove(pos);
        if !self.sys.unmap(region.base, region.len) {
            log::warn!("munmap failed for region at {:#x} len {}", region.base, region.len);
        }
        Ok(())
    }

    /// True if `addr` is the base of a currently live mapped region.
    pub(crate) fn is_mapped_base(&self, addr: usize) -> bool {
        self.mapped_regions.iter().any(|r| r.base == addr)
    }
}
