//! The allocator singleton, its public `alloc`/`calloc`/`realloc`/`free`
//! surface (`spec.md` §4.7), and the `AllocatorState` every other module's
//! `impl` blocks extend.

use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::block::{min_block_size, validate, BlockHeader, Origin};
use crate::config::Config;
use crate::error::{AllocError, AllocResult};
use crate::freelist::FreeLists;
use crate::heap::MappedRegion;
use crate::memops;
use crate::placement::Strategy;
use crate::sys::{BreakSource, LibcBreak};

/// A grouping of free-list bins plus a top-chunk cursor (`spec.md` §3).
/// The core instantiates exactly one; `AllocatorState` keeps it in a
/// `Vec<Arena>` of length one so the multi-arena extension point the
/// spec describes is visible in the type rather than hand-waved away.
pub(crate) struct Arena {
    pub(crate) top_chunk: *mut BlockHeader,
}

/// All mutable state the core protects with one global mutex
/// (`spec.md` §5). Raw pointers into the heap make this type `!Send` by
/// default; every access to a live `AllocatorState` is already serialized
/// behind [`global`]'s `Mutex`, so the `Send` bound below only documents
/// what callers already guarantee.
pub struct AllocatorState {
    pub(crate) config: Config,
    pub(crate) sys: Box<dyn BreakSource>,
    pub(crate) heap_base: usize,
    pub(crate) heap_end: usize,
    pub(crate) last_brk_start: usize,
    pub(crate) last_brk_end: usize,
    pub(crate) last_allocated: *mut BlockHeader,
    pub(crate) phys_head: *mut BlockHeader,
    pub(crate) phys_tail: *mut BlockHeader,
    pub(crate) free_lists: FreeLists,
    pub(crate) mapped_regions: Vec<MappedRegion>,
    pub(crate) arenas: Vec<Arena>,
    pub(crate) aux_roots: Vec<(usize, usize)>,
}

// SAFETY: every field is only ever touched while holding the `Mutex` that
// wraps this type (the global singleton in `global()`, or a caller-owned
// instance they serialize themselves); no raw pointer here is ever read
// or written without that lock held.
unsafe impl Send for AllocatorState {}

impl AllocatorState {
    /// Builds a fresh allocator state over `sys`, with the given `config`.
    /// `sys.sbrk(0)` is queried once to establish `heap_base`.
    pub(crate) fn new_with(config: Config, mut sys: Box<dyn BreakSource>) -> Self {
        config.assert_valid();
        let heap_base = sys.sbrk(0).expect("initial sbrk(0) query must succeed");
        AllocatorState {
            config,
            sys,
            heap_base,
            heap_end: heap_base,
            last_brk_start: heap_base,
            last_brk_end: heap_base,
            last_allocated: core::ptr::null_mut(),
            phys_head: core::ptr::null_mut(),
            phys_tail: core::ptr::null_mut(),
            free_lists: FreeLists::new(&config),
            mapped_regions: Vec::new(),
            arenas: vec![Arena { top_chunk: core::ptr::null_mut() }],
            aux_roots: Vec::new(),
        }
    }

    /// Builds an allocator state backed by the real `sbrk`/`mmap` OS
    /// primitives and the default [`Config`].
    pub fn new() -> Self {
        Self::new_with(Config::default(), Box::new(LibcBreak::new()))
    }

    /// Builds an allocator state with a non-default [`Config`], still
    /// backed by the real OS primitives. Exists for tests and callers that
    /// need a smaller mmap threshold or bin count without a fake break.
    pub fn with_config(config: Config) -> Self {
        Self::new_with(config, Box::new(LibcBreak::new()))
    }

    fn total_block_size(&self, payload_size: usize) -> usize {
        let header = core::mem::size_of::<BlockHeader>();
        let tail = core::mem::size_of::<u32>();
        let raw = header + payload_size + tail;
        let aligned = crate::align_up!(raw, self.config.alignment);
        aligned.max(min_block_size(&self.config))
    }

    fn payload_capacity(&self, hdr: *mut BlockHeader) -> usize {
        let header = core::mem::size_of::<BlockHeader>();
        let tail = core::mem::size_of::<u32>();
        (unsafe { (*hdr).size }) - header - tail
    }

    /// Writes a fresh free-block header at `base` with `size` bytes,
    /// leaving its physical-chain and free-list links for the caller to
    /// set up (this is shared by heap growth and is distinct from
    /// [`AllocatorState::split`], which carves an existing block).
    fn write_free_header(&self, base: usize, size: usize) -> *mut BlockHeader {
        let hdr = base as *mut BlockHeader;
        unsafe {
            hdr.write(BlockHeader {
                magic: self.config.magic,
                head_canary: self.config.head_canary,
                size,
                free: true,
                marked: false,
                origin: None,
                phys_prev: core::ptr::null_mut(),
                phys_next: core::ptr::null_mut(),
                free_prev: core::ptr::null_mut(),
                free_next: core::ptr::null_mut(),
            });
            BlockHeader::arm_tail_canary(hdr, &self.config);
        }
        hdr
    }

    /// Appends a newly grown span to the physical chain and this arena's
    /// free list, updating the single arena's top-chunk cursor (`spec.md`
    /// §3: "the youngest block adjacent to the heap end").
    fn append_grown_block(&mut self, base: usize, size: usize) -> *mut BlockHeader {
        let hdr = self.write_free_header(base, size);
        unsafe {
            (*hdr).phys_prev = self.phys_tail;
            if !self.phys_tail.is_null() {
                (*self.phys_tail).phys_next = hdr;
            } else {
                self.phys_head = hdr;
            }
        }
        self.phys_tail = hdr;
        self.arenas[0].top_chunk = hdr;
        unsafe { self.free_lists.insert(hdr) };
        hdr
    }

    /// Core of `spec.md` §4.7's `alloc`: classify, search (growing the
    /// heap and retrying exactly once on `NO-SPACE`), split, and return.
    pub fn alloc(&mut self, size: usize, strategy: Strategy) -> AllocResult<*mut u8> {
        self.alloc_with_origin(size, strategy, None)
    }

    /// Same as [`AllocatorState::alloc`] but attaches `origin` to the block
    /// for later inspection by a debugger or the collector's diagnostics;
    /// used by the [`crate::dbg_alloc`] macro.
    pub fn alloc_with_origin(
        &mut self,
        size: usize,
        strategy: Strategy,
        origin: Option<Origin>,
    ) -> AllocResult<*mut u8> {
        if size == 0 {
            return Err(AllocError::Inval);
        }
        let total = self.total_block_size(size);

        if size > self.config.mmap_threshold {
            let hdr = self.map_large_block(total)?;
            unsafe { (*hdr).origin = origin };
            return Ok(BlockHeader::payload_addr(hdr) as *mut u8);
        }

        let block = match self.find_fit(total, strategy) {
            Ok(b) => b,
            Err(AllocError::NoSpace) => {
                let grown_base = self.grow_heap(total)?;
                self.append_grown_block(grown_base, total);
                self.find_fit(total, strategy)?
            }
            Err(e) => return Err(e),
        };

        unsafe { self.free_lists.remove(block) };
        if self.arenas[0].top_chunk == block {
            self.arenas[0].top_chunk = core::ptr::null_mut();
        }
        unsafe { self.split(block, total) };
        unsafe { (*block).origin = origin };
        self.last_allocated = block;
        log::debug!("alloc: {} bytes at {:#x} (strategy {:?})", size, block as usize, strategy);
        Ok(BlockHeader::payload_addr(block) as *mut u8)
    }

    /// `calloc(n, elem, strategy)`: zero-filled allocation with an
    /// explicit overflow check on `n * elem` (`spec.md` §9 flags the
    /// reference implementation's check as merely implicit).
    pub fn calloc(&mut self, n: usize, elem: usize, strategy: Strategy) -> AllocResult<*mut u8> {
        let size = n.checked_mul(elem).ok_or(AllocError::Overflow)?;
        if size == 0 {
            return Err(AllocError::Inval);
        }
        let ptr = self.alloc(size, strategy)?;
        unsafe { memops::memset(ptr, 0, size) };
        Ok(ptr)
    }

    /// `realloc(p, new_size, strategy)` per `spec.md` §4.7's policy table.
    pub fn realloc(&mut self, p: *mut u8, new_size: usize, strategy: Strategy) -> AllocResult<*mut u8> {
        if p.is_null() {
            return self.alloc(new_size, strategy);
        }
        if new_size == 0 {
            self.free(p)?;
            return Ok(core::ptr::null_mut());
        }

        let hdr = self.header_for_payload(p)?;
        let capacity = self.payload_capacity(hdr);
        if capacity >= new_size {
            return Ok(p);
        }

        let new_ptr = self.alloc(new_size, strategy)?;
        let copy_len = capacity.min(new_size);
        unsafe { memops::memcpy(new_ptr, p, copy_len) };
        // The old block was already validated by `header_for_payload`
        // above; `free` cannot fail on a pointer this function itself
        // just proved live.
        self.free(p).expect("freeing the just-validated old realloc block");
        Ok(new_ptr)
    }

    /// `free(p)`: validates, then dispatches to the mapped-region unmap
    /// path, the tail-shrink path, or plain merge-and-reinsert.
    pub fn free(&mut self, p: *mut u8) -> AllocResult<()> {
        if p.is_null() {
            return Ok(());
        }
        let hdr = self.header_for_payload(p)?;

        let hdr_addr = hdr as usize;
        if self.is_mapped_base(hdr_addr) {
            return self.unmap_large_block(hdr);
        }

        unsafe {
            if (*hdr).free {
                log::warn!("double free at {:#x}", p as usize);
                return Err(AllocError::DoubleFree);
            }
            (*hdr).origin = None;
        }

        if self.try_tail_shrink(hdr) {
            return Ok(());
        }

        unsafe {
            (*hdr).free = true;
            self.merge(hdr);
        }
        Ok(())
    }

    /// Resolves a payload pointer to its header, validating it against
    /// either the heap bounds (`spec.md` §4.1) or, for a mapped-region
    /// payload, the header's magic and canaries directly.
    fn header_for_payload(&self, p: *mut u8) -> AllocResult<*mut BlockHeader> {
        let addr = p as usize;
        let header_size = core::mem::size_of::<BlockHeader>();
        if addr < header_size {
            return Err(AllocError::OutOfHeap);
        }
        let hdr_addr = addr - header_size;
        let hdr = hdr_addr as *mut BlockHeader;

        if self.is_mapped_base(hdr_addr) {
            unsafe {
                if (*hdr).magic != self.config.magic {
                    log::error!("free: mapped block has corrupt magic");
                    return Err(AllocError::CorruptMagic);
                }
                if (*hdr).head_canary != self.config.head_canary {
                    log::error!("free: mapped block has corrupt head canary");
                    return Err(AllocError::CorruptHeadCanary);
                }
            }
            return Ok(hdr);
        }

        if hdr_addr < self.heap_base || hdr_addr >= self.heap_end {
            log::warn!("pointer {:#x} is outside the heap and not a mapped region", addr);
            return Err(AllocError::OutOfHeap);
        }
        unsafe {
            validate(hdr, self.heap_base, self.heap_end, &self.config).map_err(|e| {
                if e.is_corruption() {
                    log::error!("header validation failed for {:#x}: {e}", addr);
                } else {
                    log::warn!("header validation failed for {:#x}: {e}", addr);
                }
                e
            })?;
        }
        Ok(hdr)
    }
}

impl Default for AllocatorState {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide default singleton (`spec.md` §9: "provide a default
/// singleton as a convenience only"). Explicit-context callers should
/// prefer building their own [`AllocatorState`] and calling its methods
/// directly instead of going through this handle.
pub fn global() -> &'static Mutex<AllocatorState> {
    static ALLOCATOR: Lazy<Mutex<AllocatorState>> = Lazy::new(|| Mutex::new(AllocatorState::new()));
    &ALLOCATOR
}

/// `spec.md` §4.7 / §6's `alloc(size, strategy)`.
pub fn alloc(size: usize, strategy: Strategy) -> *mut u8 {
    global().lock().unwrap().alloc(size, strategy).unwrap_or(core::ptr::null_mut())
}

/// `spec.md` §4.7 / §6's `calloc(n, elem, strategy)`.
pub fn calloc(n: usize, elem: usize, strategy: Strategy) -> *mut u8 {
    global().lock().unwrap().calloc(n, elem, strategy).unwrap_or(core::ptr::null_mut())
}

/// `spec.md` §4.7 / §6's `realloc(p, new_size, strategy)`.
pub fn realloc(p: *mut u8, new_size: usize, strategy: Strategy) -> *mut u8 {
    global().lock().unwrap().realloc(p, new_size, strategy).unwrap_or(core::ptr::null_mut())
}

/// `spec.md` §4.7 / §6's `free(p)`. Returns `0` on success, a negative
/// encoding of the [`AllocError`] kind otherwise, matching "operations
/// that return status codes use zero for success and negative kinds for
/// failure" (`spec.md` §7).
pub fn free(p: *mut u8) -> i32 {
    match global().lock().unwrap().free(p) {
        Ok(()) => 0,
        Err(e) => -(1 + e as i32),
    }
}

/// `alloc_first_fit` — a thin wrapper around [`alloc`].
pub fn alloc_first_fit(size: usize) -> *mut u8 {
    alloc(size, Strategy::FirstFit)
}

/// `alloc_next_fit` — a thin wrapper around [`alloc`].
pub fn alloc_next_fit(size: usize) -> *mut u8 {
    alloc(size, Strategy::NextFit)
}

/// `alloc_best_fit` — a thin wrapper around [`alloc`].
pub fn alloc_best_fit(size: usize) -> *mut u8 {
    alloc(size, Strategy::BestFit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::FakeBreak;

    fn fake_state() -> AllocatorState {
        AllocatorState::new_with(Config::default(), Box::new(FakeBreak::new(1 << 16)))
    }

    #[test]
    fn alloc_zero_fails_inval_without_touching_the_heap() {
        let mut state = fake_state();
        let heap_end_before = state.heap_end;
        let result = state.alloc(0, Strategy::FirstFit);
        assert_eq!(result, Err(AllocError::Inval));
        assert_eq!(state.heap_end, heap_end_before, "a rejected zero-size request must not grow the heap");
    }

    #[test]
    fn free_null_is_a_no_op() {
        let mut state = fake_state();
        assert_eq!(state.free(core::ptr::null_mut()), Ok(()));
    }

    #[test]
    fn every_payload_pointer_is_aligned() {
        let mut state = fake_state();
        for size in [1usize, 3, 7, 15, 31, 63, 127, 255] {
            let p = state.alloc(size, Strategy::FirstFit).unwrap();
            assert_eq!(p as usize % state.config.alignment, 0, "size {size} produced a misaligned pointer");
        }
    }

    #[test]
    fn allocation_below_the_mmap_threshold_uses_the_heap() {
        let mut state = AllocatorState::new_with(
            Config { mmap_threshold: 1024, ..Config::default() },
            Box::new(FakeBreak::new(1 << 16)),
        );
        let p = state.alloc(1024 - 256, Strategy::FirstFit).unwrap();
        let hdr_addr = p as usize - core::mem::size_of::<BlockHeader>();
        assert!(!state.is_mapped_base(hdr_addr), "a request safely under the threshold must stay on the heap");
    }

    #[test]
    fn allocation_exactly_at_the_mmap_threshold_still_uses_the_heap() {
        let mut state = AllocatorState::new_with(
            Config { mmap_threshold: 1024, ..Config::default() },
            Box::new(FakeBreak::new(1 << 16)),
        );
        let p = state.alloc(1024, Strategy::FirstFit).unwrap();
        let hdr_addr = p as usize - core::mem::size_of::<BlockHeader>();
        assert!(!state.is_mapped_base(hdr_addr), "a payload size equal to the threshold must not be promoted");
    }

    #[test]
    fn allocation_past_the_mmap_threshold_is_page_mapped() {
        let mut state = AllocatorState::new_with(
            Config { mmap_threshold: 1024, ..Config::default() },
            Box::new(FakeBreak::new(1 << 20)),
        );
        let p = state.alloc(1025, Strategy::FirstFit).unwrap();
        let hdr_addr = p as usize - core::mem::size_of::<BlockHeader>();
        assert!(state.is_mapped_base(hdr_addr), "a payload size exceeding the threshold must be mapped");
    }

    #[test]
    fn default_mmap_threshold_boundary_matches_the_spec_example() {
        // spec's own boundary example: MMAP_THRESHOLD - 1 stays on the
        // heap, MMAP_THRESHOLD + 1 is page-mapped, at the real default
        // threshold (not a shrunk test threshold that masks header
        // overhead in noise).
        let threshold = Config::default().mmap_threshold;
        let mut state = AllocatorState::new_with(Config::default(), Box::new(FakeBreak::new(8 << 20)));

        let under = state.alloc(threshold - 1, Strategy::FirstFit).unwrap();
        let under_hdr = under as usize - core::mem::size_of::<BlockHeader>();
        assert!(!state.is_mapped_base(under_hdr), "MMAP_THRESHOLD - 1 must use the heap");

        let over = state.alloc(threshold + 1, Strategy::FirstFit).unwrap();
        let over_hdr = over as usize - core::mem::size_of::<BlockHeader>();
        assert!(state.is_mapped_base(over_hdr), "MMAP_THRESHOLD + 1 must use page mapping");
    }

    #[test]
    fn realloc_to_the_same_size_returns_the_same_pointer() {
        let mut state = fake_state();
        let p = state.alloc(48, Strategy::FirstFit).unwrap();
        let same = state.realloc(p, 48, Strategy::FirstFit).unwrap();
        assert_eq!(same, p, "realloc to a size already within capacity must be a no-op");
    }

    #[test]
    fn realloc_to_a_smaller_size_keeps_the_pointer() {
        let mut state = fake_state();
        let p = state.alloc(64, Strategy::FirstFit).unwrap();
        let shrunk = state.realloc(p, 8, Strategy::FirstFit).unwrap();
        assert_eq!(shrunk, p, "shrinking within the same block's capacity must not move the payload");
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        let mut state = fake_state();
        let p = state.alloc(32, Strategy::FirstFit).unwrap();
        let result = state.realloc(p, 0, Strategy::FirstFit).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn double_free_is_rejected_without_touching_heap_state() {
        let mut state = fake_state();
        let p = state.alloc(16, Strategy::FirstFit).unwrap();
        let _anchor = state.alloc(16, Strategy::FirstFit).unwrap();
        state.free(p).unwrap();
        assert_eq!(state.free(p), Err(AllocError::DoubleFree));
    }

    #[test]
    fn free_then_alloc_returns_the_heap_to_its_prior_extent() {
        let mut state = fake_state();
        let heap_end_before = state.heap_end;
        let p = state.alloc(64, Strategy::FirstFit).unwrap();
        assert!(state.heap_end > heap_end_before);
        state.free(p).unwrap();
        assert_eq!(state.heap_end, heap_end_before, "free(alloc(n)) must return the heap to its prior extent");
    }
}
