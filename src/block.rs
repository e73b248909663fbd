//! The on-heap block header and its validation contract (`spec.md` §3, §4.1).
//!
//! This generalizes the teacher's `Block { size, is_free, next }` into the
//! full header the specification requires: a magic tag, head/tail canaries,
//! a mark flag for the collector, debug origin, and two independent
//! doubly-linked pointer pairs — one through the physical block chain, one
//! through whichever free-list bin currently owns the block.

use crate::config::Config;
use crate::error::AllocError;

/// Minimum size, in bytes, of any block: header plus one alignment quantum.
pub fn min_block_size(config: &Config) -> usize {
    core::mem::size_of::<BlockHeader>() + config.alignment
}

/// Debug provenance captured at the call site of an allocation, via
/// [`crate::dbg_alloc`].
#[derive(Clone, Copy, Debug)]
pub struct Origin {
    pub file: &'static str,
    pub line: u32,
    pub var: Option<&'static str>,
}

/// The header placed at the base of every heap block.
///
/// Laid out `repr(C)` because its address is derived from raw pointer
/// arithmetic throughout the allocator, not because any foreign code reads
/// it directly — no other process or language ever sees these bytes.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub(crate) magic: u32,
    pub(crate) head_canary: u32,
    /// Total block size: header + payload + trailing canary word, already
    /// aligned up.
    pub(crate) size: usize,
    pub(crate) free: bool,
    pub(crate) marked: bool,
    pub(crate) origin: Option<Origin>,
    /// Links through the physical (address-order) block chain.
    pub(crate) phys_prev: *mut BlockHeader,
    pub(crate) phys_next: *mut BlockHeader,
    /// Links through the free-list bin this block currently belongs to.
    /// Both are null whenever `free` is false.
    pub(crate) free_prev: *mut BlockHeader,
    pub(crate) free_next: *mut BlockHeader,
}

impl BlockHeader {
    /// Address of the payload a user receives for this block.
    pub(crate) fn payload_addr(hdr: *mut BlockHeader) -> usize {
        hdr as usize + core::mem::size_of::<BlockHeader>()
    }

    /// Recovers the header pointer from a payload pointer. The caller must
    /// already know `addr` was produced by [`BlockHeader::payload_addr`];
    /// this performs no validation on its own.
    pub(crate) fn header_of(addr: usize) -> *mut BlockHeader {
        (addr - core::mem::size_of::<BlockHeader>()) as *mut BlockHeader
    }

    /// Address of the trailing canary word for a block of `size` bytes
    /// based at `base`.
    fn tail_canary_addr(base: usize, size: usize) -> usize {
        base + size - core::mem::size_of::<u32>()
    }

    /// Writes the trailing canary for this header. Must be called after
    /// `size` is final.
    pub(crate) unsafe fn arm_tail_canary(hdr: *mut BlockHeader, config: &Config) {
        unsafe {
            let base = hdr as usize;
            let size = (*hdr).size;
            let addr = Self::tail_canary_addr(base, size) as *mut u32;
            addr.write_unaligned(config.tail_canary);
        }
    }

    /// Re-establishes magic and both canaries on a header whose `size` has
    /// just changed (split/merge), per `spec.md` §4.4.
    pub(crate) unsafe fn rearm(hdr: *mut BlockHeader, config: &Config) {
        unsafe {
            (*hdr).magic = config.magic;
            (*hdr).head_canary = config.head_canary;
            Self::arm_tail_canary(hdr, config);
        }
    }
}

/// Validates a candidate header pointer against every check in
/// `spec.md` §4.1, in the specified order, never reading past the block's
/// own declared size.
///
/// # Safety
/// `hdr` must point to readable memory of at least `size_of::<BlockHeader>()`
/// bytes; this function performs the bounds check that makes reading the
/// tail canary sound, but the initial header read itself is on the caller.
pub(crate) unsafe fn validate(
    hdr: *mut BlockHeader,
    heap_base: usize,
    heap_end: usize,
    config: &Config,
) -> Result<(), AllocError> {
    let addr = hdr as usize;
    if addr < heap_base || addr >= heap_end {
        return Err(AllocError::OutOfHeap);
    }
    unsafe {
        if (*hdr).magic != config.magic {
            return Err(AllocError::CorruptMagic);
        }
        if (*hdr).head_canary != config.head_canary {
            return Err(AllocError::CorruptHeadCanary);
        }
        let size = (*hdr).size;
        let tail_addr = BlockHeader::tail_canary_addr(addr, size) as *const u32;
        if tail_addr.read_unaligned() != config.tail_canary {
            return Err(AllocError::CorruptTailCanary);
        }
        if addr.checked_add(size).map_or(true, |end| end > heap_end) {
            return Err(AllocError::SizeOverflow);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_block_size_covers_header_and_one_quantum() {
        let config = Config::default();
        let expected = core::mem::size_of::<BlockHeader>() + config.alignment;
        assert_eq!(min_block_size(&config), expected);
    }

    /// A header whose declared `size` both overflows past `heap_end` and
    /// whose trailing-canary slot (still within the declared size, so the
    /// read stays in-bounds of the backing buffer) holds the wrong value
    /// must report the tail-canary failure, not the size-overflow one:
    /// `spec.md` §4.1 checks (4) tail canary before (5) size bound.
    #[test]
    fn corrupt_tail_canary_outranks_size_overflow() {
        let config = Config::default();
        let mut buf = vec![0u8; 256];
        let hdr = buf.as_mut_ptr() as *mut BlockHeader;
        let heap_base = buf.as_ptr() as usize;
        let heap_end = heap_base + 64;

        unsafe {
            hdr.write(BlockHeader {
                magic: config.magic,
                head_canary: config.head_canary,
                // Declared size reaches past heap_end (overflow condition)
                // while its tail-canary slot at `heap_base + 100 - 4` still
                // lands inside the 256-byte buffer, so the read is sound.
                size: 100,
                free: false,
                marked: false,
                origin: None,
                phys_prev: core::ptr::null_mut(),
                phys_next: core::ptr::null_mut(),
                free_prev: core::ptr::null_mut(),
                free_next: core::ptr::null_mut(),
            });
            // Buffer is zero-filled, which already differs from the real
            // tail canary; write a second, unambiguous wrong value anyway.
            let tail_addr = (heap_base + 100 - core::mem::size_of::<u32>()) as *mut u32;
            tail_addr.write_unaligned(0xDEAD_BEEF);

            assert_eq!(heap_base + 100 > heap_end, true, "fixture must actually overflow heap_end");
            assert_eq!(validate(hdr, heap_base, heap_end, &config), Err(AllocError::CorruptTailCanary));
        }
    }
}
