//! Thin wrappers over the OS primitives `spec.md` §1/§6 treats as external
//! collaborators: the break primitive, anonymous page mapping, and the page
//! size query. Everything above this module talks to a [`BreakSource`]
//! trait object, never to `libc` directly, so the core can be driven in
//! tests against an in-process fake instead of the real process break
//! (which is a single global resource `cargo test`'s parallel threads would
//! otherwise trample).

use libc::{c_void, intptr_t};

/// A break/mmap provider. `spec.md` §6 specifies exactly these four
/// primitives.
pub trait BreakSource: Send {
    /// Moves the break by `delta` bytes (may be negative) and returns the
    /// *previous* break address. `delta == 0` is the query idiom.
    fn sbrk(&mut self, delta: isize) -> Option<usize>;

    /// Produces a page-aligned, readable+writable anonymous region of at
    /// least `len` bytes. Returns its base address.
    fn map(&mut self, len: usize) -> Option<usize>;

    /// Releases a region previously returned by [`BreakSource::map`].
    fn unmap(&mut self, addr: usize, len: usize) -> bool;

    /// The OS page size in bytes.
    fn page_size(&self) -> usize;
}

/// The production [`BreakSource`]: real `sbrk`/`mmap`/`munmap` via `libc`.
#[derive(Default)]
pub struct LibcBreak;

impl LibcBreak {
    pub fn new() -> Self {
        LibcBreak
    }
}

impl BreakSource for LibcBreak {
    fn sbrk(&mut self, delta: isize) -> Option<usize> {
        // SAFETY: `sbrk` is a plain syscall wrapper; the error sentinel is
        // `(void*)-1`, checked below before the result is treated as an
        // address.
        let prev = unsafe { libc::sbrk(delta as intptr_t) };
        if prev as isize == -1 {
            None
        } else {
            Some(prev as usize)
        }
    }

    fn map(&mut self, len: usize) -> Option<usize> {
        // SAFETY: anonymous, non-file-backed mapping; `len` is validated by
        // the caller to be page-rounded and non-zero before this is called.
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            None
        } else {
            Some(addr as usize)
        }
    }

    fn unmap(&mut self, addr: usize, len: usize) -> bool {
        // SAFETY: caller guarantees `addr`/`len` match a prior `map` call.
        let rc = unsafe { libc::munmap(addr as *mut c_void, len) };
        rc == 0
    }

    fn page_size(&self) -> usize {
        // SAFETY: `sysconf` with a read-only query name has no preconditions.
        let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if ps <= 0 { 4096 } else { ps as usize }
    }
}

/// An in-process fake break/mmap source for deterministic unit tests.
///
/// Both "heap" and "mapped" memory are served out of one leaked buffer so
/// addresses are stable pointers a test can dereference directly. Capacity
/// is fixed at construction time; growth past it behaves like real `sbrk`
/// hitting `RLIMIT_DATA` (`sbrk` returns `None`).
pub struct FakeBreak {
    base: usize,
    capacity: usize,
    brk: usize,
    map_cursor: usize,
    page_size: usize,
    _storage: Box<[u8]>,
}

impl FakeBreak {
    /// Builds a fake address space of `capacity` bytes, growing upward from
    /// a heap region at the low end and mapped regions from the high end,
    /// so the two paths never collide under test workloads.
    pub fn new(capacity: usize) -> Self {
        let mut storage = vec![0u8; capacity].into_boxed_slice();
        let base = storage.as_mut_ptr() as usize;
        FakeBreak {
            base,
            capacity,
            brk: base,
            map_cursor: base + capacity,
            page_size: 4096,
            _storage: storage,
        }
    }

    /// Base address of the simulated heap (matches the first `sbrk(0)`).
    pub fn base(&self) -> usize {
        self.base
    }
}

impl BreakSource for FakeBreak {
    fn sbrk(&mut self, delta: isize) -> Option<usize> {
        let prev = self.brk;
        if delta == 0 {
            return Some(prev);
        }
        let next = if delta > 0 {
            prev.checked_add(delta as usize)?
        } else {
            prev.checked_sub((-delta) as usize)?
        };
        if next > self.map_cursor || next < self.base {
            return None;
        }
        if delta > 0 {
            // SAFETY: `[prev, next)` lies within `_storage`'s allocation by
            // the bound check above.
            unsafe {
                core::ptr::write_bytes(prev as *mut u8, 0, delta as usize);
            }
        }
        self.brk = next;
        Some(prev)
    }

    fn map(&mut self, len: usize) -> Option<usize> {
        let new_cursor = self.map_cursor.checked_sub(len)?;
        if new_cursor < self.brk {
            return None;
        }
        self.map_cursor = new_cursor;
        // SAFETY: `[new_cursor, new_cursor+len)` lies within `_storage` and
        // does not overlap the heap region by the bound check above.
        unsafe {
            core::ptr::write_bytes(new_cursor as *mut u8, 0, len);
        }
        Some(new_cursor)
    }

    fn unmap(&mut self, addr: usize, len: usize) -> bool {
        addr >= self.base && addr + len <= self.base + self.capacity
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}
