//! # krball - a segregated-fit heap allocator with a conservative collector
//!
//! `krball` replaces a monotonic bump allocator with a real free-reuse
//! design: blocks carry an integrity-checked header, free space is indexed
//! by a segregated free list, and three interchangeable placement
//! strategies decide where a request lands.
//!
//! ```text
//!   Heap layout:
//!
//!   heap_base                                                   heap_end
//!      │                                                            │
//!      ▼                                                            ▼
//!      ┌─────────┬───────────┬─────────┬───────────┬───────────────┐
//!      │ Block A │  Block B  │ Block C │  Block D  │   (growable)  │
//!      │ in use  │   free    │ in use  │   free    │               │
//!      └─────────┴───────────┴─────────┴───────────┴───────────────┘
//!           ▲          ▲                     ▲
//!           │          └── free-list bin k ──┘
//!           └── every block also threads the physical (address-order) chain
//! ```
//!
//! Requests at or above [`config::Config::mmap_threshold`] skip the heap
//! entirely and are served from their own `mmap` region (`spec.md` §4.6).
//! An optional background thread (see [`collector`]) periodically walks
//! conservative roots and reclaims anything unreachable, using the same
//! free/merge path explicit [`allocator::free`] takes.
//!
//! ## Crate structure
//!
//! ```text
//!   krball
//!   ├── config     - tunable parameters (alignment, bin layout, thresholds)
//!   ├── error      - the AllocError taxonomy
//!   ├── sys        - BreakSource: sbrk/mmap/munmap behind a trait
//!   ├── align      - alignment arithmetic (align_up!)
//!   ├── block      - BlockHeader layout and validation
//!   ├── freelist   - segregated free-list bins
//!   ├── heap       - heap growth/shrink, large-block mmap path
//!   ├── splitmerge - carving and coalescing blocks
//!   ├── placement  - first-fit / next-fit / best-fit
//!   ├── collector  - background mark-and-sweep
//!   ├── memops     - accelerated memset/memcpy
//!   └── allocator  - AllocatorState, the global singleton, public API
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use krball::{alloc_first_fit, free};
//!
//! unsafe {
//!     let ptr = alloc_first_fit(64);
//!     assert!(!ptr.is_null());
//!     ptr.write(0x42);
//!     free(ptr);
//! }
//! ```
//!
//! Callers who need more than the default singleton — a custom
//! [`config::Config`], or several independent allocators in one process —
//! should build their own [`allocator::AllocatorState`] and call its
//! methods directly instead of going through the free functions here.
//!
//! ## Safety
//!
//! Every pointer this crate hands out is backed by raw heap or mapped
//! memory; allocation and deallocation are sound only if callers respect
//! the usual C allocator contract (no double free, no use after free, no
//! writes past the requested size).

pub mod align;
pub(crate) mod block;
pub mod collector;
pub mod config;
pub mod error;
pub mod freelist;
pub mod heap;
pub mod memops;
pub mod placement;
pub mod sys;
mod splitmerge;

pub mod allocator;

pub use allocator::{
    alloc, alloc_best_fit, alloc_first_fit, alloc_next_fit, calloc, free, global, realloc,
    AllocatorState,
};
pub use block::Origin;
pub use collector::{disable as gc_disable, enable as gc_enable};
pub use config::Config;
pub use error::{AllocError, AllocResult};
pub use memops::{memcpy, memset};
pub use placement::Strategy;

/// Allocates `$size` bytes with `$strategy` on `$state`, tagging the block
/// with the call site's file, line, and (optionally) a variable name for
/// later inspection.
///
/// ```rust,ignore
/// let ptr = dbg_alloc!(state, 64, Strategy::FirstFit, "scratch_buf");
/// ```
#[macro_export]
macro_rules! dbg_alloc {
    ($state:expr, $size:expr, $strategy:expr) => {
        $state.alloc_with_origin(
            $size,
            $strategy,
            Some($crate::Origin { file: file!(), line: line!(), var: None }),
        )
    };
    ($state:expr, $size:expr, $strategy:expr, $var:expr) => {
        $state.alloc_with_origin(
            $size,
            $strategy,
            Some($crate::Origin { file: file!(), line: line!(), var: Some($var) }),
        )
    };
}

/// Frees `$ptr` on `$state`, logging the call site first. A thin wrapper
/// around [`AllocatorState::free`] for callers who want the same
/// call-site visibility [`dbg_alloc`] gives allocation.
#[macro_export]
macro_rules! dbg_free {
    ($state:expr, $ptr:expr) => {{
        log::debug!("dbg_free at {}:{} freeing {:p}", file!(), line!(), $ptr);
        $state.free($ptr)
    }};
}
