//! The allocator's error taxonomy (`spec.md` §7).
//!
//! `spec.md` describes error *kinds*; this module gives each one a concrete
//! variant so the internal implementation can propagate with `?` the way
//! the rest of the crate's ambient stack does, while the public C-ABI-shaped
//! surface (`spec.md` §6/§7) still collapses this type to a tagged null or a
//! negative status code — see `crate::allocator::{alloc, free}`.

/// Everything that can go wrong inside the allocator core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Caller passed a null or zero where not allowed.
    #[error("invalid argument")]
    Inval,
    /// Heap growth and large-mapping both failed.
    #[error("out of memory")]
    NoMem,
    /// Arithmetic on a user-supplied size would overflow.
    #[error("size arithmetic overflow")]
    Overflow,
    /// Validator rejected a header: bad magic.
    #[error("block header has a corrupt magic value")]
    CorruptMagic,
    /// Validator rejected a header: head canary mismatch.
    #[error("block header canary is corrupt")]
    CorruptHeadCanary,
    /// Validator rejected a header: tail canary mismatch.
    #[error("block tail canary is corrupt")]
    CorruptTailCanary,
    /// Candidate pointer was not inside heap bounds.
    #[error("pointer is outside the heap")]
    OutOfHeap,
    /// Block's declared size extends past the heap end.
    #[error("block size extends past the heap end")]
    SizeOverflow,
    /// Free of a block whose free flag is already set.
    #[error("double free")]
    DoubleFree,
    /// Placement tag is not one of the three accepted strategies.
    #[error("unrecognized placement strategy")]
    StrategyInvalid,
    /// No free-list bin held a block large enough and heap growth failed.
    #[error("no free block satisfies the request")]
    NoSpace,
}

impl AllocError {
    /// True for the errors the validator raises on a corrupt header; these
    /// are always logged at `error` level per `spec.md` §7.
    pub fn is_corruption(self) -> bool {
        matches!(
            self,
            AllocError::CorruptMagic | AllocError::CorruptHeadCanary | AllocError::CorruptTailCanary
        )
    }
}

/// The crate's `Result` alias.
pub type AllocResult<T> = Result<T, AllocError>;
