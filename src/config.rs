//! Compile-time-ish configuration surface.
//!
//! `spec.md` §6 lists these as "compile-time configuration"; here they are a
//! runtime-overridable struct so tests can exercise small bin counts and a
//! tiny mmap threshold without touching the production defaults.

/// Tunable parameters for a [`crate::allocator::AllocatorState`].
///
/// All fields have the defaults called out in the specification. Construct
/// a non-default [`Config`] only in tests; production callers should use
/// [`Config::default`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Alignment quantum every payload pointer must satisfy. Must be a
    /// power of two and at least `size_of::<usize>()`.
    pub alignment: usize,
    /// Number of segregated free-list bins (`N` in `spec.md` §4.2).
    pub bin_count: usize,
    /// Byte width of each size class below the overflow bin.
    pub bytes_per_class: usize,
    /// Requests whose payload size exceeds this are promoted to the
    /// page-mapped path (`spec.md` §4.6).
    pub mmap_threshold: usize,
    /// Sleep interval between collector cycles, in milliseconds.
    pub gc_interval_ms: u64,
    /// Header integrity tag.
    pub magic: u32,
    /// Head-canary sentinel.
    pub head_canary: u32,
    /// Tail-canary sentinel.
    pub tail_canary: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            alignment: core::mem::size_of::<usize>(),
            bin_count: 10,
            bytes_per_class: 128,
            mmap_threshold: 128 * 1024,
            gc_interval_ms: 100,
            magic: 0xA110_C8ED,
            head_canary: 0xC0FF_EE11,
            tail_canary: 0xFEED_FACE,
        }
    }
}

impl Config {
    /// Validates the configuration, panicking on a malformed value.
    ///
    /// Called once when an [`crate::allocator::AllocatorState`] is built; a bad
    /// config is a programmer error, not a runtime condition to recover from.
    pub(crate) fn assert_valid(&self) {
        assert!(self.alignment.is_power_of_two(), "alignment must be a power of two");
        assert!(
            self.alignment >= core::mem::size_of::<usize>(),
            "alignment must be at least pointer-sized"
        );
        assert!(self.bin_count > 0, "bin_count must be positive");
        assert!(self.bytes_per_class > 0, "bytes_per_class must be positive");
        assert!(self.mmap_threshold > 0, "mmap_threshold must be positive");
        assert_ne!(self.magic, self.head_canary);
        assert_ne!(self.magic, self.tail_canary);
        assert_ne!(self.head_canary, self.tail_canary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().assert_valid();
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_alignment_is_rejected() {
        Config { alignment: 24, ..Config::default() }.assert_valid();
    }

    #[test]
    #[should_panic(expected = "pointer-sized")]
    fn sub_word_alignment_is_rejected() {
        Config { alignment: 1, ..Config::default() }.assert_valid();
    }

    #[test]
    #[should_panic]
    fn colliding_sentinels_are_rejected() {
        Config { head_canary: Config::default().magic, ..Config::default() }.assert_valid();
    }
}
