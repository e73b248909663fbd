//! End-to-end scenarios exercised against the real break/mmap primitives
//! (unit tests beside each module use the in-process `FakeBreak`; these
//! need the genuine OS resources, so they live here as integration tests).
//!
//! All tests that build their own `AllocatorState` serialize on `SERIAL`:
//! the process break is one global resource, and the test harness runs
//! tests concurrently by default.

use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;

use krball::allocator::AllocatorState;
use krball::error::AllocError;
use krball::placement::Strategy;

static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[test]
fn scenario_1_alloc_set_pattern_free_then_reuse() {
    let _guard = SERIAL.lock().unwrap();
    let mut state = AllocatorState::new();

    let p = state.alloc(16, Strategy::FirstFit).expect("alloc 16");
    assert!(!p.is_null());
    assert_eq!(p as usize % core::mem::size_of::<usize>(), 0);
    unsafe { core::ptr::write_bytes(p, 0xFF, 16) };

    state.free(p).expect("free");

    let p2 = state.alloc(16, Strategy::FirstFit).expect("alloc 16 again");
    assert_eq!(p, p2, "first-fit must reuse the just-freed address for a matching size");
}

#[test]
fn scenario_2_calloc_zero_fills_and_frees() {
    let _guard = SERIAL.lock().unwrap();
    let mut state = AllocatorState::new();

    let p = state.calloc(10, core::mem::size_of::<i32>(), Strategy::FirstFit).expect("calloc");
    assert!(!p.is_null());
    let ints = p as *const i32;
    for i in 0..10 {
        assert_eq!(unsafe { ints.add(i).read() }, 0);
    }
    state.free(p).expect("free after calloc");
}

#[test]
fn scenario_3_realloc_grows_and_preserves_prefix() {
    let _guard = SERIAL.lock().unwrap();
    let mut state = AllocatorState::new();

    let p = state.alloc(16, Strategy::FirstFit).expect("alloc 16");
    let pattern: [u8; 16] = core::array::from_fn(|i| i as u8);
    unsafe { core::ptr::copy_nonoverlapping(pattern.as_ptr(), p, 16) };

    let grown = state.realloc(p, 64, Strategy::FirstFit).expect("realloc to 64");
    assert!(!grown.is_null());
    let prefix = unsafe { core::slice::from_raw_parts(grown, 16) };
    assert_eq!(prefix, &pattern);

    state.free(grown).expect("free grown block");
}

#[test]
fn scenario_4_split_reuse_across_many_blocks() {
    let _guard = SERIAL.lock().unwrap();
    let mut state = AllocatorState::new();

    let mut blocks: Vec<*mut u8> = (0..10)
        .map(|_| state.alloc(64, Strategy::FirstFit).expect("alloc 64"))
        .collect();

    // Free every other 64-byte block.
    let mut freed = Vec::new();
    for i in (0..blocks.len()).step_by(2) {
        state.free(blocks[i]).expect("free even-indexed block");
        freed.push(blocks[i] as usize);
    }

    // Each 32-byte allocation should land at the front of one of the
    // freed 64-byte blocks: split always hands out the front portion of
    // the consumed free block unchanged.
    for _ in 0..5 {
        let p = state.alloc(32, Strategy::FirstFit).expect("alloc 32");
        assert!(
            freed.contains(&(p as usize)),
            "split-reuse must return an address previously freed as a 64-byte block"
        );
    }

    for i in (1..blocks.len()).step_by(2) {
        state.free(blocks[i]).expect("free odd-indexed block");
    }
    blocks.clear();
}

#[test]
fn scenario_5_double_free_is_rejected() {
    let _guard = SERIAL.lock().unwrap();
    let mut state = AllocatorState::new();

    // A second, still-live block keeps `p` from being the physical-chain
    // tail, so freeing it takes the merge-and-reinsert path rather than
    // tail-shrink (which would hand the page back to the OS and make a
    // second read of the header undefined instead of a clean DOUBLE-FREE).
    let p = state.alloc(16, Strategy::FirstFit).expect("alloc 16");
    let _anchor = state.alloc(16, Strategy::FirstFit).expect("alloc anchor");

    state.free(p).expect("first free succeeds");

    let second = state.free(p);
    assert_eq!(second, Err(AllocError::DoubleFree));
}

#[test]
fn scenario_6_collector_reclaims_heap_and_mapped_blocks() {
    let _guard = SERIAL.lock().unwrap();

    // The collector only ever runs against the process-wide singleton, so
    // this scenario drives the free functions instead of a local
    // AllocatorState. The surviving pointers are kept in stack-resident
    // fixed arrays and registered as auxiliary roots: the background
    // collector thread conservatively scans its own stack plus whatever
    // the caller has registered, not every other thread's stack, so an
    // application that wants cross-thread roots visible to it must
    // publish them this way.
    const SMALL: usize = 1024;
    const LARGE: usize = 132 * 1024;

    let mut small: [*mut u8; 16] = [core::ptr::null_mut(); 16];
    for slot in small.iter_mut() {
        *slot = krball::alloc_first_fit(SMALL);
    }
    let mut large: [*mut u8; 16] = [core::ptr::null_mut(); 16];
    for slot in large.iter_mut() {
        *slot = krball::alloc_first_fit(LARGE);
    }
    assert!(small.iter().all(|p| !p.is_null()));
    assert!(large.iter().all(|p| !p.is_null()));

    let mut dropped_large = Vec::new();
    for i in (0..small.len()).step_by(2) {
        small[i] = core::ptr::null_mut();
    }
    for i in (0..large.len()).step_by(2) {
        dropped_large.push(large[i] as usize);
        large[i] = core::ptr::null_mut();
    }

    let small_root = (small.as_ptr() as usize, core::mem::size_of_val(&small));
    let large_root = (large.as_ptr() as usize, core::mem::size_of_val(&large));
    {
        let mut g = krball::global().lock().unwrap();
        g.register_root(small_root.0, small_root.1);
        g.register_root(large_root.0, large_root.1);
    }

    krball::gc_enable();
    std::thread::sleep(Duration::from_millis(300));
    krball::gc_disable();

    {
        let mut g = krball::global().lock().unwrap();
        g.unregister_root(small_root.0, small_root.1);
        g.unregister_root(large_root.0, large_root.1);
    }

    let mut reused_small = Vec::new();
    for _ in 0..8 {
        reused_small.push(krball::alloc_best_fit(SMALL));
    }
    let mut reused_large = Vec::new();
    for _ in 0..8 {
        reused_large.push(krball::alloc_best_fit(LARGE));
    }
    assert!(reused_small.iter().all(|p| !p.is_null()), "heap-path allocations must succeed after collection");
    assert!(reused_large.iter().all(|p| !p.is_null()), "mapped-path allocations must succeed after collection");
    assert!(
        reused_large.iter().any(|p| dropped_large.contains(&(*p as usize))),
        "at least one reused large-block address must equal a previously dropped one"
    );

    for p in small.into_iter().chain(large).chain(reused_small).chain(reused_large) {
        if !p.is_null() {
            krball::free(p);
        }
    }
}
