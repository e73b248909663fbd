use std::io::Read;

use krball::{alloc_best_fit, alloc_first_fit, alloc_next_fit, calloc, free, gc_disable, gc_enable, realloc, Strategy};

/// Waits until the user presses ENTER. Useful for inspecting the process
/// break with `pmap`/`htop`/`gdb` between steps of the demo.
fn block_until_enter_pressed() {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
    let brk = unsafe { libc::sbrk(0) };
    println!("[{}] PID = {}, program break (sbrk(0)) = {:?}", label, std::process::id(), brk);
}

fn main() {
    env_logger::init();

    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) First-fit allocation of a small block.
    // --------------------------------------------------------------------
    let first = alloc_first_fit(4);
    println!("\n[1] alloc_first_fit(4) -> {:?}", first);
    unsafe { (first as *mut u32).write(0xDEADBEEF) };
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) calloc: zero-filled allocation.
    // --------------------------------------------------------------------
    let zeroed = calloc(12, 1, Strategy::FirstFit);
    println!("\n[2] calloc(12, 1) -> {:?}", zeroed);
    let all_zero = (0..12).all(|i| unsafe { zeroed.add(i).read() } == 0);
    println!("[2] all bytes zero? {all_zero}");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) best-fit allocation, then free it to exercise split/merge reuse.
    // --------------------------------------------------------------------
    let third = alloc_best_fit(8);
    println!("\n[3] alloc_best_fit(8) -> {:?}", third);
    unsafe { (third as *mut u64).write(0x1122334455667788) };
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) next-fit allocation, forcing more pointer movement.
    // --------------------------------------------------------------------
    let fourth = alloc_next_fit(32);
    println!("\n[4] alloc_next_fit(32) -> {:?}", fourth);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free the first block, then allocate again to see if the freed
    //    space is reused.
    // --------------------------------------------------------------------
    let status = free(first);
    println!("\n[5] free(first) -> status {status}");
    block_until_enter_pressed();

    let fifth = alloc_first_fit(2);
    println!("\n[6] alloc_first_fit(2) -> {:?} (reused first? {})", fifth, fifth == first);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) realloc: grow a block and confirm the prefix survived the copy.
    // --------------------------------------------------------------------
    let grown = realloc(third, 64, Strategy::FirstFit);
    let preserved = unsafe { (grown as *mut u64).read() } == 0x1122334455667788;
    println!("\n[7] realloc(third, 64) -> {:?}, prefix preserved? {preserved}", grown);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Large allocation crosses the mmap threshold.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = alloc_first_fit(256 * 1024);
    println!("\n[8] alloc_first_fit(256 KiB) -> {:?} (served via mmap)", big);
    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) Run the collector once, synchronously, then leave it running in
    //    the background for the rest of the process lifetime.
    // --------------------------------------------------------------------
    gc_enable();
    println!("\n[9] collector enabled");
    block_until_enter_pressed();
    gc_disable();

    free(grown);
    free(fourth);
    free(fifth);
    free(zeroed);
    free(big);

    println!("\n[10] End of demo.");
}
