use std::{io::Read, ptr};

use libc::sbrk;
use segalloc::{AllocatorConfig, SbrkArena, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `gdb`, or just watch how the program break moves between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_heap(allocator: &SegregatedAllocator<SbrkArena>) {
  let stats = allocator.stats();
  println!(
    "    arena = {} bytes, {} free blocks ({} bytes), {} allocated ({} bytes), {} growths, {} merges",
    stats.arena_bytes,
    stats.free_blocks,
    stats.free_bytes,
    stats.allocated_blocks,
    stats.allocated_bytes,
    stats.growth_calls,
    stats.merges,
  );
}

fn main() {
  // A small first heap so that step 6 has to grow it.
  let config = AllocatorConfig {
    initial_growth: 64 * 1024,
    ..AllocatorConfig::from_env()
  };
  let mut allocator = SegregatedAllocator::with_arena(SbrkArena::new(), config);

  print_program_break("start");
  if let Err(err) = allocator.init() {
    eprintln!("init failed: {err}");
    return;
  }
  print_program_break("after init");
  print_heap(&allocator);
  block_until_enter_pressed();

  unsafe {
    // --------------------------------------------------------------------
    // 1) Two 16-byte allocations come out of the one big free block.
    // --------------------------------------------------------------------
    let a = allocator.alloc(16);
    let b = allocator.alloc(16);
    println!("\n[1] a = {:?}, b = {:?}", a, b);
    ptr::write_bytes(a, 0xAB, 16);
    ptr::write_bytes(b, 0xCD, 16);
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Free `a`: it lands in the exact 24-byte list, nothing is merged.
    // --------------------------------------------------------------------
    allocator.free(a);
    println!("\n[2] freed a");
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Same size again: served straight from the exact list.
    // --------------------------------------------------------------------
    let c = allocator.alloc(16);
    println!(
      "\n[3] c = {:?} ({})",
      c,
      if c == a {
        "reused a's block"
      } else {
        "somewhere else"
      }
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow `b` with realloc; the first 16 bytes follow it.
    // --------------------------------------------------------------------
    let b = allocator.realloc(b, 400);
    if b.is_null() {
      println!("\n[4] realloc failed");
      return;
    }
    println!("\n[4] b moved to {:?}, first byte = {:#X}", b, *b);
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Free everything and force a coalescing pass.
    // --------------------------------------------------------------------
    allocator.free(b);
    allocator.free(c);
    allocator.compact();
    println!("\n[5] compacted, check = {:?}", allocator.check_coalesced());
    print_heap(&allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) A request larger than the whole heap moves the program break.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocator.alloc(256 * 1024);
    println!("\n[6] big = {:?}", big);
    print_program_break("after large alloc");
    print_heap(&allocator);
    block_until_enter_pressed();
  }

  println!("\n[7] End of walkthrough. The OS reclaims the heap on exit.");
}
