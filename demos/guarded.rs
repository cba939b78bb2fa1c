use std::io::Read;

use guardalloc::{PcacheAlloc, arena};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mappings with `pmap <pid>` or
/// `cat /proc/<pid>/maps`. On Linux/Android the regions show up as
/// `[anon:guardalloc arena]` and `[anon:guardalloc guard]`.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn main() {
  println!("PID = {}", std::process::id());

  // --------------------------------------------------------------------
  // 1) Reserve a raw guarded arena and look at it from the outside.
  // --------------------------------------------------------------------
  let size = arena::page_size() * 4;
  let base = arena::reserve(size).expect("arena reservation failed");
  println!("\n[1] Reserved {} usable bytes at {:p}", size, base.as_ptr());
  println!("[1] One PROT_NONE page sits on each side of that range.");
  block_until_enter_pressed();

  unsafe {
    base.as_ptr().write_bytes(0xAB, size);
    println!("[1] Filled the whole usable range with 0xAB, no fault.");
    arena::release(base.as_ptr(), size);
  }

  // --------------------------------------------------------------------
  // 2) A growable page-cache allocator: blocks carry their own size.
  // --------------------------------------------------------------------
  let alloc = PcacheAlloc::growable();

  let block = alloc.malloc(4096);
  println!("\n[2] malloc(4096) -> {block:p}");
  unsafe {
    block.write_bytes(0x00, 4096);
    println!("[2] memsize() = {} (header included)", alloc.memsize(block));
  }
  block_until_enter_pressed();

  let zeroed = alloc.malloc_zero(64);
  unsafe {
    println!("[3] malloc_zero(64) -> {zeroed:p}, first byte = {}", zeroed.read());
    alloc.free(zeroed);
    alloc.free(block);
  }

  // --------------------------------------------------------------------
  // 3) A fixed-capacity allocator runs dry instead of growing.
  // --------------------------------------------------------------------
  let fixed = PcacheAlloc::fixed(4096);
  let mut count = 0;
  loop {
    let p = fixed.malloc(1024);
    if p.is_null() {
      break;
    }
    count += 1;
  }
  println!("\n[4] Fixed 4096-byte arena served {count} x 1024-byte blocks, then returned null.");

  // --------------------------------------------------------------------
  // 4) Optionally demonstrate the guard fault. This CRASHES the process
  //    with SIGSEGV, which is the whole point of the guard pages.
  // --------------------------------------------------------------------
  if std::env::var_os("GUARDALLOC_DEMO_FAULT").is_some() {
    let size = arena::page_size();
    let base = arena::reserve(size).expect("arena reservation failed");
    println!("\n[5] Writing one byte past the arena end...");
    unsafe {
      std::ptr::write_volatile(base.as_ptr().add(size), 0xEE);
    }
    println!("[5] unreachable: the write above faults");
  } else {
    println!("\n[5] Re-run with GUARDALLOC_DEMO_FAULT=1 to watch a guard-page fault.");
  }
}
