//! Writing into the guard pages must terminate the process, not corrupt
//! memory. Each scenario runs in a forked child so the fault can be
//! observed from outside.

use std::ptr;

use guardalloc::arena;

fn expect_fault(write_at: fn(*mut u8, usize)) {
  unsafe {
    let pid = libc::fork();
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
      // Child: the write must fault; exiting normally means the guard
      // is absent.
      let size = arena::page_size() * 4;
      let base = match arena::reserve(size) {
        Ok(base) => base.as_ptr(),
        Err(_) => libc::_exit(2),
      };
      write_at(base, size);
      libc::_exit(0);
    }

    let mut status = 0;
    assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
    assert!(
      libc::WIFSIGNALED(status),
      "child exited with {status:#x} instead of faulting"
    );
    let signal = libc::WTERMSIG(status);
    assert!(
      signal == libc::SIGSEGV || signal == libc::SIGBUS,
      "child died of unexpected signal {signal}"
    );
  }
}

#[test]
fn guard_page_before_arena_faults() {
  expect_fault(|base, _size| unsafe { ptr::write_volatile(base.sub(1), 0xEE) });
}

#[test]
fn guard_page_after_arena_faults() {
  expect_fault(|base, size| unsafe { ptr::write_volatile(base.add(size), 0xEE) });
}

#[test]
fn arena_interior_does_not_fault() {
  // Control case: every byte of the usable range is writable in-process.
  let size = arena::page_size() * 4;
  let base = arena::reserve(size).expect("reserve failed");

  unsafe {
    base.as_ptr().write_bytes(0x77, size);
    arena::release(base.as_ptr(), size);
  }
}
