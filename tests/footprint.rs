//! Create/destroy cycles must hand every mapping back to the kernel.

#![cfg(target_os = "linux")]

use guardalloc::{Growth, Space};

fn mapped_kib() -> usize {
  let status = std::fs::read_to_string("/proc/self/status").unwrap();
  status
    .lines()
    .find(|line| line.starts_with("VmSize:"))
    .and_then(|line| line.split_whitespace().nth(1))
    .and_then(|kib| kib.parse().ok())
    .unwrap()
}

#[test]
fn empty_lifecycle_does_not_leak() {
  let before = mapped_kib();

  for _ in 0..64 {
    drop(Space::new(Growth::Fixed(16 * 1024 * 1024)));
  }

  let after = mapped_kib();
  assert!(
    after < before + 1024,
    "mapped size grew from {before} KiB to {after} KiB"
  );
}

#[test]
fn create_allocate_destroy_does_not_leak() {
  const CAPACITY: usize = 4 * 1024 * 1024;

  // Warm up once so one-time runtime allocations do not count as growth.
  {
    let space = Space::new(Growth::Fixed(CAPACITY));
    let ptr = space.alloc(1024);
    assert!(!ptr.is_null());
    unsafe { space.free(ptr, 1024) };
  }

  let before = mapped_kib();
  for _ in 0..64 {
    let space = Space::new(Growth::Fixed(CAPACITY));
    let ptr = space.alloc(1024);
    assert!(!ptr.is_null());
    unsafe {
      ptr.write_bytes(0x3C, 1024);
      space.free(ptr, 1024);
    }
  }
  let after = mapped_kib();

  // 64 leaked reservations would add 256 MiB; allow a little noise.
  assert!(
    after < before + 2 * CAPACITY / 1024,
    "mapped size grew from {before} KiB to {after} KiB"
  );
}
