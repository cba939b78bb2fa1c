//! Size header stamped in front of every block the public interface
//! hands out. The header keeps size queries independent of whichever
//! allocator algorithm backs the space.

use std::mem;

use crate::align;

/// Bytes between a block's base and the pointer callers see.
pub const HEADER_SIZE: usize = align!(mem::size_of::<usize>());

/// Stamps `total` at `base` and returns the user pointer just past the
/// header. `total` is the full block size, header included.
pub unsafe fn write(
  base: *mut u8,
  total: usize,
) -> *mut u8 {
  debug_assert!(!base.is_null());
  debug_assert!(base as usize % mem::align_of::<usize>() == 0);
  debug_assert!(total >= HEADER_SIZE);

  unsafe {
    (base as *mut usize).write(total);
    base.add(HEADER_SIZE)
  }
}

/// Recovers the block base from a user pointer.
pub unsafe fn base(user: *mut u8) -> *mut u8 {
  debug_assert!(!user.is_null());

  unsafe { user.sub(HEADER_SIZE) }
}

/// Reads back the total size stamped by [`write`].
pub unsafe fn total_size(user: *mut u8) -> usize {
  let total = unsafe { (base(user) as *const usize).read() };
  debug_assert!(total >= HEADER_SIZE);
  total
}
