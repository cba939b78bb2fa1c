//! Guarded virtual-memory reservations.
//!
//! Every reservation is a contiguous anonymous mapping laid out as
//! `[guard page][usable region][guard page]`. The guards stay `PROT_NONE`
//! for the lifetime of the mapping, so any access that strays past either
//! edge of the usable region faults immediately instead of silently
//! corrupting neighbouring memory.
//!
//! On Linux and Android the regions are additionally named via
//! `prctl(PR_SET_VMA)`, which makes them show up in `/proc/<pid>/maps`
//! and `pmap` output. Naming is best-effort: kernels built without
//! `CONFIG_ANON_VMA_NAME` reject the call and the reservation proceeds
//! unlabeled.

use std::{
  ffi::CStr,
  io,
  ptr::{self, NonNull},
};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE, c_void};
use log::{trace, warn};
use thiserror::Error;

/// Diagnostic names for the whole reservation (guards included) and for
/// the writable interior.
const GUARD_LABEL: &CStr = c"guardalloc guard";
const ARENA_LABEL: &CStr = c"guardalloc arena";

/// Failure to obtain or open up a guarded reservation.
///
/// Exhaustion of an already-reserved arena is not an [`ArenaError`]; it
/// surfaces as a null pointer from the allocation entry points.
#[derive(Debug, Error)]
pub enum ArenaError {
  /// The platform could not provide the address space.
  #[error("reserving {size} arena bytes failed")]
  Reserve {
    size: usize,
    #[source]
    source: io::Error,
  },
  /// The region was reserved but its interior could not be made
  /// readable and writable.
  #[error("unprotecting {size} arena bytes failed")]
  Protect {
    size: usize,
    #[source]
    source: io::Error,
  },
}

/// Size of one platform page, and therefore of each guard region.
pub fn page_size() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Reserves `size` usable bytes flanked by one guard page on each side.
///
/// Returns the base of the usable region. The guards are never readable
/// or writable; the usable region is exactly `size` bytes as far as this
/// module is concerned, with no rounding applied on behalf of the caller.
///
/// A reservation that cannot be completed is fully unwound before the
/// error returns, so a failed call leaves no mapping behind.
pub fn reserve(size: usize) -> Result<NonNull<u8>, ArenaError> {
  let page = page_size();
  let total = size.checked_add(page * 2).ok_or_else(|| ArenaError::Reserve {
    size,
    source: io::Error::from_raw_os_error(libc::ENOMEM),
  })?;

  let base = unsafe {
    libc::mmap(
      ptr::null_mut(),
      total,
      PROT_NONE,
      MAP_PRIVATE | MAP_ANONYMOUS,
      -1,
      0,
    )
  };
  if base == MAP_FAILED {
    return Err(ArenaError::Reserve {
      size,
      source: io::Error::last_os_error(),
    });
  }

  let usable = unsafe { (base as *mut u8).add(page) };
  if unsafe { libc::mprotect(usable as *mut c_void, size, PROT_READ | PROT_WRITE) } != 0 {
    let source = io::Error::last_os_error();
    unsafe { libc::munmap(base, total) };
    return Err(ArenaError::Protect { size, source });
  }

  label(base as *mut u8, total, GUARD_LABEL);
  label(usable, size, ARENA_LABEL);

  trace!("reserved {size} usable bytes at {usable:p}");

  // mmap never places an anonymous mapping at address zero.
  Ok(unsafe { NonNull::new_unchecked(usable) })
}

/// Unmaps a reservation made by [`reserve`], guards included.
///
/// # Safety
///
/// `addr` must be a base returned by [`reserve`] that has not been
/// released yet, and `size` must be the same value passed at reservation
/// time. The guard offsets are derived from these two values rather than
/// stored, so a mismatched size unmaps the wrong range.
pub unsafe fn release(
  addr: *mut u8,
  size: usize,
) {
  let page = page_size();
  if unsafe { libc::munmap(addr.sub(page) as *mut c_void, size + page * 2) } != 0 {
    warn!(
      "releasing {size} arena bytes at {addr:p} failed: {}",
      io::Error::last_os_error()
    );
    return;
  }
  trace!("released {size} usable bytes at {addr:p}");
}

/// Moves a reservation to a fresh guarded region of `new_size` bytes,
/// carrying over the first `min(old_size, new_size)` bytes of content.
///
/// Growing always relocates: extending in place would strand the old
/// trailing guard inside the usable region on some platforms and is not
/// portably expressible. On failure the old mapping is left fully intact.
///
/// # Safety
///
/// Same contract as [`release`] for `addr` and `old_size`. On success the
/// old base is unmapped and must not be used again.
pub unsafe fn grow(
  addr: *mut u8,
  old_size: usize,
  new_size: usize,
) -> Result<NonNull<u8>, ArenaError> {
  let fresh = reserve(new_size)?;
  unsafe {
    ptr::copy_nonoverlapping(addr, fresh.as_ptr(), old_size.min(new_size));
    release(addr, old_size);
  }
  trace!(
    "grew arena {addr:p} ({old_size} bytes) into {:p} ({new_size} bytes)",
    fresh.as_ptr()
  );
  Ok(fresh)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn label(
  addr: *mut u8,
  len: usize,
  name: &'static CStr,
) {
  unsafe {
    libc::prctl(
      libc::PR_SET_VMA,
      libc::PR_SET_VMA_ANON_NAME,
      addr as usize,
      len,
      name.as_ptr(),
    );
  }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn label(
  _addr: *mut u8,
  _len: usize,
  _name: &'static CStr,
) {
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn usable_range_is_writable() {
    let size = page_size() * 4;
    let base = reserve(size).expect("reserve failed");

    unsafe {
      base.as_ptr().write_bytes(0xA5, size);
      for offset in [0, size / 2, size - 1] {
        assert_eq!(base.as_ptr().add(offset).read(), 0xA5);
      }
      release(base.as_ptr(), size);
    }
  }

  #[test]
  fn grow_relocates_and_preserves_contents() {
    let page = page_size();
    let base = reserve(page).expect("reserve failed");

    unsafe {
      base.as_ptr().write_bytes(0x42, page);

      let grown = grow(base.as_ptr(), page, page * 3).expect("grow failed");
      for offset in 0..page {
        assert_eq!(grown.as_ptr().add(offset).read(), 0x42);
      }

      // The extension is part of the new usable region.
      grown.as_ptr().add(page * 3 - 1).write(0x43);

      release(grown.as_ptr(), page * 3);
    }
  }

  #[test]
  fn impossible_reservation_reports_failure() {
    assert!(matches!(
      reserve(usize::MAX),
      Err(ArenaError::Reserve { .. })
    ));
  }

  #[cfg(target_os = "linux")]
  fn protection_of(addr: usize) -> Option<String> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    for line in maps.lines() {
      let mut parts = line.split_whitespace();
      let range = parts.next()?;
      let perms = parts.next()?;
      let (lo, hi) = range.split_once('-')?;
      let lo = usize::from_str_radix(lo, 16).ok()?;
      let hi = usize::from_str_radix(hi, 16).ok()?;
      if (lo..hi).contains(&addr) {
        return Some(perms.to_string());
      }
    }
    None
  }

  #[cfg(target_os = "linux")]
  #[test]
  fn guards_flank_the_usable_region() {
    let size = page_size() * 2;
    let base = reserve(size).expect("reserve failed");
    let addr = base.as_ptr() as usize;

    assert!(protection_of(addr).unwrap().starts_with("rw"));
    assert!(protection_of(addr + size - 1).unwrap().starts_with("rw"));
    assert!(protection_of(addr - 1).unwrap().starts_with("---"));
    assert!(protection_of(addr + size).unwrap().starts_with("---"));

    unsafe { release(base.as_ptr(), size) };
  }
}
