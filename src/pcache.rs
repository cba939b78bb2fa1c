//! Public allocation interface for the page cache, plus the
//! process-wide lifecycle around it.
//!
//! The four entry points (`malloc`, `malloc_zero`, `free`, `memsize`)
//! are a drop-in substitute for a host's default allocator hooks on the
//! page-cache memory class. Each block carries a size header (see
//! [`crate::record`]), so size queries never depend on the internal
//! bookkeeping of the algorithm backing the space.

use std::{
  ptr::{self, null_mut},
  sync::atomic::{AtomicPtr, Ordering},
};

use log::debug;

use crate::{
  record,
  space::{Growth, Space},
};

/// Guard-paged allocator handle backing one page cache.
///
/// `malloc`, `malloc_zero`, `free` and `memsize` are safe to call
/// concurrently from any number of threads. Creation and drop are not:
/// the host must create the handle before the first allocation and drop
/// it after the last one has returned.
pub struct PcacheAlloc {
  space: Space,
}

impl PcacheAlloc {
  /// Allocator backed by a single reservation of `capacity` bytes.
  pub fn fixed(capacity: usize) -> Self {
    Self {
      space: Space::new(Growth::Fixed(capacity)),
    }
  }

  /// Allocator that reserves additional guarded segments on demand.
  pub fn growable() -> Self {
    Self {
      space: Space::new(Growth::OnDemand),
    }
  }

  /// Allocates `size` writable bytes. Returns null on exhaustion; the
  /// size header is never written on a failed allocation.
  pub fn malloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = size.checked_add(record::HEADER_SIZE) else {
      return null_mut();
    };

    let base = self.space.alloc(total);
    if base.is_null() {
      return null_mut();
    }

    unsafe { record::write(base, total) }
  }

  /// Allocates `size` bytes that read back as zero.
  pub fn malloc_zero(
    &self,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = size.checked_add(record::HEADER_SIZE) else {
      return null_mut();
    };

    let base = self.space.alloc_zeroed(total);
    if base.is_null() {
      return null_mut();
    }

    // The header overwrites the first zeroed word; everything the
    // caller can see stays zero.
    unsafe { record::write(base, total) }
  }

  /// Returns a block. Null is an explicit no-op.
  ///
  /// # Safety
  ///
  /// A non-null `p` must have come from [`PcacheAlloc::malloc`] or
  /// [`PcacheAlloc::malloc_zero`] on this handle and not have been freed
  /// since.
  pub unsafe fn free(
    &self,
    p: *mut u8,
  ) {
    if p.is_null() {
      return;
    }

    unsafe {
      let total = record::total_size(p);
      self.space.free(record::base(p), total);
    }
  }

  /// Size of a block as recorded at allocation time, header included.
  /// Returns 0 for null.
  ///
  /// # Safety
  ///
  /// Same contract as [`PcacheAlloc::free`] for non-null `p`.
  pub unsafe fn memsize(
    &self,
    p: *mut u8,
  ) -> usize {
    if p.is_null() {
      return 0;
    }

    unsafe { record::total_size(p) }
  }
}

static PCACHE: AtomicPtr<PcacheAlloc> = AtomicPtr::new(ptr::null_mut());

/// Installs the process-wide allocator. `Some(capacity)` backs it with a
/// single fixed reservation; `None` lets it grow on demand.
///
/// Must happen-before every call to the other free functions in this
/// module, and must not race with them, with itself, or with
/// [`memdeinit`].
pub fn meminit(capacity: Option<usize>) {
  let alloc = match capacity {
    Some(capacity) => PcacheAlloc::fixed(capacity),
    None => PcacheAlloc::growable(),
  };

  let previous = PCACHE.swap(Box::into_raw(Box::new(alloc)), Ordering::AcqRel);
  debug_assert!(
    previous.is_null(),
    "meminit called twice without memdeinit"
  );

  debug!("page-cache allocator installed (capacity: {capacity:?})");
}

/// Tears the process-wide allocator down, returning every reservation to
/// the platform. Must happen-after the last allocation call has
/// returned.
pub fn memdeinit() {
  let previous = PCACHE.swap(ptr::null_mut(), Ordering::AcqRel);
  if previous.is_null() {
    return;
  }

  drop(unsafe { Box::from_raw(previous) });
  debug!("page-cache allocator torn down");
}

fn instance() -> Option<&'static PcacheAlloc> {
  unsafe { PCACHE.load(Ordering::Acquire).as_ref() }
}

/// Process-wide [`PcacheAlloc::malloc`]. Returns null before [`meminit`]
/// or after [`memdeinit`].
pub fn malloc(size: usize) -> *mut u8 {
  instance().map_or(null_mut(), |alloc| alloc.malloc(size))
}

/// Process-wide [`PcacheAlloc::malloc_zero`].
pub fn malloc_zero(size: usize) -> *mut u8 {
  instance().map_or(null_mut(), |alloc| alloc.malloc_zero(size))
}

/// Process-wide [`PcacheAlloc::free`].
///
/// # Safety
///
/// Same contract as [`PcacheAlloc::free`].
pub unsafe fn free(p: *mut u8) {
  if let Some(alloc) = instance() {
    unsafe { alloc.free(p) };
  }
}

/// Process-wide [`PcacheAlloc::memsize`].
///
/// # Safety
///
/// Same contract as [`PcacheAlloc::memsize`].
pub unsafe fn memsize(p: *mut u8) -> usize {
  instance().map_or(0, |alloc| unsafe { alloc.memsize(p) })
}
