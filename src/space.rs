//! One allocator algorithm instance drawing every byte of backing
//! storage from guarded reservations.
//!
//! The algorithm itself is dlmalloc; this module only supplies its
//! system hooks, so the whole heap it manages sits between guard pages
//! and an access that runs off either end of a reservation faults
//! instead of corrupting unrelated memory.

use std::{
  mem::{self, ManuallyDrop},
  ptr::null_mut,
  sync::Arc,
};

use dlmalloc::Dlmalloc;
use log::{error, warn};
use spin::Mutex;

use crate::arena;

/// dlmalloc batches small backing requests into granules of this size.
const GRANULE: usize = 64 * 1024;

/// Capacity policy for a [`Space`].
#[derive(Clone, Copy, Debug)]
pub enum Growth {
  /// One reservation of exactly this many bytes, made on first use.
  /// The space never grows past it; a request that no longer fits
  /// returns null.
  Fixed(usize),
  /// A fresh guarded reservation for every segment the algorithm asks
  /// for, sized to the request.
  OnDemand,
}

struct Segment {
  base: *mut u8,
  size: usize,
}

// Segments are only ever touched under the registry lock.
unsafe impl Send for Segment {}

type SegmentList = Arc<Mutex<Vec<Segment>>>;

/// System hooks feeding dlmalloc from the guarded arena.
///
/// Every grant is recorded in a registry shared with the owning
/// [`Space`], which is what lets teardown return each reservation even
/// if the algorithm never releases a segment on its own.
struct GuardedSystem {
  growth: Growth,
  segments: SegmentList,
}

unsafe impl dlmalloc::Allocator for GuardedSystem {
  fn alloc(
    &self,
    size: usize,
  ) -> (*mut u8, usize, u32) {
    let mut segments = self.segments.lock();
    let granted = match self.growth {
      Growth::Fixed(capacity) => {
        // The capacity is handed out whole, exactly once. A
        // single-granule ask may be served by a smaller arena, since
        // the algorithm checks the granted size against its actual
        // need before carving from it; any larger ask must be
        // covered in full.
        let single_granule = size == GRANULE && capacity >= arena::page_size();
        if !segments.is_empty() || (capacity < size && !single_granule) {
          return (null_mut(), 0, 0);
        }
        capacity
      }
      Growth::OnDemand => size,
    };

    match arena::reserve(granted) {
      Ok(base) => {
        segments.push(Segment {
          base: base.as_ptr(),
          size: granted,
        });
        (base.as_ptr(), granted, 0)
      }
      Err(err) => {
        warn!("backing reservation failed: {err}");
        (null_mut(), 0, 0)
      }
    }
  }

  fn remap(
    &self,
    ptr: *mut u8,
    oldsize: usize,
    newsize: usize,
    can_move: bool,
  ) -> *mut u8 {
    // Growing always relocates, so a pinned remap can never succeed.
    if !can_move || matches!(self.growth, Growth::Fixed(_)) {
      return null_mut();
    }

    let mut segments = self.segments.lock();
    let Some(segment) = segments
      .iter_mut()
      .find(|segment| segment.base == ptr && segment.size == oldsize)
    else {
      error!("remap of unknown segment {ptr:p}");
      return null_mut();
    };

    match unsafe { arena::grow(ptr, oldsize, newsize) } {
      Ok(fresh) => {
        segment.base = fresh.as_ptr();
        segment.size = newsize;
        fresh.as_ptr()
      }
      Err(err) => {
        warn!("backing grow failed: {err}");
        null_mut()
      }
    }
  }

  fn free_part(
    &self,
    _ptr: *mut u8,
    _oldsize: usize,
    _newsize: usize,
  ) -> bool {
    // Guard offsets are derived from the reservation base and size;
    // partial unmapping would leave them dangling.
    false
  }

  fn free(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> bool {
    let mut segments = self.segments.lock();
    let Some(index) = segments
      .iter()
      .position(|segment| segment.base == ptr && segment.size == size)
    else {
      error!("release of unknown segment {ptr:p}");
      return false;
    };

    segments.swap_remove(index);
    unsafe { arena::release(ptr, size) };
    true
  }

  fn can_release_part(
    &self,
    _flags: u32,
  ) -> bool {
    false
  }

  fn allocates_zeros(&self) -> bool {
    // Fresh anonymous mappings are zero-filled by the kernel.
    true
  }

  fn page_size(&self) -> usize {
    arena::page_size()
  }
}

/// A thread-safe allocator space over guarded reservations.
///
/// Construction reserves nothing; backing memory is obtained when the
/// algorithm first asks its system hooks for a segment. Dropping the
/// space releases every reservation it ever made.
pub struct Space {
  algorithm: ManuallyDrop<Mutex<Dlmalloc<GuardedSystem>>>,
  segments: SegmentList,
}

// All algorithm and registry state sits behind the two locks.
unsafe impl Send for Space {}
unsafe impl Sync for Space {}

impl Space {
  pub fn new(growth: Growth) -> Self {
    let segments: SegmentList = Arc::new(Mutex::new(Vec::new()));
    let system = GuardedSystem {
      growth,
      segments: Arc::clone(&segments),
    };

    Self {
      algorithm: ManuallyDrop::new(Mutex::new(Dlmalloc::new_with_allocator(system))),
      segments,
    }
  }

  /// Allocates `size` bytes, word-aligned. Returns null on exhaustion
  /// or when the backing reservation fails.
  pub fn alloc(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.algorithm.lock().malloc(size, mem::size_of::<usize>()) }
  }

  /// Like [`Space::alloc`], but the returned bytes read back as zero.
  pub fn alloc_zeroed(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.algorithm.lock().calloc(size, mem::size_of::<usize>()) }
  }

  /// Returns a block to the space.
  ///
  /// # Safety
  ///
  /// `ptr` must have come from [`Space::alloc`]/[`Space::alloc_zeroed`]
  /// on this space and not have been freed since; `size` must be the
  /// size it was allocated with.
  pub unsafe fn free(
    &self,
    ptr: *mut u8,
    size: usize,
  ) {
    unsafe {
      self
        .algorithm
        .lock()
        .free(ptr, size, mem::size_of::<usize>())
    }
  }
}

impl Drop for Space {
  fn drop(&mut self) {
    // The algorithm's bookkeeping lives inside the segments, so it must
    // be gone before any of them is unmapped. Whatever it did not
    // release on its own is returned here.
    drop(unsafe { ManuallyDrop::take(&mut self.algorithm) });

    let segments = mem::take(&mut *self.segments.lock());
    for segment in &segments {
      unsafe { arena::release(segment.base, segment.size) };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_capacity_exhausts_then_recovers() {
    let space = Space::new(Growth::Fixed(8192));

    let mut live = Vec::new();
    for _ in 0..3 {
      let ptr = space.alloc(2048);
      assert!(!ptr.is_null());
      unsafe { ptr.write_bytes(0x5A, 2048) };
      live.push(ptr);
    }

    // Bookkeeping overhead leaves less than one more 2 KiB block.
    assert!(space.alloc(2048).is_null());

    for ptr in live {
      unsafe { space.free(ptr, 2048) };
    }

    let again = space.alloc(2048);
    assert!(!again.is_null());
    unsafe { space.free(again, 2048) };
  }

  #[test]
  fn oversized_request_fails_cleanly() {
    let space = Space::new(Growth::Fixed(8192));

    // Far past the capacity, and past the direct-map threshold.
    assert!(space.alloc(1024 * 1024).is_null());

    // The arena still serves requests that fit.
    let ptr = space.alloc(128);
    assert!(!ptr.is_null());
    unsafe { space.free(ptr, 128) };
  }

  #[test]
  fn on_demand_space_spans_segments() {
    let space = Space::new(Growth::OnDemand);

    let mut live = Vec::new();
    for fill in 0..4u8 {
      let size = 512 * 1024;
      let ptr = space.alloc(size);
      assert!(!ptr.is_null());
      unsafe { ptr.write_bytes(fill, size) };
      live.push((ptr, size, fill));
    }

    for (ptr, size, fill) in live {
      unsafe {
        assert_eq!(ptr.read(), fill);
        assert_eq!(ptr.add(size - 1).read(), fill);
        space.free(ptr, size);
      }
    }
  }

  #[test]
  fn reused_memory_is_rezeroed() {
    let space = Space::new(Growth::Fixed(64 * 1024));

    let dirty = space.alloc(512);
    assert!(!dirty.is_null());
    unsafe {
      dirty.write_bytes(0xAA, 512);
      space.free(dirty, 512);
    }

    let zeroed = space.alloc_zeroed(512);
    assert!(!zeroed.is_null());
    unsafe {
      for offset in 0..512 {
        assert_eq!(zeroed.add(offset).read(), 0);
      }
      space.free(zeroed, 512);
    }
  }
}
