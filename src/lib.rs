//! # guardalloc - A Guard-Paged Page-Cache Allocator
//!
//! This crate provides a **guard-paged block allocator** intended to back a
//! database page cache, built on raw virtual memory (`mmap`/`mprotect`) via
//! the `libc` crate with dlmalloc as the allocation algorithm.
//!
//! ## Overview
//!
//! All backing memory lives between two permanently inaccessible guard
//! pages:
//!
//! ```text
//!   Guarded Reservation Layout:
//!
//!   ┌────────────┬──────────────────────────────────────┬────────────┐
//!   │ guard page │            usable arena              │ guard page │
//!   │ PROT_NONE  │        PROT_READ|PROT_WRITE          │ PROT_NONE  │
//!   └────────────┴──────────────────────────────────────┴────────────┘
//!                ▲
//!                │
//!            base address returned to the allocator
//!
//!   A read or write that strays past either edge of the arena hits a
//!   guard page and faults immediately: silent heap corruption at the
//!   subsystem boundary becomes a deterministic crash with a precise
//!   location.
//! ```
//!
//! Every block handed to a caller is prefixed with a one-word size header,
//! so the interface can answer size queries without knowing anything about
//! the allocation algorithm's own bookkeeping:
//!
//! ```text
//!   Single Allocation:
//!   ┌──────────────────────┬────────────────────────────────┐
//!   │     Size Header      │          User Data             │
//!   │  total block size,   │                                │
//!   │  word-rounded        │       size bytes usable        │
//!   └──────────────────────┴────────────────────────────────┘
//!                          ▲
//!                          └── Pointer returned to caller
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   guardalloc
//!   ├── align      - Word-rounding macro (align!)
//!   ├── arena      - Guarded virtual-memory reservations
//!   ├── record     - Per-block size header
//!   ├── space      - Allocator algorithm over guarded reservations
//!   └── pcache     - Public entry points and process-wide lifecycle
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use guardalloc::PcacheAlloc;
//!
//! // A cache allocator with a single fixed 1 MiB backing reservation.
//! let alloc = PcacheAlloc::fixed(1024 * 1024);
//!
//! let page = alloc.malloc(4096);
//! assert!(!page.is_null());
//!
//! unsafe {
//!     page.write_bytes(0, 4096);
//!     assert!(alloc.memsize(page) >= 4096);
//!     alloc.free(page);
//! }
//! ```
//!
//! ## How It Works
//!
//! A reservation maps `size + 2 * page_size` bytes of anonymous memory
//! with `PROT_NONE`, then opens up the middle `size` bytes with
//! `mprotect`. On Linux and Android the regions are named via
//! `prctl(PR_SET_VMA)`, so they are distinguishable in `/proc/<pid>/maps`
//! and `pmap` output (`[anon:guardalloc arena]` vs
//! `[anon:guardalloc guard]`).
//!
//! The allocation algorithm (dlmalloc) draws all of its segments through
//! these reservations and never sees memory that is not flanked by
//! guards. A `Space` can be `Fixed` (one reservation, sized up front --
//! the page-cache configuration) or `OnDemand` (a fresh guarded
//! reservation per segment -- the general-purpose configuration).
//!
//! ## Features
//!
//! - **Whole-arena corruption detection**: out-of-bounds access at the
//!   arena edges faults instead of corrupting neighbouring subsystems
//! - **Thread-safe**: `malloc`/`free`/`memsize` may be called from any
//!   number of threads; a spin lock serializes the short critical
//!   sections
//! - **Self-describing blocks**: size queries are answered from the
//!   per-block header, independent of the backing algorithm
//! - **Diagnostic labels**: named memory regions on Linux/Android,
//!   a no-op elsewhere
//!
//! ## Limitations
//!
//! - **Whole-arena granularity**: individual allocations are not
//!   guard-separated; only the arena boundary is protected
//! - **Unix-only**: requires `libc` (`mmap`, `mprotect`, `munmap`)
//! - **Single-writer lifecycle**: creation and teardown must not race
//!   with allocation calls or with each other
//!
//! ## Safety
//!
//! This crate hands out raw pointers and trusts callers to return them
//! unchanged, exactly as a C allocator would. All entry points that
//! consume caller pointers are `unsafe`; passing a pointer the allocator
//! never produced is undefined behavior by contract.

pub mod align;
pub mod arena;
pub mod pcache;
pub mod record;
pub mod space;

pub use pcache::PcacheAlloc;
pub use space::{Growth, Space};
