//! # segalloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a `malloc`-style allocator (`init`, `alloc`, `free`,
//! `realloc`) over one contiguous arena that grows like the program break.
//!
//! ## Overview
//!
//! Free blocks are filed in size-segregated lists. Small sizes get one exact
//! list per 8-byte step, larger sizes share exponentially wider ranges:
//!
//! ```text
//!   Free-List Index:
//!
//!   exact    24 ─► [24] ─► [24]
//!            32 ─► [32]
//!           ...
//!           256 ─► (empty)
//!   ─────────────────────────────────────────
//!   264-511     ─► [304] ─► [480] ─► [264]
//!   512-1023    ─► (empty)
//!   1024-2047   ─► [1536]
//!           ...
//! ```
//!
//! Freeing a block only pushes it onto its list. Adjacent free blocks are
//! merged later, and only when no list can satisfy a request. If merging
//! does not help either, the arena grows.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macro and helpers
//!   ├── arena      - Arena trait, sbrk-backed and fixed-capacity arenas
//!   ├── block      - In-band block headers and free-list links
//!   ├── config     - Size-class and growth configuration
//!   ├── free_list  - Segregated free-list index
//!   ├── allocator  - SegregatedAllocator: alloc / free / realloc
//!   ├── coalesce   - Deferred merging of adjacent free blocks
//!   ├── check      - Heap walk, statistics, consistency checker
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{AllocatorConfig, MemArena, SegregatedAllocator};
//!
//! let arena = MemArena::with_capacity(1 << 20).unwrap();
//! let mut allocator = SegregatedAllocator::with_arena(arena, AllocatorConfig {
//!   initial_growth: 64 * 1024,
//!   ..Default::default()
//! });
//! allocator.init().unwrap();
//!
//! let ptr = allocator.alloc(8) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!   *ptr = 42;
//!   assert_eq!(*ptr, 42);
//!   allocator.free(ptr as *mut u8);
//! }
//! ```
//!
//! ## How It Works
//!
//! The arena starts with one sentinel block per list, followed by blocks
//! that tile the rest of the arena without gaps:
//!
//! ```text
//!   ┌───────────────┬──────────┬──────┬──────────────┬──────────────────┐
//!   │  sentinels    │ used 112 │ free │   used 312   │    free 2384     │
//!   └───────────────┴──────────┴──────┴──────────────┴──────────────────┘
//!   0           heap_start                                     high-water
//! ```
//!
//! Each block starts with a header word holding its size and an allocated
//! bit; the caller's pointer is right after it. A free block reuses the
//! first two payload words as list links.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: all operations take `&mut self`
//! - **Never shrinks**: memory is reused but never returned to the arena
//! - **Fixed alignment**: payloads are aligned to 8 bytes, nothing more
//! - **No misuse detection**: double frees and foreign pointers are
//!   undefined behavior, as with any `malloc`

pub mod align;
mod allocator;
pub mod arena;
pub mod block;
mod check;
mod coalesce;
pub mod config;
pub mod error;
pub mod free_list;

pub use align::ALIGNMENT;
pub use allocator::SegregatedAllocator;
pub use arena::{Arena, MemArena, SbrkArena};
pub use block::{HEADER_SIZE, MIN_BLOCK_SIZE};
pub use check::{Blocks, HeapStats};
pub use config::AllocatorConfig;
pub use error::{ArenaError, CheckError, ConfigError, Error};
