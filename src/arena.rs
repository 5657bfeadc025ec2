//! Heap-growth primitives.
//!
//! The allocator never touches memory directly: it asks an [`Arena`] for
//! words at byte offsets from the arena base. Offsets stay valid across
//! growth because the arena only ever extends at its high-water mark.
//!
//! ```text
//!   base                                   high_water
//!    │                                          │
//!    ▼                                          ▼
//!    ┌──────────────────────────────────────────┬─────────────────┐
//!    │           bytes owned by the arena       │  grow(extra) →  │
//!    └──────────────────────────────────────────┴─────────────────┘
//!    offset 0                                   returned by grow()
//! ```

use std::{
  alloc::{self, Layout},
  mem,
  ptr::{self, NonNull},
};

use libc::{c_void, intptr_t, sbrk};
use log::{debug, warn};

use crate::{align, align::ALIGNMENT, error::ArenaError};

/// Largest heap handed out by [`MemArena::new`].
pub const DEFAULT_CAPACITY: usize = 20 * 1024 * 1024;

/// A single contiguous, growable byte range.
///
/// # Safety
///
/// Implementors guarantee that `[base, base + high_water)` is valid for reads
/// and writes, is not accessed by anything but the owner of the arena, and
/// that `base` is aligned to [`ALIGNMENT`]. `grow` must extend the range in
/// place and return the previous high-water mark.
pub unsafe trait Arena {
  fn base(&self) -> NonNull<u8>;

  /// Number of bytes currently owned, as an offset from [`Arena::base`].
  fn high_water(&self) -> usize;

  /// Extends the arena by `extra` bytes and returns the previous high-water mark.
  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, ArenaError>;

  fn read_word(
    &self,
    offset: usize,
  ) -> usize {
    self.assert_word(offset);
    // SAFETY: bounds and alignment checked above, range owned per the trait contract.
    unsafe { self.base().as_ptr().add(offset).cast::<usize>().read() }
  }

  fn write_word(
    &mut self,
    offset: usize,
    value: usize,
  ) {
    self.assert_word(offset);
    // SAFETY: as in `read_word`.
    unsafe { self.base().as_ptr().add(offset).cast::<usize>().write(value) }
  }

  /// Copies `len` bytes inside the arena. The ranges may overlap.
  fn copy_within(
    &mut self,
    src: usize,
    dst: usize,
    len: usize,
  ) {
    let high_water = self.high_water();
    assert!(src.checked_add(len).is_some_and(|end| end <= high_water));
    assert!(dst.checked_add(len).is_some_and(|end| end <= high_water));
    let base = self.base().as_ptr();
    // SAFETY: both ranges lie inside the owned range.
    unsafe { ptr::copy(base.add(src), base.add(dst), len) }
  }

  /// Machine address of the byte at `offset`.
  fn ptr_at(
    &self,
    offset: usize,
  ) -> *mut u8 {
    self.base().as_ptr().wrapping_add(offset)
  }

  /// Offset of a machine address handed out by [`Arena::ptr_at`].
  fn offset_of(
    &self,
    address: *const u8,
  ) -> usize {
    address.addr().wrapping_sub(self.base().as_ptr().addr())
  }

  #[doc(hidden)]
  fn assert_word(
    &self,
    offset: usize,
  ) {
    assert!(
      offset % mem::align_of::<usize>() == 0,
      "unaligned word offset {offset:#x}"
    );
    assert!(
      offset
        .checked_add(mem::size_of::<usize>())
        .is_some_and(|end| end <= self.high_water()),
      "word at {offset:#x} is past the high-water mark {:#x}",
      self.high_water()
    );
  }
}

/// The process heap, grown through the program break with `sbrk(2)`.
///
/// Nothing else in the process may move the break while this arena grows;
/// if it does, growth fails with [`ArenaError::Discontiguous`]. That failure
/// is permanent: the arena can no longer be extended contiguously, so every
/// later [`grow`](Arena::grow) returns the same error without touching the
/// break again. Memory already handed out stays valid.
pub struct SbrkArena {
  lo: Option<NonNull<u8>>,
  hi: usize,
  /// Set once the break was found moved: `(expected, actual)`.
  torn: Option<(usize, usize)>,
}

impl SbrkArena {
  pub const fn new() -> Self {
    Self {
      lo: None,
      hi: 0,
      torn: None,
    }
  }

  /// Whether a foreign break move has ended this arena's growth.
  pub fn is_torn(&self) -> bool {
    self.torn.is_some()
  }

  unsafe fn brk(increment: usize) -> Result<usize, ArenaError> {
    let Ok(increment) = intptr_t::try_from(increment) else {
      return Err(ArenaError::Exhausted {
        requested: increment,
        available: 0,
      });
    };

    let previous = unsafe { sbrk(increment) };

    if previous == usize::MAX as *mut c_void {
      return Err(ArenaError::Exhausted {
        requested: increment as usize,
        available: 0,
      });
    }

    Ok(previous as usize)
  }

  /// Aligns the current break and records it as the arena base.
  fn start(&mut self) -> Result<NonNull<u8>, ArenaError> {
    if let Some(lo) = self.lo {
      return Ok(lo);
    }

    unsafe {
      let current = Self::brk(0)?;
      let padding = align!(current) - current;
      if padding > 0 {
        Self::brk(padding)?;
      }

      let lo = NonNull::new((current + padding) as *mut u8).ok_or(ArenaError::Exhausted {
        requested: padding,
        available: 0,
      })?;
      debug!("sbrk arena starts at {:?}", lo);
      self.lo = Some(lo);
      Ok(lo)
    }
  }
}

impl Default for SbrkArena {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl Arena for SbrkArena {
  fn base(&self) -> NonNull<u8> {
    self.lo.unwrap_or(NonNull::dangling())
  }

  fn high_water(&self) -> usize {
    self.hi
  }

  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, ArenaError> {
    if extra == 0 {
      return Err(ArenaError::ZeroGrowth);
    }

    if let Some((expected, actual)) = self.torn {
      return Err(ArenaError::Discontiguous { expected, actual });
    }

    let lo = self.start()?;
    let expected = lo.as_ptr().addr() + self.hi;

    let previous = unsafe { Self::brk(extra)? };

    if previous != expected {
      // Someone else owns the bytes between our end and the new region.
      warn!("program break moved to {previous:#x}, expected {expected:#x}; sbrk arena is full");
      self.torn = Some((expected, previous));
      return Err(ArenaError::Discontiguous {
        expected,
        actual: previous,
      });
    }

    let old = self.hi;
    self.hi += extra;
    Ok(old)
  }
}

/// A fixed-capacity reservation carved out of the system allocator.
///
/// Behaves like the program break of a process with a hard heap limit:
/// growth is monotonic and fails once `capacity` bytes have been handed out.
pub struct MemArena {
  base: NonNull<u8>,
  brk: usize,
  capacity: usize,
}

impl MemArena {
  pub fn new() -> Result<Self, ArenaError> {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> Result<Self, ArenaError> {
    if capacity == 0 || capacity % ALIGNMENT != 0 {
      return Err(ArenaError::BadCapacity(capacity));
    }

    let layout =
      Layout::from_size_align(capacity, ALIGNMENT).map_err(|_| ArenaError::BadCapacity(capacity))?;

    // SAFETY: layout has a non-zero size.
    let base = unsafe { alloc::alloc_zeroed(layout) };

    let Some(base) = NonNull::new(base) else {
      return Err(ArenaError::Exhausted {
        requested: capacity,
        available: 0,
      });
    };

    Ok(Self {
      base,
      brk: 0,
      capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

unsafe impl Arena for MemArena {
  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn high_water(&self) -> usize {
    self.brk
  }

  fn grow(
    &mut self,
    extra: usize,
  ) -> Result<usize, ArenaError> {
    if extra == 0 {
      return Err(ArenaError::ZeroGrowth);
    }

    let available = self.capacity - self.brk;
    if extra > available {
      return Err(ArenaError::Exhausted {
        requested: extra,
        available,
      });
    }

    let old = self.brk;
    self.brk += extra;
    Ok(old)
  }
}

impl Drop for MemArena {
  fn drop(&mut self) {
    // SAFETY: same layout as the allocation in `with_capacity`.
    unsafe {
      alloc::dealloc(
        self.base.as_ptr(),
        Layout::from_size_align_unchecked(self.capacity, ALIGNMENT),
      );
    }
  }
}
