use std::ptr;

use log::{debug, trace, warn};

use crate::{
  align::checked_align,
  arena::{Arena, SbrkArena},
  block::{AllocatedBlock, BlockRef, HEADER_SIZE, MIN_BLOCK_SIZE},
  config::AllocatorConfig,
  error::{ArenaError, Error},
  free_list::FreeListIndex,
};

/// Segregated-fit allocator over a single growable arena.
///
/// Not thread-safe: every call takes `&mut self`, and callers that share an
/// instance must serialize access themselves.
pub struct SegregatedAllocator<A: Arena> {
  pub(crate) arena: A,
  pub(crate) config: AllocatorConfig,
  pub(crate) index: FreeListIndex,
  /// First block after the list sentinels.
  pub(crate) heap_start: usize,
  /// Next growth step; doubles whenever a request outgrows it.
  growth: usize,
  initialized: bool,
  pub(crate) growth_calls: usize,
  pub(crate) merges: usize,
}

impl SegregatedAllocator<SbrkArena> {
  /// An allocator on the process heap, configured from the environment.
  pub fn new() -> Self {
    Self::with_arena(SbrkArena::new(), AllocatorConfig::from_env())
  }
}

impl Default for SegregatedAllocator<SbrkArena> {
  fn default() -> Self {
    Self::new()
  }
}

impl<A: Arena> SegregatedAllocator<A> {
  pub fn with_arena(
    arena: A,
    config: AllocatorConfig,
  ) -> Self {
    Self {
      arena,
      index: FreeListIndex::new(&config),
      config,
      heap_start: 0,
      growth: config.initial_growth,
      initialized: false,
      growth_calls: 0,
      merges: 0,
    }
  }

  /// Claims the first region of the arena, lays out the list sentinels and
  /// turns the rest into one free block. Must be called once, before
  /// anything else.
  pub fn init(&mut self) -> Result<(), Error> {
    if self.initialized {
      return Err(Error::AlreadyInitialized);
    }
    self.config.validate()?;

    let start = self.arena.grow(self.config.initial_growth)?;
    let end = start + self.config.initial_growth;

    self.heap_start = self.index.install(&mut self.arena, start);

    let first = BlockRef::at(self.heap_start);
    first.write_header(&mut self.arena, end - self.heap_start, false);
    self.index.insert(&mut self.arena, first);

    self.initialized = true;
    debug!(
      "heap initialized: {} bytes, sentinels {:#x}..{:#x}",
      self.config.initial_growth, start, self.heap_start
    );

    self.verify();
    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  /// Returns a pointer to at least `size` usable bytes, aligned to
  /// [`ALIGNMENT`](crate::ALIGNMENT), or null if `size` is zero or the
  /// arena cannot supply the memory.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    if !self.initialized {
      warn!("alloc({size}) before init");
      return ptr::null_mut();
    }

    let Some(block_size) = self.block_size_for(size) else {
      warn!("alloc({size}) exceeds the largest size class");
      return ptr::null_mut();
    };

    let block = match self.index.find_fit(&self.arena, block_size) {
      Some(block) => block,
      None => match self.coalesce(block_size) {
        Some(block) => block,
        None => match self.extend(block_size) {
          Ok(block) => block,
          Err(err) => {
            warn!("alloc({size}) failed: {err}");
            return ptr::null_mut();
          }
        },
      },
    };

    let payload = self.place(block, block_size);
    self.verify();
    self.arena.ptr_at(payload)
  }

  /// Returns a block to its free list. Neighbours are not merged here.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator's
  /// [`alloc`](Self::alloc) or [`realloc`](Self::realloc).
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }

    let block = BlockRef::from_payload(self.arena.offset_of(address));
    debug_assert!(
      block.is_allocated(&self.arena),
      "free of unallocated block {:#x}",
      block.offset()
    );

    block.mark_free(&mut self.arena);
    self.index.insert(&mut self.arena, block);
    trace!("freed {:#x} ({} bytes)", block.offset(), block.size(&self.arena));

    self.verify();
  }

  /// Resizes an allocation, moving it if it no longer fits in place.
  ///
  /// A null `address` behaves as [`alloc`](Self::alloc); a zero `size` frees
  /// and returns null. On failure the original allocation is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`free`](Self::free).
  pub unsafe fn realloc(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if address.is_null() {
      return self.alloc(size);
    }

    if size == 0 {
      unsafe { self.free(address) };
      return ptr::null_mut();
    }

    let Some(block_size) = self.block_size_for(size) else {
      warn!("realloc to {size} exceeds the largest size class");
      return ptr::null_mut();
    };

    let block = BlockRef::from_payload(self.arena.offset_of(address));
    let current = block.size(&self.arena);

    if block_size <= current {
      self.split(block, block_size);
      self.verify();
      return address;
    }

    let moved = self.alloc(size);
    if moved.is_null() {
      return ptr::null_mut();
    }

    let old = AllocatedBlock { at: block, size: current };
    let copy = old.payload_size().min(size);
    let target = self.arena.offset_of(moved);
    self.arena.copy_within(old.payload(), target, copy);

    unsafe { self.free(address) };
    moved
  }

  /// Block size needed to serve `size` payload bytes.
  fn block_size_for(
    &self,
    size: usize,
  ) -> Option<usize> {
    let block_size = checked_align(size.checked_add(HEADER_SIZE)?)?.max(MIN_BLOCK_SIZE);
    (block_size <= self.config.max_block_size()).then_some(block_size)
  }

  /// Takes a free block off its list, splits off the unused tail and marks
  /// the rest allocated. Returns the payload offset.
  fn place(
    &mut self,
    block: BlockRef,
    block_size: usize,
  ) -> usize {
    self.index.remove(&mut self.arena, block);
    debug_assert!(block.size(&self.arena) >= block_size);

    self.split(block, block_size);
    block.mark_allocated(&mut self.arena);
    trace!(
      "placed {:#x} ({} bytes)",
      block.offset(),
      block.size(&self.arena)
    );

    block.payload()
  }

  /// Shrinks an off-list block to `block_size` if the tail can stand alone
  /// as a free block, and files the tail.
  fn split(
    &mut self,
    block: BlockRef,
    block_size: usize,
  ) {
    let header = block.size(&self.arena);
    let remainder = header - block_size;
    if remainder < MIN_BLOCK_SIZE {
      return;
    }

    let allocated = block.is_allocated(&self.arena);
    block.write_header(&mut self.arena, block_size, allocated);

    let tail = BlockRef::at(block.offset() + block_size);
    tail.write_header(&mut self.arena, remainder, false);
    self.index.insert(&mut self.arena, tail);
  }

  /// Grows the arena and files the new region as one free block.
  fn extend(
    &mut self,
    block_size: usize,
  ) -> Result<BlockRef, ArenaError> {
    let mut step = self.growth;
    while step < block_size {
      step = step.saturating_mul(2);
    }
    let amount = step.min(self.config.max_block_size()).max(block_size);

    // The step only advances once the arena actually grew.
    let start = self.arena.grow(amount)?;
    self.growth = step;
    self.growth_calls += 1;

    let block = BlockRef::at(start);
    block.write_header(&mut self.arena, amount, false);
    self.index.insert(&mut self.arena, block);
    debug!(
      "arena grown by {amount} bytes at {start:#x}, high-water {:#x}",
      self.arena.high_water()
    );

    Ok(block)
  }

  /// Runs the consistency checker when built with `heap-check`.
  pub(crate) fn verify(&self) {
    #[cfg(feature = "heap-check")]
    if let Err(err) = self.check() {
      self.dump();
      panic!("heap corrupted: {err}");
    }
  }
}
