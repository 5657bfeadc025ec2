//! Segregated free lists.
//!
//! ```text
//!   class:   0    1    2    3   ...  31  │ 32        33        ...
//!   sizes:   8   16   24   32   ... 256  │ 264-511   512-1023  ...
//!            └── exact, one size each ───┘ └── exponential ranges ──┘
//! ```
//!
//! Every list starts with a sentinel block living at the bottom of the
//! arena, marked allocated so coalescing never swallows it. Exact classes
//! smaller than [`MIN_BLOCK_SIZE`] can never hold a block and have none.
//! Lists are unordered; insertion always happens right after the sentinel.

use std::ops::Range;

use log::trace;

use crate::{
  align::ALIGNMENT,
  arena::Arena,
  block::{BlockRef, MIN_BLOCK_SIZE},
  config::AllocatorConfig,
};

pub struct FreeListIndex {
  small_threshold: usize,
  small_classes: usize,
  heads: Vec<Option<BlockRef>>,
  counts: Vec<usize>,
  sentinels: (usize, usize),
}

impl FreeListIndex {
  pub fn new(config: &AllocatorConfig) -> Self {
    let total = config.total_classes();
    Self {
      small_threshold: config.small_threshold,
      small_classes: config.small_classes(),
      heads: vec![None; total],
      counts: vec![0; total],
      sentinels: (0, 0),
    }
  }

  /// Writes one sentinel per usable class starting at `start` and returns
  /// the offset right after the last one.
  pub fn install<A: Arena + ?Sized>(
    &mut self,
    arena: &mut A,
    start: usize,
  ) -> usize {
    let first_exact = MIN_BLOCK_SIZE / ALIGNMENT - 1;
    let mut cursor = start;

    for class in 0..self.heads.len() {
      if class < self.small_classes && class < first_exact {
        self.heads[class] = None;
        continue;
      }

      let sentinel = BlockRef::at(cursor);
      sentinel.write_header(arena, MIN_BLOCK_SIZE, true);
      sentinel.set_next_free(arena, None);
      sentinel.set_prev_free(arena, None);
      self.heads[class] = Some(sentinel);
      self.counts[class] = 0;
      cursor += MIN_BLOCK_SIZE;
    }

    self.sentinels = (start, cursor);
    cursor
  }

  /// Arena bytes occupied by the sentinels.
  pub fn sentinel_range(&self) -> Range<usize> {
    self.sentinels.0..self.sentinels.1
  }

  pub fn is_sentinel(
    &self,
    block: BlockRef,
  ) -> bool {
    self.sentinel_range().contains(&block.offset())
  }

  /// Class a free block of `size` bytes belongs to, or `None` if the size is
  /// below one alignment unit or beyond the top exponential class.
  pub fn classify(
    &self,
    size: usize,
  ) -> Option<usize> {
    if size < ALIGNMENT {
      return None;
    }

    if size <= self.small_threshold {
      return Some(size / ALIGNMENT - 1);
    }

    let large_classes = self.heads.len() - self.small_classes;
    (0..large_classes)
      .find(|&j| (self.small_threshold as u128) << (j + 1) > size as u128)
      .map(|j| self.small_classes + j)
  }

  fn class_of(
    &self,
    size: usize,
  ) -> usize {
    match self.classify(size) {
      Some(class) if self.heads[class].is_some() => class,
      _ => panic!("no free list can hold a block of {size} bytes"),
    }
  }

  /// Pushes a free block right after its class sentinel.
  pub fn insert<A: Arena + ?Sized>(
    &mut self,
    arena: &mut A,
    block: BlockRef,
  ) {
    self.assert_linkable(arena, block);

    let class = self.class_of(block.size(arena));
    let Some(head) = self.heads[class] else {
      unreachable!("class_of only returns classes with a sentinel");
    };

    let next = head.next_free(arena);
    head.set_next_free(arena, Some(block));
    block.set_prev_free(arena, Some(head));
    block.set_next_free(arena, next);
    if let Some(next) = next {
      next.set_prev_free(arena, Some(block));
    }

    self.counts[class] += 1;
    trace!("free list {class} <- {:#x}", block.offset());
  }

  /// Unlinks a block currently on a list. The block's size must be the one
  /// it was inserted with.
  pub fn remove<A: Arena + ?Sized>(
    &mut self,
    arena: &mut A,
    block: BlockRef,
  ) {
    self.assert_linkable(arena, block);

    let next = block.next_free(arena);
    let prev = block.prev_free(arena);

    if let Some(prev) = prev {
      prev.set_next_free(arena, next);
    }
    if let Some(next) = next {
      next.set_prev_free(arena, prev);
    }

    let class = self.class_of(block.size(arena));
    self.counts[class] = self.counts[class].saturating_sub(1);
  }

  /// First-fit search.
  ///
  /// Small sizes take the head of the first non-empty exact list at or above
  /// their own. Everything else walks the exponential lists from the
  /// matching range upward and takes the first block that is large enough.
  pub fn find_fit<A: Arena + ?Sized>(
    &self,
    arena: &A,
    size: usize,
  ) -> Option<BlockRef> {
    let start = if size <= self.small_threshold {
      let exact = self.classify(size)?;
      if let Some(block) = (exact..self.small_classes).find_map(|class| self.first(arena, class)) {
        return Some(block);
      }
      self.small_classes
    } else {
      self.classify(size)?
    };

    (start..self.heads.len())
      .flat_map(|class| self.iter(arena, class))
      .find(|block| block.size(arena) >= size)
  }

  /// Head of a class list, skipping the sentinel.
  pub fn first<A: Arena + ?Sized>(
    &self,
    arena: &A,
    class: usize,
  ) -> Option<BlockRef> {
    self.heads.get(class).copied().flatten()?.next_free(arena)
  }

  /// Successor of `block` in whatever list it currently sits in.
  pub fn next_in_list<A: Arena + ?Sized>(
    &self,
    arena: &A,
    block: BlockRef,
  ) -> Option<BlockRef> {
    self.assert_linkable(arena, block);
    block.next_free(arena)
  }

  pub fn iter<'a, A: Arena + ?Sized>(
    &self,
    arena: &'a A,
    class: usize,
  ) -> ListIter<'a, A> {
    ListIter {
      arena,
      cursor: self.first(arena, class),
    }
  }

  /// Classes that own a sentinel, smallest first.
  pub fn classes(&self) -> impl Iterator<Item = usize> + '_ {
    (0..self.heads.len()).filter(|&class| self.heads[class].is_some())
  }

  /// Number of blocks currently on a class list.
  pub fn len(
    &self,
    class: usize,
  ) -> usize {
    self.counts.get(class).copied().unwrap_or(0)
  }

  pub fn counts(&self) -> &[usize] {
    &self.counts
  }

  fn assert_linkable<A: Arena + ?Sized>(
    &self,
    arena: &A,
    block: BlockRef,
  ) {
    debug_assert!(
      self.is_sentinel(block) || !block.is_allocated(arena),
      "link fields of allocated block {:#x} used",
      block.offset()
    );
  }
}

/// Walks one free list in link order.
pub struct ListIter<'a, A: ?Sized> {
  arena: &'a A,
  cursor: Option<BlockRef>,
}

impl<A: Arena + ?Sized> Iterator for ListIter<'_, A> {
  type Item = BlockRef;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.cursor?;
    self.cursor = current.next_free(self.arena);
    Some(current)
  }
}
