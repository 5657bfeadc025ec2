//! Deferred coalescing.
//!
//! `free` never merges. Only when no list can serve a request does the
//! allocator walk the free lists, smallest class first, and fold each free
//! block into its free address-order successor. Because blocks carry no
//! footer, a block can only absorb the block after it, never the one before.
//!
//! ```text
//!   before:  ┌──────┬────────┬──────┬───────┐
//!            │ free │  free  │ used │ free  │
//!            └──────┴────────┴──────┴───────┘
//!   after:   ┌───────────────┬──────┬───────┐
//!            │     free      │ used │ free  │
//!            └───────────────┴──────┴───────┘
//! ```

use log::debug;

use crate::{
  arena::Arena,
  allocator::SegregatedAllocator,
  block::{BlockRef, MIN_BLOCK_SIZE},
};

impl<A: Arena> SegregatedAllocator<A> {
  /// Merges adjacent free blocks until one of at least `target` bytes
  /// exists and returns it (still on its free list). A `target` of zero
  /// merges everything reachable and returns `None`.
  pub(crate) fn coalesce(
    &mut self,
    target: usize,
  ) -> Option<BlockRef> {
    let classes: Vec<usize> = self.index.classes().collect();
    let mut merged_here = 0;

    for class in classes {
      let mut cursor = self.index.first(&self.arena, class);

      while let Some(block) = cursor {
        let Some(successor) = self.mergeable_successor(block) else {
          cursor = if self.index.classify(block.size(&self.arena)) == Some(class) {
            self.index.next_in_list(&self.arena, block)
          } else {
            // `block` grew into another list; rescan this one from the top.
            self.index.first(&self.arena, class)
          };
          continue;
        };

        self.index.remove(&mut self.arena, block);
        self.index.remove(&mut self.arena, successor);

        let size = block.size(&self.arena) + successor.size(&self.arena);
        block.write_header(&mut self.arena, size, false);
        self.index.insert(&mut self.arena, block);

        self.merges += 1;
        merged_here += 1;

        if target != 0 && size >= target {
          debug!(
            "coalesced {merged_here} pairs, {:#x} now holds {size} bytes",
            block.offset()
          );
          return Some(block);
        }

        // Stay on `block`: it may absorb its new successor too.
      }
    }

    debug!("coalesced {merged_here} pairs without reaching {target} bytes");
    None
  }

  /// The address-order successor of `block` if the two may be merged.
  fn mergeable_successor(
    &self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    let successor = block.next(&self.arena)?;
    let size = successor.size(&self.arena);

    if successor.is_allocated(&self.arena) || size < MIN_BLOCK_SIZE {
      return None;
    }

    let merged = block.size(&self.arena).checked_add(size)?;
    (merged <= self.config.max_block_size()).then_some(successor)
  }

  /// Merges every pair of adjacent free blocks reachable from the free
  /// lists. Afterwards [`check_coalesced`](Self::check_coalesced) holds.
  pub fn compact(&mut self) {
    self.coalesce(0);
    self.verify();
  }
}
