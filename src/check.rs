//! Heap inspection: block walk, statistics and the consistency checker.

use log::{debug, log_enabled, Level};

use crate::{
  align::is_aligned,
  allocator::SegregatedAllocator,
  arena::Arena,
  block::{Block, BlockRef, MIN_BLOCK_SIZE},
  error::CheckError,
};

/// Snapshot of the heap, computed by walking every block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub sentinel_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub largest_free: usize,
  pub growth_calls: usize,
  pub merges: usize,
  /// Blocks filed under each size class.
  pub class_counts: Vec<usize>,
}

/// Iterator over every block above the list sentinels, in address order.
pub struct Blocks<'a, A: ?Sized> {
  arena: &'a A,
  cursor: Option<BlockRef>,
}

impl<A: Arena + ?Sized> Iterator for Blocks<'_, A> {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.cursor?;
    let size = current.size(self.arena);
    // A zero-sized header would loop forever; stop and let `check` report it.
    self.cursor = if size == 0 { None } else { current.next(self.arena) };
    Some(current.load(self.arena))
  }
}

impl<A: Arena> SegregatedAllocator<A> {
  pub fn blocks(&self) -> Blocks<'_, A> {
    let cursor = (self.is_initialized() && self.heap_start < self.arena.high_water())
      .then_some(BlockRef::at(self.heap_start));
    Blocks {
      arena: &self.arena,
      cursor,
    }
  }

  /// Verifies that blocks tile the arena and that every block is at least
  /// [`MIN_BLOCK_SIZE`] and aligned.
  pub fn check(&self) -> Result<(), CheckError> {
    let high_water = self.arena.high_water();

    for block in self.blocks() {
      let offset = block.at().offset();
      let size = block.size();

      if size < MIN_BLOCK_SIZE {
        return Err(CheckError::Undersized { offset, size });
      }
      if !is_aligned(size) {
        return Err(CheckError::Misaligned { offset, size });
      }
      if offset + size > high_water {
        return Err(CheckError::Overrun {
          offset,
          size,
          high_water,
        });
      }
    }

    Ok(())
  }

  /// [`check`](Self::check) plus "no two free blocks are adjacent".
  ///
  /// Deferred coalescing means this only holds right after
  /// [`compact`](Self::compact).
  pub fn check_coalesced(&self) -> Result<(), CheckError> {
    self.check()?;

    let mut previous_free: Option<BlockRef> = None;
    for block in self.blocks() {
      match (previous_free, block.is_free()) {
        (Some(first), true) => {
          return Err(CheckError::AdjacentFree {
            first: first.offset(),
            second: block.at().offset(),
          });
        }
        (_, true) => previous_free = Some(block.at()),
        (_, false) => previous_free = None,
      }
    }

    Ok(())
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      arena_bytes: self.arena.high_water(),
      sentinel_bytes: self.index.sentinel_range().len(),
      growth_calls: self.growth_calls,
      merges: self.merges,
      class_counts: self.index.counts().to_vec(),
      ..Default::default()
    };

    for block in self.blocks() {
      match block {
        Block::Free(free) => {
          stats.free_blocks += 1;
          stats.free_bytes += free.size;
          stats.largest_free = stats.largest_free.max(free.size);
        }
        Block::Allocated(used) => {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += used.size;
        }
      }
    }

    stats
  }

  /// Logs every block and every non-empty free list at debug level.
  pub fn dump(&self) {
    if !log_enabled!(Level::Debug) {
      return;
    }

    debug!(
      "heap {:?}..{:?}",
      self.arena.ptr_at(0),
      self.arena.ptr_at(self.arena.high_water())
    );
    for block in self.blocks() {
      match block {
        Block::Free(free) => debug!(
          "{:#010x} | size: {:6} | free | next: {:?} | prev: {:?}",
          free.at.offset(),
          free.size,
          free.next.map(BlockRef::offset),
          free.prev.map(BlockRef::offset)
        ),
        Block::Allocated(used) => debug!(
          "{:#010x} | size: {:6} | allocated",
          used.at.offset(),
          used.size
        ),
      }
    }

    for class in self.index.classes() {
      let members: Vec<usize> = self
        .index
        .iter(&self.arena, class)
        .map(BlockRef::offset)
        .collect();
      if !members.is_empty() {
        debug!("class {class}: {members:#x?}");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    AllocatorConfig, CheckError, SegregatedAllocator,
    arena::{Arena, MemArena},
    block::{Block, BlockRef},
  };

  fn allocator() -> SegregatedAllocator<MemArena> {
    let config = AllocatorConfig {
      initial_growth: 4096,
      ..Default::default()
    };
    let mut allocator =
      SegregatedAllocator::with_arena(MemArena::with_capacity(64 * 1024).unwrap(), config);
    allocator.init().unwrap();
    allocator
  }

  #[test]
  fn test_fresh_heap_is_one_free_block() {
    let allocator = allocator();
    let blocks: Vec<Block> = allocator.blocks().collect();

    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free());

    let stats = allocator.stats();
    assert_eq!(stats.arena_bytes, 4096);
    assert_eq!(stats.sentinel_bytes, allocator.config().sentinel_bytes());
    assert_eq!(stats.free_bytes + stats.sentinel_bytes, 4096);
    assert_eq!(stats.class_counts.iter().sum::<usize>(), 1);
  }

  #[test]
  fn test_blocks_tile_the_arena() {
    let mut allocator = allocator();
    for size in [1, 24, 100, 300, 5000] {
      assert!(!allocator.alloc(size).is_null());
    }

    let stats = allocator.stats();
    assert_eq!(
      stats.sentinel_bytes + stats.free_bytes + stats.allocated_bytes,
      stats.arena_bytes
    );
    assert_eq!(stats.allocated_blocks, 5);
    assert_eq!(allocator.check(), Ok(()));
  }

  #[test]
  fn test_check_reports_corrupted_header() {
    let mut allocator = allocator();
    let address = allocator.alloc(64);
    let block = BlockRef::from_payload(allocator.arena.offset_of(address));

    block.write_header(&mut allocator.arena, 16, true);

    assert_eq!(
      allocator.check(),
      Err(CheckError::Undersized {
        offset: block.offset(),
        size: 16
      })
    );
  }

  #[test]
  fn test_check_reports_overrun() {
    let mut allocator = allocator();
    let address = allocator.alloc(64);
    let block = BlockRef::from_payload(allocator.arena.offset_of(address));

    block.write_header(&mut allocator.arena, 8192, true);

    assert!(matches!(
      allocator.check(),
      Err(CheckError::Overrun { size: 8192, .. })
    ));
  }
}
