//! In-band block layout.
//!
//! ```text
//!   Allocated block:                     Free block:
//!   ┌──────────────┐ ◄── BlockRef        ┌──────────────┐
//!   │ size | 1     │  header word        │ size | 0     │
//!   ├──────────────┤ ◄── payload         ├──────────────┤
//!   │              │                     │ next free    │
//!   │  caller data │                     │ prev free    │
//!   │              │                     │ (unused)     │
//!   └──────────────┘                     └──────────────┘
//! ```
//!
//! Sizes include the header and are multiples of [`ALIGNMENT`], so the low
//! bit of the header word is free to carry the allocated flag. There is no
//! footer: the only neighbour reachable from a block is the one after it.
//! Link fields hold arena offsets, with [`NO_LINK`] standing for "none".

use std::mem;

use crate::{align, align::ALIGNMENT, arena::Arena};

/// Width reserved for the header word.
pub const HEADER_SIZE: usize = align!(mem::size_of::<usize>());

/// Header plus the two link fields a free block needs.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE * 3;

const ALLOCATED: usize = 0x1;

/// Link word of a list end. Never a valid block offset.
pub const NO_LINK: usize = usize::MAX;

const NEXT_FREE: usize = HEADER_SIZE;
const PREV_FREE: usize = HEADER_SIZE * 2;

/// Offset of a block header inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(usize);

impl BlockRef {
  pub const fn at(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }

  pub const fn payload(self) -> usize {
    self.0 + HEADER_SIZE
  }

  pub const fn from_payload(payload: usize) -> Self {
    Self(payload - HEADER_SIZE)
  }

  /// Size of the whole block, header included.
  pub fn size<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> usize {
    arena.read_word(self.0) & !ALLOCATED
  }

  pub fn is_allocated<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> bool {
    arena.read_word(self.0) & ALLOCATED != 0
  }

  /// Rewrites the header. `size` must already be aligned.
  pub fn write_header<A: Arena + ?Sized>(
    self,
    arena: &mut A,
    size: usize,
    allocated: bool,
  ) {
    debug_assert!(size % ALIGNMENT == 0, "unaligned block size {size}");
    arena.write_word(self.0, size | if allocated { ALLOCATED } else { 0 });
  }

  pub fn mark_allocated<A: Arena + ?Sized>(
    self,
    arena: &mut A,
  ) {
    let header = arena.read_word(self.0);
    arena.write_word(self.0, header | ALLOCATED);
  }

  pub fn mark_free<A: Arena + ?Sized>(
    self,
    arena: &mut A,
  ) {
    let header = arena.read_word(self.0);
    arena.write_word(self.0, header & !ALLOCATED);
  }

  /// The block that follows in address order, if it starts below the
  /// high-water mark.
  pub fn next<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> Option<BlockRef> {
    let next = self.0.checked_add(self.size(arena))?;
    (next < arena.high_water()).then_some(Self(next))
  }

  // Link fields are only meaningful on free blocks and list sentinels.
  // `FreeListIndex` is the only caller and enforces that.

  pub(crate) fn next_free<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> Option<BlockRef> {
    decode_link(arena.read_word(self.0 + NEXT_FREE))
  }

  pub(crate) fn prev_free<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> Option<BlockRef> {
    decode_link(arena.read_word(self.0 + PREV_FREE))
  }

  pub(crate) fn set_next_free<A: Arena + ?Sized>(
    self,
    arena: &mut A,
    next: Option<BlockRef>,
  ) {
    arena.write_word(self.0 + NEXT_FREE, encode_link(next));
  }

  pub(crate) fn set_prev_free<A: Arena + ?Sized>(
    self,
    arena: &mut A,
    prev: Option<BlockRef>,
  ) {
    arena.write_word(self.0 + PREV_FREE, encode_link(prev));
  }

  /// Reads the header and returns the matching view.
  pub fn load<A: Arena + ?Sized>(
    self,
    arena: &A,
  ) -> Block {
    let size = self.size(arena);
    if self.is_allocated(arena) {
      Block::Allocated(AllocatedBlock { at: self, size })
    } else {
      Block::Free(FreeBlock {
        at: self,
        size,
        next: self.next_free(arena),
        prev: self.prev_free(arena),
      })
    }
  }
}

fn decode_link(word: usize) -> Option<BlockRef> {
  (word != NO_LINK).then_some(BlockRef(word))
}

fn encode_link(link: Option<BlockRef>) -> usize {
  link.map_or(NO_LINK, BlockRef::offset)
}

/// A block as seen through its header's allocated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
  Free(FreeBlock),
  Allocated(AllocatedBlock),
}

impl Block {
  pub fn at(&self) -> BlockRef {
    match self {
      Block::Free(block) => block.at,
      Block::Allocated(block) => block.at,
    }
  }

  pub fn size(&self) -> usize {
    match self {
      Block::Free(block) => block.size,
      Block::Allocated(block) => block.size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  pub at: BlockRef,
  pub size: usize,
  pub next: Option<BlockRef>,
  pub prev: Option<BlockRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedBlock {
  pub at: BlockRef,
  pub size: usize,
}

impl AllocatedBlock {
  pub fn payload(&self) -> usize {
    self.at.payload()
  }

  /// Bytes the caller may use.
  pub fn payload_size(&self) -> usize {
    self.size - HEADER_SIZE
  }
}
