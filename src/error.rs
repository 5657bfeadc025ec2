use thiserror::Error;

/// Errors surfaced by [`SegregatedAllocator::init`](crate::SegregatedAllocator::init).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("arena: {0}")]
  Arena(#[from] ArenaError),
  #[error("allocator is already initialized")]
  AlreadyInitialized,
}

/// Failures of the heap-growth primitive.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
  #[error("growth by zero bytes requested")]
  ZeroGrowth,
  #[error("cannot grow by {requested} bytes, {available} bytes left")]
  Exhausted { requested: usize, available: usize },
  #[error("program break moved to {actual:#x}, arena ends at {expected:#x}")]
  Discontiguous { expected: usize, actual: usize },
  #[error("arena capacity {0} is not a non-zero multiple of the alignment")]
  BadCapacity(usize),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
  #[error("small threshold {0} must be an aligned size of at least the minimum block")]
  SmallThreshold(usize),
  #[error("{0} exponential classes is outside 1..=48")]
  LargeClasses(usize),
  #[error("initial growth {given} must be aligned and at least {required} bytes")]
  InitialGrowth { given: usize, required: usize },
}

/// A structural violation found by the consistency checker.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
  #[error("block at {offset:#x} has size {size}, below the minimum block")]
  Undersized { offset: usize, size: usize },
  #[error("block at {offset:#x} has unaligned size {size}")]
  Misaligned { offset: usize, size: usize },
  #[error("block at {offset:#x} of size {size} runs past the high-water mark {high_water:#x}")]
  Overrun {
    offset: usize,
    size: usize,
    high_water: usize,
  },
  #[error("free blocks at {first:#x} and {second:#x} are adjacent")]
  AdjacentFree { first: usize, second: usize },
}
