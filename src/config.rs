//! Allocator tuning knobs.
//!
//! Defaults reproduce the classic layout: 32 exact lists up to 256 bytes,
//! 24 exponential lists above, and a 4 MiB first heap. Any field can be
//! overridden from the environment:
//! - `SEGALLOC_SMALL_THRESHOLD`
//! - `SEGALLOC_LARGE_CLASSES`
//! - `SEGALLOC_INITIAL_GROWTH`

use std::env;

use log::warn;

use crate::{
  align::{ALIGNMENT, is_aligned},
  block::MIN_BLOCK_SIZE,
  error::ConfigError,
};

pub const MAX_LARGE_CLASSES: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Largest block size served by an exact-size list.
  pub small_threshold: usize,
  /// Number of exponential lists above `small_threshold`.
  pub large_classes: usize,
  /// Bytes requested from the arena at init; also the first growth step.
  pub initial_growth: usize,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      small_threshold: 0x100,
      large_classes: 24,
      initial_growth: 4 * 1024 * 1024,
    }
  }
}

impl AllocatorConfig {
  /// Defaults with environment overrides applied.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Some(value) = read_env("SEGALLOC_SMALL_THRESHOLD") {
      config.small_threshold = value;
    }
    if let Some(value) = read_env("SEGALLOC_LARGE_CLASSES") {
      config.large_classes = value;
    }
    if let Some(value) = read_env("SEGALLOC_INITIAL_GROWTH") {
      config.initial_growth = value;
    }
    config
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !is_aligned(self.small_threshold) || self.small_threshold < MIN_BLOCK_SIZE {
      return Err(ConfigError::SmallThreshold(self.small_threshold));
    }

    if self.large_classes == 0 || self.large_classes > MAX_LARGE_CLASSES {
      return Err(ConfigError::LargeClasses(self.large_classes));
    }

    let required = self.sentinel_bytes() + MIN_BLOCK_SIZE;
    if !is_aligned(self.initial_growth) || self.initial_growth < required {
      return Err(ConfigError::InitialGrowth {
        given: self.initial_growth,
        required,
      });
    }

    Ok(())
  }

  /// Number of exact-size lists, including the ones below the minimum block.
  pub fn small_classes(&self) -> usize {
    self.small_threshold / ALIGNMENT
  }

  pub fn total_classes(&self) -> usize {
    self.small_classes() + self.large_classes
  }

  /// Exact lists whose size can hold a free block get a sentinel.
  pub fn first_exact_class(&self) -> usize {
    MIN_BLOCK_SIZE / ALIGNMENT - 1
  }

  /// Arena bytes taken by list sentinels at the start of the heap.
  pub fn sentinel_bytes(&self) -> usize {
    let exact = self.small_classes().saturating_sub(self.first_exact_class());
    (exact + self.large_classes) * MIN_BLOCK_SIZE
  }

  /// Largest block any list can hold.
  pub fn max_block_size(&self) -> usize {
    let bound = (self.small_threshold as u128) << self.large_classes;
    let bound = bound.min(usize::MAX as u128 + 1) as usize;
    // The top class is open on its upper end.
    (bound.wrapping_sub(1)) & !(ALIGNMENT - 1)
  }
}

fn read_env(key: &str) -> Option<usize> {
  let raw = env::var(key).ok()?;
  match raw.trim().parse() {
    Ok(value) => Some(value),
    Err(err) => {
      warn!("ignoring {key}={raw:?}: {err}");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_is_valid() {
    let config = AllocatorConfig::default();

    assert_eq!(config.validate(), Ok(()));
    assert_eq!(config.small_classes(), 32);
    assert_eq!(config.total_classes(), 56);
    assert_eq!(config.first_exact_class(), MIN_BLOCK_SIZE / ALIGNMENT - 1);
  }

  #[test]
  fn test_max_block_size() {
    let config = AllocatorConfig {
      small_threshold: 256,
      large_classes: 2,
      initial_growth: 4096,
    };

    // Top class holds sizes below 256 << 2.
    assert_eq!(config.max_block_size(), 1024 - ALIGNMENT);
  }

  #[test]
  fn test_rejects_bad_threshold() {
    let config = AllocatorConfig {
      small_threshold: 100,
      ..Default::default()
    };
    assert_eq!(config.validate(), Err(ConfigError::SmallThreshold(100)));

    let config = AllocatorConfig {
      small_threshold: ALIGNMENT,
      ..Default::default()
    };
    assert_eq!(
      config.validate(),
      Err(ConfigError::SmallThreshold(ALIGNMENT))
    );
  }

  #[test]
  fn test_rejects_bad_large_classes() {
    for large_classes in [0, MAX_LARGE_CLASSES + 1] {
      let config = AllocatorConfig {
        large_classes,
        ..Default::default()
      };
      assert_eq!(
        config.validate(),
        Err(ConfigError::LargeClasses(large_classes))
      );
    }
  }

  #[test]
  fn test_rejects_tiny_initial_growth() {
    let config = AllocatorConfig {
      initial_growth: 64,
      ..Default::default()
    };
    let required = config.sentinel_bytes() + MIN_BLOCK_SIZE;

    assert_eq!(
      config.validate(),
      Err(ConfigError::InitialGrowth {
        given: 64,
        required
      })
    );
  }
}
