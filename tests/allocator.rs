use std::ptr;

use proptest::prelude::*;
use segalloc::{
  ALIGNMENT, AllocatorConfig, Arena, HEADER_SIZE, MemArena, SegregatedAllocator,
};

fn allocator(
  initial_growth: usize,
  capacity: usize,
) -> SegregatedAllocator<MemArena> {
  let config = AllocatorConfig {
    initial_growth,
    ..Default::default()
  };
  let mut allocator =
    SegregatedAllocator::with_arena(MemArena::with_capacity(capacity).unwrap(), config);
  allocator.init().unwrap();
  allocator
}

#[test]
fn test_reuses_exact_class_without_growth() {
  let mut allocator = allocator(8192, 8192);
  let high_water = allocator.arena().high_water();

  let a = allocator.alloc(16);
  let b = allocator.alloc(16);
  unsafe { allocator.free(a) };
  let c = allocator.alloc(16);

  assert!(!b.is_null());
  assert_eq!(c, a);
  assert_eq!(allocator.arena().high_water(), high_water);
}

#[test]
fn test_round_trip_without_growth() {
  let mut allocator = allocator(8192, 8192);

  for size in [1, 17, 200, 256, 257, 1000, 4000] {
    let high_water = allocator.arena().high_water();
    let first = allocator.alloc(size);
    assert!(!first.is_null());
    unsafe { allocator.free(first) };

    let second = allocator.alloc(size);
    assert!(!second.is_null(), "second alloc({size}) failed");
    assert_eq!(allocator.arena().high_water(), high_water);
    unsafe { allocator.free(second) };
  }
}

#[test]
fn test_adjacent_frees_coalesce_without_growth() {
  let mut allocator = allocator(4096, 64 * 1024);

  let a = allocator.alloc(100);
  let b = allocator.alloc(200);
  let rest = allocator.stats().largest_free;
  let tail = allocator.alloc(rest - HEADER_SIZE);
  assert!(!tail.is_null());

  let size_a = 112;
  let size_b = 208;
  unsafe {
    allocator.free(a);
    allocator.free(b);
  }

  let high_water = allocator.arena().high_water();
  let merged = allocator.alloc(size_a + size_b - HEADER_SIZE);

  assert_eq!(merged, a);
  assert_eq!(allocator.arena().high_water(), high_water);
}

#[test]
fn test_realloc_preserves_data() {
  let mut allocator = allocator(8192, 64 * 1024);

  unsafe {
    let original = allocator.alloc(100);
    ptr::write_bytes(original, 0xC3, 100);
    let shrunk = allocator.realloc(original, 50);
    for i in 0..50 {
      assert_eq!(*shrunk.add(i), 0xC3);
    }
    allocator.free(shrunk);

    let original = allocator.alloc(100);
    ptr::write_bytes(original, 0x3C, 100);
    let grown = allocator.realloc(original, 200);
    for i in 0..100 {
      assert_eq!(*grown.add(i), 0x3C);
    }
  }
}

#[test]
fn test_exhaustion_then_smaller_request() {
  let mut allocator = allocator(4096, 4096);

  assert!(allocator.alloc(1 << 20).is_null());
  assert!(!allocator.alloc(128).is_null());
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn test_failed_large_request_leaves_growth_usable() {
  let mut allocator = allocator(4096, 16 * 1024);
  let rest = allocator.stats().largest_free;
  assert!(!allocator.alloc(rest - HEADER_SIZE).is_null());
  let high_water = allocator.arena().high_water();

  assert!(allocator.alloc(20_000).is_null());

  assert!(!allocator.alloc(100).is_null());
  assert_eq!(allocator.arena().high_water(), high_water + 4096);
  assert_eq!(allocator.check(), Ok(()));
}

#[test]
fn test_oversized_request_is_null() {
  let mut allocator = allocator(4096, 4096);

  assert!(allocator.alloc(usize::MAX).is_null());
  assert!(allocator.alloc(usize::MAX - HEADER_SIZE).is_null());
}

#[test]
fn test_free_null_is_noop() {
  let mut allocator = allocator(4096, 4096);
  let before = allocator.stats();

  unsafe { allocator.free(ptr::null_mut()) };

  assert_eq!(allocator.stats(), before);
}

#[derive(Debug, Clone)]
enum Op {
  Alloc(usize),
  Free(usize),
  Realloc(usize, usize),
  Compact,
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => (1usize..600).prop_map(Op::Alloc),
    1 => (600usize..6000).prop_map(Op::Alloc),
    3 => any::<usize>().prop_map(Op::Free),
    2 => (any::<usize>(), 1usize..2000).prop_map(|(i, n)| Op::Realloc(i, n)),
    1 => Just(Op::Compact),
  ]
}

struct Live {
  address: *mut u8,
  size: usize,
  fill: u8,
}

unsafe fn fill(live: &Live) {
  unsafe { ptr::write_bytes(live.address, live.fill, live.size) };
}

unsafe fn intact(live: &Live) -> bool {
  (0..live.size).all(|i| unsafe { *live.address.add(i) } == live.fill)
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn prop_allocations_stay_disjoint_and_intact(ops in prop::collection::vec(op(), 1..120)) {
    let mut allocator = allocator(4096, 4 * 1024 * 1024);
    let mut live: Vec<Live> = Vec::new();
    let mut high_water = allocator.arena().high_water();
    let mut tag = 0u8;

    for op in ops {
      tag = tag.wrapping_add(1);

      match op {
        Op::Alloc(size) => {
          let address = allocator.alloc(size);
          if address.is_null() {
            continue;
          }
          prop_assert_eq!(address.addr() % ALIGNMENT, 0);
          let entry = Live { address, size, fill: tag };
          unsafe { fill(&entry) };
          live.push(entry);
        }
        Op::Free(i) => {
          if live.is_empty() {
            continue;
          }
          let entry = live.swap_remove(i % live.len());
          let untouched = unsafe { intact(&entry) };
          prop_assert!(untouched, "block at {:?} was overwritten", entry.address);
          unsafe { allocator.free(entry.address) };
        }
        Op::Realloc(i, size) => {
          if live.is_empty() {
            continue;
          }
          let index = i % live.len();
          let kept = live[index].size.min(size);
          let old_fill = live[index].fill;
          let address = unsafe { allocator.realloc(live[index].address, size) };
          if address.is_null() {
            continue;
          }
          prop_assert_eq!(address.addr() % ALIGNMENT, 0);
          for j in 0..kept {
            prop_assert_eq!(unsafe { *address.add(j) }, old_fill);
          }
          live[index] = Live { address, size, fill: tag };
          unsafe { fill(&live[index]) };
        }
        Op::Compact => {
          allocator.compact();
          prop_assert_eq!(allocator.check_coalesced(), Ok(()));
        }
      }

      prop_assert_eq!(allocator.check(), Ok(()));
      prop_assert!(allocator.arena().high_water() >= high_water);
      high_water = allocator.arena().high_water();

      for entry in &live {
        let untouched = unsafe { intact(entry) };
        prop_assert!(untouched, "block at {:?} was overwritten", entry.address);
      }

      let mut ranges: Vec<(usize, usize)> = live
        .iter()
        .map(|entry| (entry.address.addr(), entry.address.addr() + entry.size))
        .collect();
      ranges.sort_unstable();
      for pair in ranges.windows(2) {
        prop_assert!(pair[0].1 <= pair[1].0, "overlapping allocations {:?}", pair);
      }
    }

    let stats = allocator.stats();
    prop_assert_eq!(stats.allocated_blocks, live.len());
    prop_assert_eq!(
      stats.sentinel_bytes + stats.free_bytes + stats.allocated_bytes,
      stats.arena_bytes
    );
  }
}
