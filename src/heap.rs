//! # Heap Controller
//!
//! The top layer: owns the mapped heap region and the two block lists
//! (`available`, `used`), and implements first-fit allocation with
//! conditional splitting, boundary-tag coalescing on free, and page-granular
//! extension.
//!
//! ```text
//!   heap_base                                                heap_end
//!      │                                                          │
//!      ▼                                                          ▼
//!      ┌──────────┬──────────┬──────────┬───────────────────────┐
//!      │  used A  │  avail   │  used B  │        available       │
//!      └──────────┴──────────┴──────────┴───────────────────────┘
//!
//!   available list:  [avail]───[available]      (address order)
//!   used list:       [used A]───[used B]        (allocation order)
//! ```
//!
//! Unlike a bump allocator, which only ever grows and never reuses a freed
//! block, `Heap` reuses freed blocks via first-fit search and merges
//! adjacent free blocks back together so fragmentation doesn't accumulate
//! without bound.

use std::fmt;

use crate::block::{
  self, block_above, block_below, footer_of, header_of_payload, init_header, normalize_payload,
  payload_of, write_footer, BlockHeader, BlockState, BLOCK_OVERHEAD, FOOTER_BYTES, MIN_PAYLOAD,
};
use crate::error::HeapError;
use crate::list::BlockList;
use crate::page;

/// Upper bound on a single `append_pages` request, guarding against
/// unreasonable counts (including a negative count wrapped into a huge
/// `usize` by a careless caller) reaching `mmap`.
const MAX_PAGE_COUNT: usize = 1 << 20;

/// A single block as reported by [`Heap::stats`].
#[derive(Clone, Copy, Debug)]
pub struct BlockStat {
  pub address: usize,
  pub size: usize,
  pub state: BlockState,
}

/// A read-only snapshot of heap structure, produced by [`Heap::stats`].
#[derive(Debug)]
pub struct HeapStats {
  pub heap_base: usize,
  pub heap_end: usize,
  pub available: Vec<BlockStat>,
  pub used: Vec<BlockStat>,
  pub available_bytes: usize,
  pub used_bytes: usize,
}

impl fmt::Display for HeapStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(
      f,
      "heap [{:#x}, {:#x}): {} available block(s) / {} bytes, {} used block(s) / {} bytes",
      self.heap_base,
      self.heap_end,
      self.available.len(),
      self.available_bytes,
      self.used.len(),
      self.used_bytes
    )?;
    for b in &self.used {
      writeln!(f, "  used    {:#x} size={}", b.address, b.size)?;
    }
    for b in &self.available {
      writeln!(f, "  available {:#x} size={}", b.address, b.size)?;
    }
    Ok(())
  }
}

/// The heap controller. A single `Heap` value owns one mapped region; there
/// is deliberately no global instance (see `DESIGN.md`); a second heap can
/// be created by calling `Heap::init` again, and the two are entirely
/// independent.
pub struct Heap {
  heap_base: usize,
  heap_end: usize,
  available: BlockList,
  used: BlockList,
  page_bytes: usize,
}

// Not thread-safe by design (non-goal): block lists are plain raw-pointer
// intrusive structures, so this type is neither `Send` nor `Sync` and the
// compiler enforces that without any marker needed.

impl Heap {
  /// Maps an initial heap region and installs one giant available block.
  ///
  /// `heap_bytes` is a size hint; it is rounded up to whole pages. `None`
  /// defaults to a single page, matching the demo program's no-argument
  /// `el_init()`; an explicit hint matches the test harness's
  /// `el_init(HEAP_SIZE)`.
  pub fn init(heap_bytes: Option<usize>) -> Option<Heap> {
    let page_bytes = page::page_bytes();
    let requested = heap_bytes.unwrap_or(page_bytes);
    let rounded = page::round_up_to_pages(requested);
    let page_count = rounded / page_bytes;

    let base = page::map_pages(None, page_count)?;
    let heap_base = base as usize;
    let heap_end = heap_base + page_count * page_bytes;
    let size = rounded - BLOCK_OVERHEAD;

    let available = BlockList::new();
    let used = BlockList::new();

    unsafe {
      let header = init_header(base, BlockState::Available, size);
      write_footer(header);
      available.push_back(header);
    }

    Some(Heap {
      heap_base,
      heap_end,
      available,
      used,
      page_bytes,
    })
  }

  /// The OS page size captured at `init`.
  pub fn page_bytes(&self) -> usize {
    self.page_bytes
  }

  pub fn heap_base(&self) -> usize {
    self.heap_base
  }

  pub fn heap_end(&self) -> usize {
    self.heap_end
  }

  /// Read-only, address-ordered view of the available list.
  pub fn available_blocks(&self) -> impl Iterator<Item = BlockStat> + '_ {
    self.available.iter().map(block_stat)
  }

  /// Read-only, allocation-ordered view of the used list.
  pub fn used_blocks(&self) -> impl Iterator<Item = BlockStat> + '_ {
    self.used.iter().map(block_stat)
  }

  /// Allocates a payload region of at least `n` bytes.
  ///
  /// Walks the available list front to back and claims the first block
  /// whose size is large enough (first-fit). If the claimed block is
  /// larger than needed by more than one block's worth of overhead, it is
  /// split in place: the front part becomes the returned block at exactly
  /// the requested size, and the back part becomes a new available block
  /// reinserted where the original stood.
  ///
  /// ```text
  ///   BEFORE (one available block, size B, request n):
  ///   ┌──────────────────────────────────────────────────┐
  ///   │                 available, size B                │
  ///   └──────────────────────────────────────────────────┘
  ///
  ///   AFTER, when B - n >= BLOCK_OVERHEAD + MIN_PAYLOAD (split):
  ///   ┌──────────────────┬─────────────────────────────────┐
  ///   │   used, size n    │  available, size B - n - OVERHEAD │
  ///   └──────────────────┴─────────────────────────────────┘
  ///
  ///   AFTER, when the remainder would be too small (no split):
  ///   ┌──────────────────────────────────────────────────┐
  ///   │                  used, size B                     │
  ///   └──────────────────────────────────────────────────┘
  /// ```
  ///
  /// # Arguments
  ///
  /// * `n` - requested payload size in bytes. Normalized up to
  ///   [`MIN_PAYLOAD`] and the natural word alignment before the search;
  ///   `n == 0` is treated the same way as any other small request rather
  ///   than as a special case.
  ///
  /// # Returns
  ///
  /// `Some(ptr)` pointing at a writable payload region of at least `n`
  /// bytes, or `None` if no available block is large enough. On `None`
  /// the heap is left entirely unchanged; the caller may grow the heap
  /// with [`Heap::append_pages`] and retry.
  pub fn malloc(
    &mut self,
    n: usize,
  ) -> Option<*mut u8> {
    let size = normalize_payload(n);
    let candidate = self
      .available
      .iter()
      .find(|&node| unsafe { (*node).size } >= size)?;

    unsafe {
      // Capture the list position before unlinking so a split remainder
      // can be reinserted exactly where the original block stood.
      let anchor = (*candidate).prev;
      BlockList::unlink(candidate);

      let leftover = (*candidate).size - size;
      if leftover >= BLOCK_OVERHEAD + MIN_PAYLOAD {
        (*candidate).size = size;
        write_footer(candidate);

        let remainder_addr = (footer_of(candidate) as *mut u8).add(FOOTER_BYTES);
        let remainder_size = leftover - BLOCK_OVERHEAD;
        let remainder = init_header(remainder_addr, BlockState::Available, remainder_size);
        write_footer(remainder);
        self.available.insert_after(anchor, remainder);
      }

      (*candidate).state = BlockState::Used;
      self.used.push_front(candidate);
      Some(payload_of(candidate))
    }
  }

  /// Frees a block previously returned by [`Heap::malloc`].
  ///
  /// The block is moved from the used list to the available list, then
  /// its physical neighbors (found via the boundary tags, not a list
  /// walk) are inspected and merged in if they are themselves available.
  /// Both neighbors can merge in the same call.
  ///
  /// ```text
  ///   BEFORE (freeing the middle block):
  ///   ┌──────────┬──────────┬──────────┐
  ///   │available │  used B  │available │
  ///   └──────────┴──────────┴──────────┘
  ///
  ///   AFTER (both neighbors merge into one available block):
  ///   ┌─────────────────────────────────┐
  ///   │     available, size A+OVH+B+OVH+C │
  ///   └─────────────────────────────────┘
  /// ```
  ///
  /// # Arguments
  ///
  /// * `ptr` - a payload pointer previously returned by `malloc` on this
  ///   `Heap`, or `None`.
  ///
  /// # Behavior
  ///
  /// `free(None)` is a no-op and leaves the heap unchanged. After any
  /// real free, no two physically adjacent blocks are ever both
  /// available; that invariant is restored before this call returns.
  ///
  /// # Safety note
  ///
  /// `ptr` must have been returned by `malloc` on this `Heap` and not
  /// already freed. Double-free, freeing an interior pointer, and
  /// freeing a pointer not owned by this `Heap` are undefined behavior;
  /// none of them is detected.
  pub fn free(
    &mut self,
    ptr: Option<*mut u8>,
  ) {
    let Some(ptr) = ptr else { return };
    if ptr.is_null() {
      return;
    }

    unsafe {
      let freed = header_of_payload(ptr);
      BlockList::unlink(freed);
      (*freed).state = BlockState::Available;

      let mut current = freed;
      let mut already_linked = false;

      if let Some(above) = block_above(current, self.heap_base) {
        if (*above).state == BlockState::Available {
          let combined = (*above).size + BLOCK_OVERHEAD + (*current).size;
          (*above).size = combined;
          write_footer(above);
          current = above;
          already_linked = true;
        }
      }

      if let Some(below) = block_below(current, self.heap_end) {
        if (*below).state == BlockState::Available {
          BlockList::unlink(below);
          let combined = (*current).size + BLOCK_OVERHEAD + (*below).size;
          (*current).size = combined;
          write_footer(current);
        }
      }

      if !already_linked {
        self.insert_available_ordered(current);
      }
    }
  }

  /// Grows the heap by `page_count` whole pages, mapped contiguously at
  /// the current `heap_end`.
  ///
  /// The new region becomes one available block spanning the whole
  /// extension. If the block that used to be last in the heap (the one
  /// physically touching the old `heap_end`) is available, the new
  /// region merges into it instead of sitting beside it as a second
  /// block.
  ///
  /// ```text
  ///   BEFORE:                                AFTER append_pages(k):
  ///   ┌──────────┬──────────┐                ┌──────────┬───────────────────┐
  ///   │  used A  │available │  heap_end       │  used A  │available (merged) │ new heap_end
  ///   └──────────┴──────────┘                └──────────┴───────────────────┘
  /// ```
  ///
  /// # Arguments
  ///
  /// * `page_count` - number of pages to map, each [`Heap::page_bytes`]
  ///   bytes.
  ///
  /// # Returns
  ///
  /// `Ok(())` once the new region is linked into the available list.
  ///
  /// # Errors
  ///
  /// Returns [`HeapError::InvalidArgument`] if `page_count` is zero or
  /// implausibly large (including a negative count wrapped into a huge
  /// `usize` by a careless caller), and [`HeapError::ExtensionRefused`]
  /// if the OS will not map the new pages contiguously at `heap_end`
  /// (typically because something else already occupies that address).
  /// Either error leaves the heap completely unchanged.
  pub fn append_pages(
    &mut self,
    page_count: usize,
  ) -> Result<(), HeapError> {
    if page_count == 0 || page_count > MAX_PAGE_COUNT {
      return Err(HeapError::InvalidArgument);
    }

    let hint = self.heap_end as *mut u8;
    let mapped = page::map_pages(Some(hint), page_count).ok_or(HeapError::ExtensionRefused)?;
    debug_assert_eq!(mapped as usize, self.heap_end);

    let region_bytes = page_count * self.page_bytes;
    let new_size = region_bytes - BLOCK_OVERHEAD;

    unsafe {
      let new_header = init_header(mapped, BlockState::Available, new_size);
      write_footer(new_header);

      self.heap_end += region_bytes;

      match block_above(new_header, self.heap_base) {
        Some(above) if (*above).state == BlockState::Available => {
          let combined = (*above).size + BLOCK_OVERHEAD + new_size;
          (*above).size = combined;
          write_footer(above);
        }
        _ => {
          self.available.push_back(new_header);
        }
      }
    }

    Ok(())
  }

  /// Produces a read-only snapshot of both lists for diagnostics and test
  /// assertions.
  pub fn stats(&self) -> HeapStats {
    let available: Vec<BlockStat> = self.available_blocks().collect();
    let used: Vec<BlockStat> = self.used_blocks().collect();
    let available_bytes = available.iter().map(|b| b.size).sum();
    let used_bytes = used.iter().map(|b| b.size).sum();

    HeapStats {
      heap_base: self.heap_base,
      heap_end: self.heap_end,
      available,
      used,
      available_bytes,
      used_bytes,
    }
  }

  /// Unmaps the entire managed region and consumes the heap. After this
  /// call no further operations on this value are possible, since there is
  /// no value left to call them on.
  pub fn cleanup(mut self) {
    self.unmap();
  }

  fn unmap(&mut self) {
    if self.heap_base == 0 {
      return;
    }
    unsafe {
      page::unmap_pages(self.heap_base as *mut u8, self.heap_end - self.heap_base);
    }
    self.heap_base = 0;
    self.heap_end = 0;
  }

  /// Inserts `node` into the available list at the position that keeps the
  /// list in address order: prefer a physical neighbor's existing list
  /// position before falling back to a linear walk.
  unsafe fn insert_available_ordered(
    &self,
    node: *mut BlockHeader,
  ) {
    unsafe {
      if let Some(above) = block_above(node, self.heap_base) {
        if (*above).state == BlockState::Available {
          self.available.insert_after(above, node);
          return;
        }
      }
      if let Some(below) = block_below(node, self.heap_end) {
        if (*below).state == BlockState::Available {
          self.available.insert_before(below, node);
          return;
        }
      }

      let node_addr = node as usize;
      for candidate in self.available.iter() {
        if (candidate as usize) > node_addr {
          self.available.insert_before(candidate, node);
          return;
        }
      }
      self.available.push_back(node);
    }
  }
}

impl Drop for Heap {
  fn drop(&mut self) {
    self.unmap();
  }
}

fn block_stat(node: *mut BlockHeader) -> BlockStat {
  unsafe {
    BlockStat {
      address: node as usize,
      size: (*node).size,
      state: (*node).state,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn init_installs_one_giant_available_block() {
    let heap = Heap::init(None).expect("init should succeed");
    let stats = heap.stats();
    assert_eq!(stats.available.len(), 1);
    assert_eq!(stats.used.len(), 0);
    assert_eq!(stats.available_bytes, heap.page_bytes() - BLOCK_OVERHEAD);
    heap.cleanup();
  }

  // A single allocation followed by its own free returns the heap to its
  // initial state.
  #[test]
  fn single_malloc_then_free_restores_initial_state() {
    let mut heap = Heap::init(None).unwrap();
    let before = heap.stats();

    let p1 = heap.malloc(128).expect("allocation should succeed");
    heap.free(Some(p1));

    let after = heap.stats();
    assert_eq!(after.available.len(), before.available.len());
    assert_eq!(after.used.len(), 0);
    assert_eq!(after.available_bytes, before.available_bytes);
    heap.cleanup();
  }

  // Three allocations tile the heap in address order with one available
  // remainder.
  #[test]
  fn three_allocations_tile_in_address_order() {
    let mut heap = Heap::init(None).unwrap();
    let a = heap.malloc(128).unwrap();
    let b = heap.malloc(200).unwrap();
    let c = heap.malloc(64).unwrap();

    assert!((a as usize) < (b as usize));
    assert!((b as usize) < (c as usize));

    let stats = heap.stats();
    assert_eq!(stats.used.len(), 3);
    assert_eq!(stats.available.len(), 1);

    let word = std::mem::size_of::<usize>();
    let round = |n: usize| (n + word - 1) & !(word - 1);
    assert_eq!(stats.used[2].size, round(128));
    assert_eq!(stats.used[1].size, round(200));
    assert_eq!(stats.used[0].size, round(64));
    heap.cleanup();
  }

  // Freeing the middle of three allocations does not merge across the
  // still-used block that separates it from the trailing available block.
  #[test]
  fn middle_free_does_not_merge_across_used_neighbor() {
    let mut heap = Heap::init(None).unwrap();
    let _a = heap.malloc(128).unwrap();
    let b = heap.malloc(200).unwrap();
    let _c = heap.malloc(64).unwrap();

    heap.free(Some(b));

    let stats = heap.stats();
    assert_eq!(stats.used.len(), 2);
    assert_eq!(stats.available.len(), 2);
    heap.cleanup();
  }

  // Freeing the remaining two used blocks coalesces everything back into a
  // single available block.
  #[test]
  fn freeing_remaining_neighbors_coalesces_fully() {
    let mut heap = Heap::init(None).unwrap();
    let a = heap.malloc(128).unwrap();
    let b = heap.malloc(200).unwrap();
    let c = heap.malloc(64).unwrap();

    heap.free(Some(b));
    heap.free(Some(a));
    heap.free(Some(c));

    let stats = heap.stats();
    assert_eq!(stats.used.len(), 0);
    assert_eq!(stats.available.len(), 1);
    assert_eq!(stats.available_bytes, heap.page_bytes() - BLOCK_OVERHEAD);
    heap.cleanup();
  }

  // Allocation failure, then recovery via append_pages.
  #[test]
  fn malloc_failure_then_recovery_via_append_pages() {
    let mut heap = Heap::init(None).unwrap();
    let page = heap.page_bytes();

    let before = heap.stats();
    assert!(heap.malloc(page).is_none());
    let after_failure = heap.stats();
    assert_eq!(after_failure.available_bytes, before.available_bytes);

    heap.append_pages(3).expect("extension should succeed");
    assert!(heap.malloc(page).is_some());
    heap.cleanup();
  }

  // Extension blocked by a foreign mapping at heap_end.
  #[test]
  fn append_pages_fails_on_address_conflict() {
    let mut heap = Heap::init(None).unwrap();
    let conflict = page::map_pages(Some(heap.heap_end() as *mut u8), 1)
      .expect("conflicting mapping should itself succeed");

    let before = heap.stats();
    let result = heap.append_pages(3);
    assert!(result.is_err());
    assert_eq!(heap.stats().available_bytes, before.available_bytes);

    unsafe {
      page::unmap_pages(conflict, heap.page_bytes());
    }
    heap.cleanup();
  }

  #[test]
  fn append_pages_rejects_invalid_counts() {
    let mut heap = Heap::init(None).unwrap();
    assert_eq!(heap.append_pages(0), Err(HeapError::InvalidArgument));
    assert_eq!(
      heap.append_pages(usize::MAX),
      Err(HeapError::InvalidArgument)
    );
    heap.cleanup();
  }

  #[test]
  fn free_of_none_is_a_no_op() {
    let mut heap = Heap::init(None).unwrap();
    let before = heap.stats();
    heap.free(None);
    heap.free(None);
    let after = heap.stats();
    assert_eq!(after.available_bytes, before.available_bytes);
    assert_eq!(after.used.len(), before.used.len());
    heap.cleanup();
  }

  // No-split boundary: a request close enough to the available block's
  // size that the remainder could not itself host a valid block must not
  // split.
  #[test]
  fn no_split_when_remainder_too_small() {
    let mut heap = Heap::init(Some(4096)).unwrap();
    let initial_size = heap.stats().available[0].size;

    // Request everything except just under the split threshold.
    let n = initial_size - BLOCK_OVERHEAD - MIN_PAYLOAD + 1;
    let p = heap.malloc(n).unwrap();
    let stats = heap.stats();
    assert_eq!(stats.available.len(), 0);
    assert_eq!(stats.used[0].size, initial_size);
    heap.free(Some(p));
    heap.cleanup();
  }

  #[test]
  fn append_pages_merges_with_available_tail() {
    let mut heap = Heap::init(None).unwrap();
    // Nothing allocated: the sole block is available and sits last.
    heap.append_pages(2).unwrap();
    let stats = heap.stats();
    assert_eq!(stats.available.len(), 1);
    assert_eq!(
      stats.available_bytes,
      3 * heap.page_bytes() - BLOCK_OVERHEAD
    );
    heap.cleanup();
  }

  #[test]
  fn malloc_zero_returns_a_freeable_minimum_block() {
    let mut heap = Heap::init(None).unwrap();
    let p = heap.malloc(0).expect("malloc(0) should not fail");
    assert!(!p.is_null());
    heap.free(Some(p));
    heap.cleanup();
  }

  #[test]
  fn allocation_bound_holds_within_heap_range() {
    let mut heap = Heap::init(None).unwrap();
    let p = heap.malloc(64).unwrap() as usize;
    assert!(p >= heap.heap_base() + block::HEADER_BYTES);
    assert!(p < heap.heap_end() - block::FOOTER_BYTES);
    heap.cleanup();
  }
}
