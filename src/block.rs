//! # Boundary-Tag Block Layer
//!
//! A block is a contiguous span of heap bytes bracketed by a [`BlockHeader`]
//! at its low address and a [`BlockFooter`] at its high address:
//!
//! ```text
//!   ┌────────────┬─────────────────────────────┬────────────┐
//!   │   Header    │           Payload            │   Footer   │
//!   │ state, size │        size bytes            │    size    │
//!   │ prev, next  │                               │            │
//!   └────────────┴─────────────────────────────┴────────────┘
//!   ▲                                                          ▲
//!   header address                                  header + HEADER + size
//! ```
//!
//! The footer exists purely so that, given a block, the block physically
//! *before* it can be found in O(1): walk backwards `FOOTER_BYTES` to read
//! that neighbor's size, then backwards again past its header. This module
//! is the only place in the crate that turns a `usize` address into a
//! `*mut BlockHeader` and back; everything above it (`list`, `heap`) works
//! through the `Option`-returning navigation functions below.

use std::mem;
use std::ptr;

use crate::align;

/// Lifecycle state of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
  Available,
  Used,
}

/// In-band header, living at a block's low address.
#[repr(C)]
pub struct BlockHeader {
  pub state: BlockState,
  pub size: usize,
  pub prev: *mut BlockHeader,
  pub next: *mut BlockHeader,
}

/// In-band footer, living at a block's high address.
#[repr(C)]
pub struct BlockFooter {
  pub size: usize,
}

pub const HEADER_BYTES: usize = mem::size_of::<BlockHeader>();
pub const FOOTER_BYTES: usize = mem::size_of::<BlockFooter>();

/// Total metadata overhead (header + footer) charged against every block.
pub const BLOCK_OVERHEAD: usize = HEADER_BYTES + FOOTER_BYTES;

/// Minimum payload a block may hold: one machine word, the smallest size
/// that still lets a split-off remainder host a valid block of its own.
pub const MIN_PAYLOAD: usize = mem::size_of::<usize>();

/// Rounds `n` up to [`MIN_PAYLOAD`] and to the natural word alignment.
pub fn normalize_payload(n: usize) -> usize {
  align!(n).max(MIN_PAYLOAD)
}

/// Initializes a fresh header in place at `addr`, with no list links.
///
/// # Safety
///
/// `addr` must point to at least `HEADER_BYTES` writable bytes, and the
/// corresponding footer at `footer_of(addr)` must also be writable for
/// `size` to be meaningful.
pub unsafe fn init_header(
  addr: *mut u8,
  state: BlockState,
  size: usize,
) -> *mut BlockHeader {
  let header = addr as *mut BlockHeader;
  unsafe {
    ptr::write(
      header,
      BlockHeader {
        state,
        size,
        prev: ptr::null_mut(),
        next: ptr::null_mut(),
      },
    );
  }
  header
}

/// Returns the address of `header`'s footer.
///
/// # Safety
///
/// `header` must point to a live, initialized `BlockHeader`.
pub unsafe fn footer_of(header: *mut BlockHeader) -> *mut BlockFooter {
  let size = unsafe { (*header).size };
  unsafe { (header as *mut u8).add(HEADER_BYTES).add(size) as *mut BlockFooter }
}

/// Writes `header.size` into its footer, keeping the boundary tags in sync.
///
/// # Safety
///
/// `header` must point to a live, initialized `BlockHeader` whose footer
/// region is writable.
pub unsafe fn write_footer(header: *mut BlockHeader) {
  let size = unsafe { (*header).size };
  let footer = unsafe { footer_of(header) };
  unsafe {
    ptr::write(footer, BlockFooter { size });
  }
}

/// Returns the payload pointer for `header` (the address `malloc` hands the
/// caller).
///
/// # Safety
///
/// `header` must point to a live `BlockHeader`.
pub unsafe fn payload_of(header: *mut BlockHeader) -> *mut u8 {
  unsafe { (header as *mut u8).add(HEADER_BYTES) }
}

/// Recovers the owning header from a payload pointer previously returned by
/// [`payload_of`].
///
/// # Safety
///
/// `payload` must have been produced by `payload_of` on a still-live block.
pub unsafe fn header_of_payload(payload: *mut u8) -> *mut BlockHeader {
  unsafe { payload.sub(HEADER_BYTES) as *mut BlockHeader }
}

/// Locates the block physically preceding `header`, if any.
///
/// Reads the trailing footer just below `header`'s address to recover the
/// previous block's size, then steps back past that block's own header.
/// Returns `None` if the computed address would fall below `heap_base`
/// (there is no block above).
///
/// # Safety
///
/// `header` and `heap_base` must describe a block within a currently
/// mapped, properly tiled heap region.
pub unsafe fn block_above(
  header: *mut BlockHeader,
  heap_base: usize,
) -> Option<*mut BlockHeader> {
  let header_addr = header as usize;
  if header_addr < heap_base + FOOTER_BYTES {
    return None;
  }
  let prev_footer = (header_addr - FOOTER_BYTES) as *mut BlockFooter;
  let prev_size = unsafe { (*prev_footer).size };
  let prev_header_addr = header_addr
    .checked_sub(FOOTER_BYTES)
    .and_then(|a| a.checked_sub(HEADER_BYTES))
    .and_then(|a| a.checked_sub(prev_size))?;
  if prev_header_addr < heap_base {
    return None;
  }
  Some(prev_header_addr as *mut BlockHeader)
}

/// Locates the block physically following `header`, if any.
///
/// Returns `None` if `header`'s footer is immediately followed by
/// `heap_end` (there is no block below).
///
/// # Safety
///
/// `header` and `heap_end` must describe a block within a currently
/// mapped, properly tiled heap region.
pub unsafe fn block_below(
  header: *mut BlockHeader,
  heap_end: usize,
) -> Option<*mut BlockHeader> {
  let below_addr = unsafe { footer_of(header) as usize } + FOOTER_BYTES;
  if below_addr >= heap_end {
    return None;
  }
  Some(below_addr as *mut BlockHeader)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_region(bytes: usize) -> Vec<u8> {
    vec![0u8; bytes]
  }

  #[test]
  fn overhead_and_min_payload_are_word_sized() {
    assert_eq!(BLOCK_OVERHEAD, HEADER_BYTES + FOOTER_BYTES);
    assert!(MIN_PAYLOAD >= mem::size_of::<usize>());
  }

  #[test]
  fn normalize_payload_rounds_up_to_word_and_minimum() {
    assert_eq!(normalize_payload(0), MIN_PAYLOAD);
    assert_eq!(normalize_payload(1), MIN_PAYLOAD.max(mem::size_of::<usize>()));
    let word = mem::size_of::<usize>();
    assert_eq!(normalize_payload(word + 1), word * 2);
  }

  #[test]
  fn footer_round_trips_through_payload_and_header() {
    let mut region = make_region(256);
    let base = region.as_mut_ptr();
    unsafe {
      let header = init_header(base, BlockState::Used, 64);
      write_footer(header);

      let payload = payload_of(header);
      assert_eq!(payload, base.add(HEADER_BYTES));

      let recovered = header_of_payload(payload);
      assert_eq!(recovered, header);

      let footer = footer_of(header);
      assert_eq!((*footer).size, 64);
    }
  }

  #[test]
  fn block_above_and_below_navigate_two_tiled_blocks() {
    let mut region = make_region(512);
    let base = region.as_mut_ptr();
    let heap_base = base as usize;
    let heap_end = heap_base + 512;

    unsafe {
      let first = init_header(base, BlockState::Used, 64);
      write_footer(first);

      let second_addr = base.add(HEADER_BYTES + 64 + FOOTER_BYTES);
      let second = init_header(second_addr, BlockState::Available, 512 - 2 * BLOCK_OVERHEAD - 64);
      write_footer(second);

      assert_eq!(block_above(first, heap_base), None);
      assert_eq!(block_below(first, heap_end), Some(second));
      assert_eq!(block_above(second, heap_base), Some(first));
      assert_eq!(block_below(second, heap_end), None);
    }
  }
}
