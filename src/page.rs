//! # OS Page Layer
//!
//! The bottom layer of the allocator: obtaining and releasing whole pages of
//! anonymous memory from the operating system via `mmap`/`munmap`.
//!
//! Nothing above this module knows `libc` exists. Everything here deals in
//! raw addresses and byte counts; the block and heap layers above build
//! structure on top of whatever bytes this layer hands back.
//!
//! ## Address-hinted mapping
//!
//! `map_pages` can be asked to place a region at a specific address (used by
//! [`crate::heap::Heap::append_pages`] to grow the heap contiguously). The
//! hint is passed to `mmap` *without* `MAP_FIXED`: `MAP_FIXED` would silently
//! clobber whatever was already mapped there, and a heap extension must
//! never silently relocate the heap out from under its caller. Instead, the
//! returned address is compared against the hint; a mismatch means the
//! kernel put the mapping somewhere else because the hint was occupied, so
//! the stray mapping is torn down and the call reports failure.

use std::ffi::c_void;
use std::ptr;
use std::sync::OnceLock;

use libc::{self, MAP_ANONYMOUS, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE};

static PAGE_BYTES: OnceLock<usize> = OnceLock::new();

/// Returns the system page size in bytes, querying the OS once and caching
/// the result for the lifetime of the process.
pub fn page_bytes() -> usize {
  *PAGE_BYTES.get_or_init(|| {
    let bytes = unsafe { libc::sysconf(_SC_PAGESIZE) };
    if bytes <= 0 {
      4096
    } else {
      bytes as usize
    }
  })
}

/// Rounds `bytes` up to the next whole multiple of the page size (or leaves
/// it unchanged if it already is one). `bytes == 0` rounds up to one page.
pub fn round_up_to_pages(bytes: usize) -> usize {
  let page = page_bytes();
  if bytes == 0 {
    return page;
  }
  bytes.div_ceil(page) * page
}

/// Maps `page_count` anonymous, read/write pages.
///
/// If `hint` is `Some`, the mapping is requested at that exact address; a
/// `hint` of `None` lets the kernel choose. Returns `None` if the mapping
/// could not be placed at the requested hint, or if `mmap` itself fails.
pub fn map_pages(
  hint: Option<*mut u8>,
  page_count: usize,
) -> Option<*mut u8> {
  if page_count == 0 {
    return None;
  }

  let len = page_count * page_bytes();
  let hint_addr = hint.map(|p| p as *mut c_void).unwrap_or(ptr::null_mut());

  let mapped = unsafe {
    libc::mmap(
      hint_addr,
      len,
      PROT_READ | PROT_WRITE,
      MAP_PRIVATE | MAP_ANONYMOUS,
      -1,
      0,
    )
  };

  if mapped == libc::MAP_FAILED {
    return None;
  }

  if let Some(requested) = hint {
    if mapped != requested as *mut c_void {
      // The kernel placed us somewhere other than requested: the hint
      // address was already occupied. Undo the stray mapping and report
      // the conflict rather than silently handing back a relocated range.
      unsafe {
        libc::munmap(mapped, len);
      }
      return None;
    }
  }

  Some(mapped as *mut u8)
}

/// Releases `byte_count` bytes previously obtained from [`map_pages`],
/// starting at `base`.
///
/// # Safety
///
/// `base` must be the exact address returned by a prior `map_pages` call,
/// and `byte_count` must not exceed the mapped length; unmapping a
/// sub-range or an address never returned by `map_pages` is undefined
/// behavior at the OS level (it may unmap unrelated memory).
pub unsafe fn unmap_pages(
  base: *mut u8,
  byte_count: usize,
) {
  if base.is_null() || byte_count == 0 {
    return;
  }
  unsafe {
    libc::munmap(base as *mut c_void, byte_count);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_bytes_is_plausible_and_stable() {
    let a = page_bytes();
    let b = page_bytes();
    assert_eq!(a, b);
    assert!(a >= 4096);
    assert!(a.is_power_of_two());
  }

  #[test]
  fn round_up_to_pages_matches_expectations() {
    let page = page_bytes();
    assert_eq!(round_up_to_pages(0), page);
    assert_eq!(round_up_to_pages(1), page);
    assert_eq!(round_up_to_pages(page), page);
    assert_eq!(round_up_to_pages(page + 1), page * 2);
  }

  #[test]
  fn map_then_unmap_without_hint() {
    let base = map_pages(None, 1).expect("mapping should succeed");
    assert!(!base.is_null());
    unsafe {
      ptr::write_bytes(base, 0xAB, page_bytes());
      assert_eq!(*base, 0xAB);
      unmap_pages(base, page_bytes());
    }
  }

  #[test]
  fn map_at_hint_then_extend_contiguously() {
    let page = page_bytes();
    let base = map_pages(None, 2).expect("initial mapping should succeed");
    unsafe {
      unmap_pages(base, 2 * page);
    }

    // Re-request the same address: nothing else should occupy it yet.
    let remapped = map_pages(Some(base), 2).expect("hinted remap should succeed");
    assert_eq!(remapped, base);
    unsafe {
      unmap_pages(remapped, 2 * page);
    }
  }

  #[test]
  fn hinted_map_fails_on_conflict() {
    let page = page_bytes();
    let first = map_pages(None, 1).expect("first mapping should succeed");
    let conflict_hint = first;

    // first's page is still live, so requesting it again must fail rather
    // than silently relocate.
    let result = map_pages(Some(conflict_hint), 1);
    assert!(result.is_none());

    unsafe {
      unmap_pages(first, page);
    }
  }
}
