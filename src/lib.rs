//! # pageheap - A Page-Backed Explicit Heap Allocator
//!
//! `pageheap` is an explicit, first-fit, boundary-tag heap manager. It maps
//! its own region of anonymous memory from the OS and hands out
//! variable-sized byte regions from it, the way a textbook `malloc`/`free`
//! implementation does, except every block carries a header *and* a
//! footer, so physically adjacent blocks can be discovered and merged in
//! O(1) without walking the whole heap.
//!
//! ```text
//!   Managed Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         MAPPED HEAP                                  │
//!   │                                                                      │
//!   │   ┌────────┬────────┬────────┬──────────────────────────────────┐   │
//!   │   │ used A │ avail  │ used B │           available              │   │
//!   │   └────────┴────────┴────────┴──────────────────────────────────┘   │
//!   │   ▲                                                              ▲   │
//!   │  heap_base                                                  heap_end│
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Each block is bracketed by a header (low address) and a footer (high
//!   address). The footer lets a block's *physical predecessor* be found in
//!   O(1): walk back past the footer to read its size, then back past its
//!   header.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   pageheap
//!   ├── align  - word alignment macro
//!   ├── page   - OS page mapping (mmap/munmap), page-size queries
//!   ├── block  - boundary-tag header/footer layout and navigation
//!   ├── list   - sentinel-anchored intrusive doubly linked list
//!   ├── error  - HeapError taxonomy for append_pages
//!   └── heap   - the controller: malloc / free / append_pages / stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pageheap::Heap;
//!
//! let mut heap = Heap::init(None).expect("failed to map initial heap");
//!
//! let p = heap.malloc(128).expect("allocation failed");
//! unsafe {
//!     (p as *mut u64).write(42);
//! }
//! heap.free(Some(p));
//!
//! println!("{}", heap.stats());
//! heap.cleanup();
//! ```
//!
//! ## What this crate does not do
//!
//! No thread safety (a `Heap` is neither `Send` nor `Sync`; wrap it in a
//! `Mutex` yourself if you need one), no best-fit or segregated-fit search,
//! no alignment guarantees beyond one machine word, no heap shrinking, and
//! no detection of double-free or use-after-free. These are deliberate
//! non-goals, not missing features.

pub mod align;
mod block;
mod error;
mod heap;
mod list;
mod page;

pub use block::{normalize_payload, BlockState, BLOCK_OVERHEAD, MIN_PAYLOAD};
pub use error::HeapError;
pub use heap::{BlockStat, Heap, HeapStats};
pub use page::page_bytes;
