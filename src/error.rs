//! Error taxonomy for the heap controller's recoverable failure modes.
//!
//! `malloc` reports its one failure mode as a plain `None` rather than
//! through this enum, since a missing allocation isn't exceptional; it's the
//! expected "try `append_pages` and retry" signal. `HeapError` exists for
//! `append_pages`, whose two failure modes are worth telling apart when a
//! caller decides whether retrying makes sense at all.

use std::fmt;

/// Recoverable failure modes of [`crate::heap::Heap::append_pages`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
  /// `page_count` was zero, negative, or implausibly large.
  InvalidArgument,
  /// The OS refused to extend the heap at its current end address
  /// (typically because something else is already mapped there).
  ExtensionRefused,
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      HeapError::InvalidArgument => write!(f, "invalid page count"),
      HeapError::ExtensionRefused => write!(f, "heap extension refused by the OS"),
    }
  }
}

impl std::error::Error for HeapError {}
