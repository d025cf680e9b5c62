//! Fixed-region heap allocator built on boundary tags.
//!
//! One contiguous memory region is requested from the operating system at
//! initialization and carved into an implicit list of variable-sized blocks.
//! Every block starts with a packed 32 bit header word, free blocks
//! additionally carry a trailing footer, and the list is terminated by an
//! end sentinel. Placement is best-fit with splitting, freeing is O(1) and
//! deliberately does **not** merge neighbors; merging is batched into an
//! explicit [`Heap::coalesce`] pass.
//!
//! The crate exposes two layers:
//!
//! - [`Heap`], an owned allocator over its own mapped region. Not thread
//!   safe; it needs mutable borrows to operate.
//! - [`global`], a process-wide singleton mirroring the classic C-style
//!   interface (`init`/`alloc`/`free`/`coalesce`/`display`). Its functions
//!   are `unsafe` because callers must provide their own mutual exclusion.

use std::ptr::NonNull;

mod align;
mod block;
mod header;
mod platform;
mod region;

pub mod global;
pub mod heap;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use heap::{BlockInfo, FreeError, Heap, HeapStats, InitError};
