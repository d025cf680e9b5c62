//! Process-wide allocator interface.
//!
//! Mirrors the classic C-style surface over one singleton [`Heap`]: the
//! region is set up exactly once with [`init`] and lives until the process
//! exits; it is never torn down. All functions here are `unsafe` for the
//! same reason: there is no internal locking, so the caller must guarantee
//! that no two of these operations run concurrently. Signal-handler use is
//! not supported.
//!
//! Failures mirror [`Heap`]'s, with one addition: [`init`] reports every
//! failure as a one-line diagnostic on stderr, while the other operations
//! fail silently through their return values.
//!
//! ```rust
//! use tagheap::global;
//!
//! unsafe {
//!     global::init(4096).unwrap();
//!
//!     let payload = global::alloc(32);
//!     assert!(!payload.is_null());
//!
//!     global::free(payload).unwrap();
//!     global::coalesce();
//!     global::display();
//! }
//! ```

use std::{cell::UnsafeCell, ptr::NonNull};

use crate::heap::{FreeError, Heap, InitError};

/// Holder for the singleton so it can live in a `static`. Upholding the
/// no-concurrent-access contract is pushed onto the callers of this module,
/// which is exactly what the `Sync` promise below amounts to.
struct GlobalHeap {
    heap: UnsafeCell<Option<Heap>>,
}

unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap {
    heap: UnsafeCell::new(None),
};

/// Sets up the process-wide heap over a region of at least `region_size`
/// bytes. Intended to be called once; repeat calls fail with
/// [`InitError::AlreadyInitialized`] and leave the existing heap untouched.
/// Every failure is also reported on stderr.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module.
pub unsafe fn init(region_size: usize) -> Result<(), InitError> {
    let slot = &mut *HEAP.heap.get();

    let result = if slot.is_some() {
        Err(InitError::AlreadyInitialized)
    } else {
        Heap::with_region_size(region_size).map(|heap| *slot = Some(heap))
    };

    if let Err(error) = result {
        eprintln!("tagheap: init: {error}");
    }

    result
}

/// Allocates `size` bytes from the process-wide heap and returns the
/// payload pointer, or null when the request cannot be satisfied (including
/// before [`init`] has succeeded). No diagnostic is emitted.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module.
pub unsafe fn alloc(size: usize) -> *mut u8 {
    match &mut *HEAP.heap.get() {
        Some(heap) => heap
            .allocate(size)
            .map_or(std::ptr::null_mut(), |payload| payload.cast().as_ptr()),
        None => std::ptr::null_mut(),
    }
}

/// Releases a payload previously returned by [`alloc`]. Null, misaligned,
/// out-of-range and double-freed pointers are rejected with [`FreeError`]
/// and no state change. Adjacent free blocks are **not** merged; call
/// [`coalesce`] for that.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module. See
/// [`Heap::deallocate`] for what fabricated pointers can do.
pub unsafe fn free(ptr: *mut u8) -> Result<(), FreeError> {
    let Some(heap) = (*HEAP.heap.get()).as_mut() else {
        return Err(FreeError);
    };

    let Some(payload) = NonNull::new(ptr) else {
        return Err(FreeError);
    };

    heap.deallocate(payload)
}

/// Merges all adjacent free blocks of the process-wide heap and returns the
/// number of merges. Before [`init`], does nothing and returns 0.
///
/// # Safety
///
/// Must not run concurrently with any other function of this module.
pub unsafe fn coalesce() -> usize {
    match &mut *HEAP.heap.get() {
        Some(heap) => heap.coalesce(),
        None => 0,
    }
}

/// Dumps the block layout of the process-wide heap to stdout. Before
/// [`init`], prints nothing. Never mutates state.
///
/// # Safety
///
/// Must not run concurrently with a mutating function of this module.
pub unsafe fn display() {
    if let Some(heap) = (*HEAP.heap.get()).as_ref() {
        heap.display();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The whole global surface in one test: the singleton state would make
    /// separate `#[test]` functions race each other.
    #[test]
    fn global_interface_lifecycle() {
        unsafe {
            // Nothing works before init.
            assert!(alloc(16).is_null());
            assert_eq!(free(std::ptr::null_mut()), Err(FreeError));
            assert_eq!(coalesce(), 0);

            init(4096).unwrap();
            assert_eq!(init(4096), Err(InitError::AlreadyInitialized));

            let payload = alloc(32);
            assert!(!payload.is_null());
            assert_eq!(payload as usize % 8, 0);

            assert_eq!(free(std::ptr::null_mut()), Err(FreeError));

            free(payload).unwrap();
            assert_eq!(free(payload), Err(FreeError));

            // The freed block and the trailing block merge into one.
            assert_eq!(coalesce(), 1);

            display();
        }
    }
}
