//! The block placement engine: initializer, best-fit allocator with
//! splitting, the O(1) releaser and the deferred coalescer, plus the
//! human-readable layout dump.
//!
//! A [`Heap`] owns one mapped region laid out as an implicit list of blocks:
//!
//! ```text
//!                 first block
//!                      |
//! +------+------+-------------+------+-------------+--------+----------+
//! | pad  | Hdr  |   payload   | Hdr  |   payload   | Footer | sentinel |
//! +------+------+-------------+------+-------------+--------+----------+
//!                \___ allocated ____/ \_______ free ________/
//! ```
//!
//! Every structural decision lives here; the byte arithmetic it is built on
//! lives in the `block` and `header` modules.

use std::{
    error::Error,
    fmt,
    io::{self, Write},
    marker::PhantomData,
    ptr::NonNull,
};

use log::debug;

use crate::{
    align::{align, align_up},
    block::{self, Blocks, HEADER_SIZE, MIN_BLOCK_SIZE},
    header::Header,
    region::{determine_region_length, MappedRegion, MAX_REGION_SIZE},
    Pointer,
};

pub use crate::block::ALIGNMENT;

/// Reasons the region initializer can fail. These are the only failures in
/// the crate that carry a diagnostic message; see [`crate::global::init`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitError {
    /// The requested region size is zero or doesn't fit the 32 bit header
    /// size field.
    InvalidSize,
    /// The process-wide heap was already set up by a previous call. Only
    /// returned by [`crate::global::init`].
    AlreadyInitialized,
    /// The operating system refused to map the backing region.
    RegionUnavailable,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            InitError::InvalidSize => "requested region size is not positive or too large",
            InitError::AlreadyInitialized => {
                "heap region was already set up during a previous call"
            }
            InitError::RegionUnavailable => "cannot map space for the heap region",
        };

        f.write_str(message)
    }
}

impl Error for InitError {}

/// Rejected free request. Every validation failure collapses into this one
/// value; callers only learn that the pointer was not accepted and that the
/// heap is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeError;

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pointer does not refer to an allocated payload")
    }
}

impl Error for FreeError {}

/// Snapshot of one block, in the order [`Heap::blocks`] yields them. Plain
/// data; holding these never borrows heap memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Address of the block header.
    pub address: usize,
    /// Total block size in bytes, header included.
    pub size: usize,
    /// Whether the a-bit is clear.
    pub is_free: bool,
    /// Whether the p-bit is clear.
    pub prev_is_free: bool,
    /// Size recorded in the trailing footer. Present on free blocks only.
    pub footer_size: Option<usize>,
}

impl BlockInfo {
    /// Address of the last byte of the block.
    pub fn end_address(&self) -> usize {
        self.address + self.size - 1
    }

    /// Bytes available to a caller if this block is (or were) allocated.
    pub fn payload_size(&self) -> usize {
        self.size - HEADER_SIZE
    }
}

/// Iterator over [`BlockInfo`] snapshots. See [`Heap::blocks`].
pub struct BlockIter<'a> {
    walk: Blocks,
    _heap: PhantomData<&'a Heap>,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        self.walk.next().map(|block| unsafe {
            let header = *block.as_ref();

            let footer_size = if header.is_allocated() {
                None
            } else {
                Some(block::footer_of(block).as_ref().size())
            };

            BlockInfo {
                address: block.as_ptr() as usize,
                size: header.size(),
                is_free: !header.is_allocated(),
                prev_is_free: !header.prev_allocated(),
                footer_size,
            }
        })
    }
}

/// Totals reported by [`Heap::stats`] and printed by the display dump.
/// Both counters measure payload capacity, the block size minus its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapStats {
    /// Payload capacity of all allocated blocks.
    pub used: usize,
    /// Payload capacity of all free blocks.
    pub free: usize,
}

impl HeapStats {
    /// Capacity of the heap as currently carved up.
    pub fn total(&self) -> usize {
        self.used + self.free
    }
}

/// A fixed-size heap over one memory mapping.
///
/// Operations need `&mut self` and the type is deliberately not [`Sync`];
/// anyone who wants to share a heap between threads has to wrap it in their
/// own lock. The mapping is returned to the kernel when the value drops.
///
/// # Examples
///
/// ```rust
/// use tagheap::Heap;
///
/// let mut heap = Heap::with_region_size(4096).unwrap();
///
/// let payload = heap.allocate(32).unwrap();
/// assert!(payload.len() >= 32);
/// assert_eq!(payload.cast::<u8>().as_ptr() as usize % 8, 0);
///
/// unsafe { heap.deallocate(payload.cast()).unwrap() };
/// heap.coalesce();
/// ```
pub struct Heap {
    /// The backing mapping. Held for ownership; all traversal starts at
    /// `first_block`.
    region: MappedRegion,
    /// Header of the block at the lowest address.
    first_block: NonNull<Header>,
    /// Size of the usable interior: every block lives in
    /// `[first_block, first_block + usable)`, the end sentinel right after.
    usable: usize,
}

impl Heap {
    /// Maps a region of at least `region_size` bytes (rounded up to a page
    /// multiple) and installs a single free block spanning the usable
    /// interior, followed by the end sentinel.
    pub fn with_region_size(region_size: usize) -> Result<Self, InitError> {
        if region_size == 0 || region_size > MAX_REGION_SIZE {
            return Err(InitError::InvalidSize);
        }

        let length = determine_region_length(region_size);
        let region = MappedRegion::request(length).ok_or(InitError::RegionUnavailable)?;

        let base = region.address().as_ptr() as usize;

        // Place the first header so that payloads land on 8 byte boundaries
        // instead of assuming the mapping makes it so. For a page-aligned
        // base this puts it 4 bytes in.
        let offset = align_up(base + HEADER_SIZE, ALIGNMENT) - HEADER_SIZE - base;

        // Largest multiple of 8 that still leaves room for the sentinel.
        let usable = (length - offset - HEADER_SIZE) & !(ALIGNMENT - 1);

        let first_block = unsafe {
            let first: NonNull<Header> =
                NonNull::new_unchecked(region.address().as_ptr().add(offset).cast());

            // The initial block spans the whole interior. Its p-bit is set
            // so that no predecessor is ever consulted.
            *first.as_ptr() = Header::new(usable, false, true);
            block::write_footer(first);

            *block::successor_of(first).as_ptr() = Header::END;

            debug_assert_eq!(
                Header::payload_address_of(first).as_ptr() as usize % ALIGNMENT,
                0
            );

            first
        };

        debug!("mapped {length} byte region, usable interior {usable}");

        Ok(Self {
            region,
            first_block,
            usable,
        })
    }

    /// Size in bytes of the usable interior. The block sizes of
    /// [`Heap::blocks`] always sum to exactly this value.
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.usable
    }

    /// Total length of the backing mapping, a page multiple.
    #[inline]
    pub fn region_length(&self) -> usize {
        self.region.length()
    }

    /// Allocates a block whose payload can hold at least `size` bytes and
    /// returns the payload as a pointer-with-capacity, or `None` when the
    /// request cannot be satisfied. A failed call leaves the heap untouched.
    ///
    /// Placement is best-fit: the smallest free block that fits wins, ties
    /// broken in favor of the lowest address. The chosen block is split when
    /// the cut-off tail is big enough to stand on its own as a block.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<[u8]>> {
        if size == 0 || size > self.usable - HEADER_SIZE {
            return None;
        }

        // Payload plus header, then padded up to the block alignment.
        let needed = size + HEADER_SIZE;
        let total = align(needed);

        let block = self.find_best_fit(needed, total)?;

        unsafe {
            let header = *block.as_ref();
            debug_assert!(!header.is_allocated());

            let new_size = if header.size() - total >= MIN_BLOCK_SIZE {
                // Split. The low `total` bytes become the allocated block,
                // the tail becomes a new free block whose predecessor is
                // allocated. The block after the tail keeps its p-bit: the
                // tail is as free as the original block was.
                let tail: NonNull<Header> =
                    NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(total).cast());

                *tail.as_ptr() = Header::new(header.size() - total, false, true);
                block::write_footer(tail);

                total
            } else {
                // Consume the whole block. Its successor now has an
                // allocated predecessor, unless it is the end sentinel.
                let mut successor = block::successor_of(block);
                if !successor.as_ref().is_end_sentinel() {
                    successor.as_mut().set_prev_allocated(true);
                }

                header.size()
            };

            // Flip the a-bit, record the size, keep the p-bit verbatim.
            *block.as_ptr() = Header::new(new_size, true, header.prev_allocated());

            debug!("allocated {new_size} byte block at {block:?} for a {size} byte request");

            Some(NonNull::slice_from_raw_parts(
                Header::payload_address_of(block),
                new_size - HEADER_SIZE,
            ))
        }
    }

    /// Marks the block whose payload begins at `payload` as free, writes its
    /// footer and clears the successor's p-bit. Deliberately does **not**
    /// merge with neighbors; merging is batched into [`Heap::coalesce`].
    ///
    /// A pointer that is misaligned, outside the interior, or whose block is
    /// not currently allocated (double free) is rejected with [`FreeError`]
    /// and no state change.
    ///
    /// # Safety
    ///
    /// `payload` should be a pointer previously returned by
    /// [`Heap::allocate`] on this heap and not freed since. Pointers failing
    /// the validation above are rejected cleanly, but a fabricated pointer
    /// that happens to pass every check can corrupt allocator bookkeeping
    /// (never memory outside the region).
    pub unsafe fn deallocate(&mut self, payload: NonNull<u8>) -> Result<(), FreeError> {
        let address = payload.as_ptr() as usize;
        let first = self.first_block.as_ptr() as usize;
        let end = first + self.usable; // address of the end sentinel

        if address % ALIGNMENT != 0 {
            return Err(FreeError);
        }

        // The payload must lie strictly inside the interior: past the first
        // header, below the sentinel.
        if address <= first || address >= end {
            return Err(FreeError);
        }

        let block = Header::from_payload_address(payload);
        let header = *block.as_ref();

        if !header.is_allocated() {
            return Err(FreeError);
        }

        // Any header we trust from here on must describe a block that stays
        // inside the region, or the writes below could escape it.
        let size = header.size();
        if size < MIN_BLOCK_SIZE || size > end - address + HEADER_SIZE {
            return Err(FreeError);
        }

        *block.as_ptr() = Header::new(size, false, header.prev_allocated());
        block::write_footer(block);

        let mut successor = block::successor_of(block);
        if !successor.as_ref().is_end_sentinel() {
            successor.as_mut().set_prev_allocated(false);
        }

        debug!("freed {size} byte block at {block:?}");

        Ok(())
    }

    /// Walks the implicit list once and merges every adjacent pair of free
    /// blocks, in both directions. Returns the number of merges performed.
    /// After this returns, no two adjacent blocks are both free.
    pub fn coalesce(&mut self) -> usize {
        let mut merges = 0;
        let mut cursor = self.first_block;

        unsafe {
            while !cursor.as_ref().is_end_sentinel() {
                if !cursor.as_ref().is_allocated() {
                    // Forward: absorb a free successor into this block.
                    let successor = block::successor_of(cursor);
                    if !successor.as_ref().is_end_sentinel() && !successor.as_ref().is_allocated()
                    {
                        let merged = cursor.as_ref().size() + successor.as_ref().size();
                        *cursor.as_ptr() =
                            Header::new(merged, false, cursor.as_ref().prev_allocated());
                        block::write_footer(cursor);
                        merges += 1;
                    }

                    // Backward: fold this block into a free predecessor,
                    // located through the footer right below our header.
                    if !cursor.as_ref().prev_allocated() {
                        let prev = block::predecessor_of(cursor);
                        let merged = prev.as_ref().size() + cursor.as_ref().size();
                        *prev.as_ptr() =
                            Header::new(merged, false, prev.as_ref().prev_allocated());
                        block::write_footer(prev);
                        merges += 1;
                    }
                }

                // The cursor header still holds the size it had after the
                // forward merge even when a predecessor absorbed it, so this
                // step lands right after the merged area.
                cursor = block::successor_of(cursor);
            }
        }

        if merges > 0 {
            debug!("coalesce pass merged {merges} adjacent free pairs");
        }

        merges
    }

    /// Iterates over the current block layout in address order.
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            walk: unsafe { Blocks::new(self.first_block) },
            _heap: PhantomData,
        }
    }

    /// Current used/free totals, measured in payload capacity.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats { used: 0, free: 0 };

        for info in self.blocks() {
            if info.is_free {
                stats.free += info.payload_size();
            } else {
                stats.used += info.payload_size();
            }
        }

        stats
    }

    /// Writes the [`fmt::Display`] dump to stdout and flushes it. Never
    /// mutates state.
    pub fn display(&self) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "{self}");
        let _ = stdout.flush();
    }

    /// Best-fit selection. Considers free blocks of at least `needed` bytes
    /// and picks the smallest, ties broken by address order because the walk
    /// runs lowest address first. A block of exactly `total` bytes cannot be
    /// beaten, so selection stops there.
    fn find_best_fit(&self, needed: usize, total: usize) -> Pointer<Header> {
        let mut best: Pointer<Header> = None;
        let mut best_size = usize::MAX;

        for block in unsafe { Blocks::new(self.first_block) } {
            let header = unsafe { *block.as_ref() };

            if !header.is_allocated() && header.size() >= needed && header.size() < best_size {
                best = Some(block);
                best_size = header.size();

                if best_size == total {
                    break;
                }
            }
        }

        best
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-^82}", " Memory Block ")?;
        writeln!(
            f,
            "{:<5} {:<8} {:<9} {:<18} {:<18} {:>6}",
            "No.", "Current", "Previous", "Begin", "End", "Size"
        )?;
        writeln!(f, "{:-<82}", "")?;

        for (index, info) in self.blocks().enumerate() {
            let status = |free| if free { "FREE" } else { "ALLOC" };
            writeln!(
                f,
                "{:<5} {:<8} {:<9} {:<#18x} {:<#18x} {:>6}",
                index + 1,
                status(info.is_free),
                status(info.prev_is_free),
                info.address,
                info.end_address(),
                info.size
            )?;
        }

        writeln!(f, "{:-<82}", "")?;

        let stats = self.stats();
        writeln!(f, "Used size  = {:>6}", stats.used)?;
        writeln!(f, "Free size  = {:>6}", stats.free)?;
        writeln!(f, "Total size = {:>6}", stats.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: usize = 4096;

    fn new_heap() -> Heap {
        Heap::with_region_size(REGION).unwrap()
    }

    /// Checks everything that must hold at any quiescent point: the walk
    /// covers the interior exactly, sizes are positive multiples of 8,
    /// blocks are contiguous, p-bits mirror the predecessor's status and
    /// free blocks carry a footer matching their header.
    fn check_invariants(heap: &Heap) {
        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert!(!blocks.is_empty());

        let covered: usize = blocks.iter().map(|info| info.size).sum();
        assert_eq!(covered, heap.usable_size());

        // The first block never consults a predecessor.
        assert!(!blocks[0].prev_is_free);

        let mut prev: Option<&BlockInfo> = None;
        for info in &blocks {
            assert!(info.size >= MIN_BLOCK_SIZE);
            assert_eq!(info.size % ALIGNMENT, 0);

            if let Some(prev) = prev {
                assert_eq!(prev.address + prev.size, info.address);
                assert_eq!(info.prev_is_free, prev.is_free);
            }

            if info.is_free {
                assert_eq!(info.footer_size, Some(info.size));
            } else {
                assert_eq!(info.footer_size, None);
            }

            prev = Some(info);
        }
    }

    fn assert_no_adjacent_free_blocks(heap: &Heap) {
        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        for pair in blocks.windows(2) {
            assert!(!(pair[0].is_free && pair[1].is_free));
        }
    }

    #[test]
    fn initial_heap_is_one_free_block() {
        let heap = new_heap();
        let u = heap.usable_size();

        assert!(u >= REGION - 8);
        assert_eq!(u % ALIGNMENT, 0);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, u);
        assert!(blocks[0].is_free);
        assert!(!blocks[0].prev_is_free);

        assert_eq!(heap.stats(), HeapStats { used: 0, free: u - 4 });
        check_invariants(&heap);
    }

    #[test]
    fn exact_fit_consumes_the_whole_heap() {
        // With a 4096 byte page this is scenario `alloc(4084)`: round8(4084
        // + 4) = 4088 = U, remainder 0, no split.
        let mut heap = new_heap();
        let u = heap.usable_size();

        let payload = heap.allocate(u - 4).unwrap();
        assert_eq!(payload.len(), u - 4);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, u);
        assert!(!blocks[0].is_free);

        assert_eq!(heap.stats(), HeapStats { used: u - 4, free: 0 });

        // Nothing left.
        assert!(heap.allocate(1).is_none());
        check_invariants(&heap);
    }

    #[test]
    fn small_allocation_splits_the_free_block() {
        let mut heap = new_heap();
        let u = heap.usable_size();

        // round8(16 + 4) = 24 allocated, the rest split off free.
        let payload = heap.allocate(16).unwrap();
        assert_eq!(payload.len(), 20);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].size, 24);
        assert!(!blocks[0].is_free);
        assert_eq!(blocks[1].size, u - 24);
        assert!(blocks[1].is_free);
        assert!(!blocks[1].prev_is_free);

        check_invariants(&heap);
    }

    #[test]
    fn requests_outside_bounds_fail() {
        let mut heap = new_heap();
        let u = heap.usable_size();

        assert!(heap.allocate(0).is_none());
        assert!(heap.allocate(u - 4 + 1).is_none());
        assert!(heap.allocate(usize::MAX).is_none());

        // No partial state change is observable.
        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_free);
    }

    #[test]
    fn zero_and_oversized_regions_are_rejected() {
        assert_eq!(
            Heap::with_region_size(0).err(),
            Some(InitError::InvalidSize)
        );
        assert_eq!(
            Heap::with_region_size(usize::MAX).err(),
            Some(InitError::InvalidSize)
        );
    }

    #[test]
    fn best_fit_prefers_the_lowest_address_on_ties() {
        let mut heap = new_heap();

        let a = heap.allocate(16).unwrap().cast::<u8>();
        let _b = heap.allocate(32).unwrap();
        let c = heap.allocate(16).unwrap().cast::<u8>();

        unsafe {
            heap.deallocate(a).unwrap();
            heap.deallocate(c).unwrap();
        }

        // Both holes are 24 bytes; the tie goes to `a`'s, the lower address.
        // The hole is also an exact fit, so selection short-circuits there.
        let d = heap.allocate(16).unwrap().cast::<u8>();
        assert_eq!(d, a);

        check_invariants(&heap);
    }

    #[test]
    fn allocation_across_holes_fails_until_coalesce() {
        let mut heap = new_heap();
        let u = heap.usable_size();

        let a = heap.allocate(16).unwrap().cast::<u8>();
        let b = heap.allocate(32).unwrap().cast::<u8>();
        let c = heap.allocate(16).unwrap().cast::<u8>();

        unsafe {
            heap.deallocate(a).unwrap();
            heap.deallocate(c).unwrap();
            heap.deallocate(b).unwrap();
        }

        // Free holes: 24, 40, 24 and the trailing block of u - 88 bytes.
        // A request bigger than the trailing block must fail even though
        // the heap as a whole could hold it.
        let request = u - 84;
        assert!(heap.allocate(request).is_none());

        // Three pair merges collapse everything into one block again.
        assert_eq!(heap.coalesce(), 3);
        assert_no_adjacent_free_blocks(&heap);
        check_invariants(&heap);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, u);

        assert!(heap.allocate(request).is_some());
        check_invariants(&heap);
    }

    #[test]
    fn double_free_is_rejected_without_state_change() {
        let mut heap = new_heap();

        let payload = heap.allocate(16).unwrap().cast::<u8>();
        unsafe { heap.deallocate(payload).unwrap() };

        let snapshot: Vec<BlockInfo> = heap.blocks().collect();

        assert_eq!(unsafe { heap.deallocate(payload) }, Err(FreeError));
        assert_eq!(heap.blocks().collect::<Vec<BlockInfo>>(), snapshot);
    }

    #[test]
    fn invalid_pointers_are_rejected() {
        let mut heap = new_heap();

        let payload = heap.allocate(16).unwrap().cast::<u8>();

        unsafe {
            // Misaligned.
            let skewed = NonNull::new_unchecked(payload.as_ptr().add(1));
            assert_eq!(heap.deallocate(skewed), Err(FreeError));

            // Below the first header.
            let below = NonNull::new_unchecked(payload.as_ptr().wrapping_sub(64));
            assert_eq!(heap.deallocate(below), Err(FreeError));

            // Aligned and in range, but pointing into the middle of a
            // payload: the preceding word is zero-filled mapping content,
            // not an allocated header.
            let interior = NonNull::new_unchecked(payload.as_ptr().add(8));
            assert_eq!(heap.deallocate(interior), Err(FreeError));

            // The heap is still intact and the real pointer still works.
            heap.deallocate(payload).unwrap();
        }

        check_invariants(&heap);
    }

    #[test]
    fn free_then_coalesce_restores_the_initial_state() {
        let mut heap = new_heap();
        let u = heap.usable_size();

        for size in [1, 8, 16, 100, u - 4] {
            let payload = heap.allocate(size).unwrap().cast::<u8>();
            unsafe { heap.deallocate(payload).unwrap() };
            heap.coalesce();

            let blocks: Vec<BlockInfo> = heap.blocks().collect();
            assert_eq!(blocks.len(), 1, "size {size} didn't restore the heap");
            assert_eq!(blocks[0].size, u);
            assert!(blocks[0].is_free);
            check_invariants(&heap);
        }
    }

    #[test]
    fn display_lists_every_block_and_the_totals() {
        let mut heap = new_heap();
        heap.allocate(16).unwrap();

        let dump = format!("{heap}");

        assert!(dump.contains("Memory Block"));
        assert!(dump.contains("ALLOC"));
        assert!(dump.contains("FREE"));
        assert!(dump.contains(&format!("Used size  = {:>6}", heap.stats().used)));
        assert!(dump.contains(&format!("Free size  = {:>6}", heap.stats().free)));
        assert!(dump.contains("Total size ="));
        assert_eq!(heap.stats().used, 20);

        // Header rows, one row per block, separator and three total lines.
        assert_eq!(dump.lines().count(), 3 + heap.blocks().count() + 1 + 3);
    }

    #[test]
    fn random_operations_preserve_every_invariant() {
        for seed in [42, 69, 1234, 0xDEAD] {
            let mut rng = fastrand::Rng::with_seed(seed);
            let mut heap = new_heap();
            let u = heap.usable_size();
            let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

            for _ in 0..500 {
                match rng.u32(0..10) {
                    // Allocate, usually small, occasionally huge.
                    0..=5 => {
                        let size = if rng.u32(0..20) == 0 {
                            rng.usize(1..=u)
                        } else {
                            rng.usize(1..=512)
                        };

                        if let Some(payload) = heap.allocate(size) {
                            let address = payload.cast::<u8>();
                            let capacity = payload.len();

                            assert!(capacity >= size);
                            assert_eq!(address.as_ptr() as usize % ALIGNMENT, 0);

                            // Payloads of live allocations never overlap.
                            let start = address.as_ptr() as usize;
                            for (other, other_capacity) in &live {
                                let other_start = other.as_ptr() as usize;
                                assert!(
                                    start + capacity <= other_start
                                        || other_start + other_capacity <= start
                                );
                            }

                            live.push((address, capacity));
                        }
                    }
                    // Free a random live allocation.
                    6..=8 => {
                        if !live.is_empty() {
                            let (payload, _) = live.swap_remove(rng.usize(..live.len()));
                            unsafe { heap.deallocate(payload).unwrap() };
                        }
                    }
                    // Batch merge.
                    _ => {
                        heap.coalesce();
                        assert_no_adjacent_free_blocks(&heap);
                    }
                }

                check_invariants(&heap);
            }

            // Draining everything always returns the heap to one free block.
            for (payload, _) in live.drain(..) {
                unsafe { heap.deallocate(payload).unwrap() };
            }
            heap.coalesce();

            let blocks: Vec<BlockInfo> = heap.blocks().collect();
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].size, u);
            assert!(blocks[0].is_free);
        }
    }
}
