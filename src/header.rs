use std::ptr::NonNull;

use crate::block::HEADER_SIZE;

/// Packed boundary tag word. Every block in the region begins with one of
/// these, and free blocks carry a second one (the footer) at their end.
///
/// ```text
///  31                            3   2   1   0
/// +--------------------------------+---+---+---+
/// |            size                | 0 | p | a |
/// +--------------------------------+---+---+---+
/// ```
///
/// The block size is always a multiple of 8, so its low 3 bits are zero and
/// two of them are reused for flags:
///
/// - Bit 0 (a-bit): 0 if this block is free, 1 if it is allocated.
/// - Bit 1 (p-bit): 0 if the block immediately before this one in address
///   order is free, 1 if it is allocated.
///
/// The footer of a free block stores the size only, flag bits zero. The
/// implicit block list is terminated by the [`Header::END`] word, which is
/// never a valid header because no block can have size 0.
///
/// Examples, for a 24 byte block:
///
/// - Allocated, previous allocated: word is `24 + 2 + 1 = 27`.
/// - Allocated, previous free: word is `24 + 1 = 25`.
/// - Free, previous allocated: word is `24 + 2 = 26`, footer is `24`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct Header(u32);

/// a-bit mask.
const ALLOCATED: u32 = 1;

/// p-bit mask.
const PREV_ALLOCATED: u32 = 1 << 1;

/// The size field occupies the remaining bits.
const SIZE_MASK: u32 = !(ALLOCATED | PREV_ALLOCATED | 1 << 2);

impl Header {
    /// The word that terminates the implicit block list.
    pub const END: Self = Header(1);

    /// Builds the header word for a block of `size` bytes. `size` must be a
    /// multiple of 8, which the caller guarantees by rounding through
    /// [`crate::align::align`].
    pub fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        debug_assert_eq!(size & !(SIZE_MASK as usize), 0);

        let mut word = size as u32;
        if allocated {
            word |= ALLOCATED;
        }
        if prev_allocated {
            word |= PREV_ALLOCATED;
        }

        Header(word)
    }

    /// Footer word for a free block of `size` bytes. Size only, flags zero.
    pub fn footer(size: usize) -> Self {
        Header::new(size, false, false)
    }

    /// Total block size in bytes, header included (and footer, if free).
    #[inline]
    pub fn size(&self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    /// Whether the a-bit is set.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.0 & ALLOCATED != 0
    }

    /// Whether the p-bit is set.
    #[inline]
    pub fn prev_allocated(&self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    /// Whether this word is the end sentinel rather than a block header.
    #[inline]
    pub fn is_end_sentinel(&self) -> bool {
        self.0 == Self::END.0
    }

    /// Flips the p-bit while leaving size and a-bit untouched.
    #[inline]
    pub fn set_prev_allocated(&mut self, prev_allocated: bool) {
        if prev_allocated {
            self.0 |= PREV_ALLOCATED;
        } else {
            self.0 &= !PREV_ALLOCATED;
        }
    }

    /// Returns a pointer to the [`Header`] of the block whose payload begins
    /// at `payload`.
    ///
    /// ```text
    /// +-------------+
    /// |   Header    | <- Returned address points here.
    /// +-------------+
    /// |   Payload   | <- Given address should point here.
    /// +-------------+
    /// |     ...     |
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// Caller must guarantee that `payload` points exactly to the first byte
    /// after a [`Header`]. This function is mostly used when freeing memory,
    /// so the allocator user should give us an address that we previously
    /// handed out. As long as that's true, this is safe.
    #[inline]
    pub unsafe fn from_payload_address(payload: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE).cast())
    }

    /// Returns the address right after the header, where the payload begins.
    ///
    /// # Safety
    ///
    /// If `header` points to a valid [`Header`] inside the region, the
    /// returned address is safe to use as long as no more than
    /// `size - HEADER_SIZE` bytes are written through it.
    #[inline]
    pub unsafe fn payload_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().cast::<u8>().add(HEADER_SIZE))
    }
}
