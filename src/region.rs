use std::ptr::NonNull;

use crate::{
    align::align_up,
    block::ALIGNMENT,
    platform::{self, page_size},
};

/// Largest region size accepted by the initializer. Block sizes are stored
/// in 32 bit header words, so the usable interior has to fit that field.
pub(crate) const MAX_REGION_SIZE: usize = (u32::MAX & !(ALIGNMENT as u32 - 1)) as usize;

/// One page-aligned memory mapping obtained from the kernel. The allocator
/// acquires exactly one of these at initialization and keeps it for the
/// lifetime of the [`crate::Heap`] that owns it.
pub(crate) struct MappedRegion {
    address: NonNull<u8>,
    length: usize,
}

impl MappedRegion {
    /// Requests a zero-filled mapping of `length` bytes, which must be a
    /// multiple of the page size. Returns `None` if the kernel refuses.
    pub fn request(length: usize) -> Option<Self> {
        let address = unsafe { platform::request_memory(length)? };

        Some(Self { address, length })
    }

    /// Base address of the mapping. Page-aligned.
    #[inline]
    pub fn address(&self) -> NonNull<u8> {
        self.address
    }

    /// Total length of the mapping in bytes.
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe { platform::return_memory(self.address, self.length) };
    }
}

/// Calculates the length we should request from the kernel if the caller
/// asked for a heap of `region_size` bytes: the next page multiple. If the
/// requested size is already a page multiple nothing is added; the block
/// layout overhead (end sentinel and leading pad) comes out of the rounded
/// size, not on top of it.
pub(crate) fn determine_region_length(region_size: usize) -> usize {
    align_up(region_size, page_size())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_length_is_a_page_multiple() {
        let page = page_size();

        assert_eq!(determine_region_length(1), page);
        assert_eq!(determine_region_length(page / 2), page);
        assert_eq!(determine_region_length(page), page);
        assert_eq!(determine_region_length(page + 1), page * 2);

        for i in 1..=100 {
            assert_eq!(determine_region_length(page * i), page * i);
        }
    }

    #[test]
    fn max_region_size_fits_the_header_size_field() {
        assert_eq!(MAX_REGION_SIZE % ALIGNMENT, 0);
        assert!(MAX_REGION_SIZE <= u32::MAX as usize);
    }

    #[test]
    fn mapping_round_trip() {
        let length = determine_region_length(1);
        let region = MappedRegion::request(length).unwrap();

        assert_eq!(region.length(), length);
        assert_eq!(region.address().as_ptr() as usize % page_size(), 0);

        // Anonymous mappings are zero-filled.
        unsafe {
            for offset in [0, length / 2, length - 1] {
                assert_eq!(*region.address().as_ptr().add(offset), 0);
            }
        }
    }
}
