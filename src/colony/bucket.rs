//! Buckets - fixed-capacity runs of slots inside one page mapping
//!
//! Design: a bucket is mapped once with its final size and never moves,
//! which is what keeps every slot address stable for the life of the pool.
//! Occupancy is one bit per slot, so slot order inside the bitmap is address
//! order.

use core::ptr::NonNull;
use std::sync::Arc;

use bitvec::prelude::*;

use super::pages::PageSource;

/// One mapped region carved into equally sized slots
pub(super) struct Bucket {
    start: NonNull<u8>,
    /// Bytes mapped (whole pages)
    len: usize,
    slot_size: usize,
    occupied: BitVec,
    live: usize,
    pages: Arc<dyn PageSource>,
}

impl Bucket {
    /// Map `len` bytes from `pages` and carve them into `slot_size` slots
    pub fn map(pages: &Arc<dyn PageSource>, len: usize, slot_size: usize) -> Option<Self> {
        debug_assert!(slot_size > 0 && slot_size <= len);

        let start = pages.map(len)?;
        Some(Self {
            start,
            len,
            slot_size,
            occupied: BitVec::repeat(false, len / slot_size),
            live: 0,
            pages: Arc::clone(pages),
        })
    }

    #[inline]
    pub fn start_addr(&self) -> usize {
        self.start.as_ptr() as usize
    }

    /// Bytes mapped for this bucket
    #[inline]
    pub fn mapped_bytes(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.occupied.len()
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slot index for `addr`, if it lies on a slot boundary inside this bucket
    #[inline]
    pub fn slot_index(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.start_addr())?;
        if offset % self.slot_size != 0 {
            return None;
        }
        let index = offset / self.slot_size;
        (index < self.capacity()).then_some(index)
    }

    #[inline]
    pub fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.capacity());
        // In bounds of the mapping, so never null
        unsafe { NonNull::new_unchecked(self.start.as_ptr().add(index * self.slot_size)) }
    }

    #[inline]
    pub fn is_occupied(&self, index: usize) -> bool {
        index < self.capacity() && self.occupied[index]
    }

    /// Occupy the lowest free slot
    pub fn claim(&mut self) -> Option<NonNull<u8>> {
        let index = self.occupied.first_zero()?;
        self.occupied.set(index, true);
        self.live += 1;
        Some(self.slot_ptr(index))
    }

    /// Free slot `index`; false if it was not occupied
    pub fn release(&mut self, index: usize) -> bool {
        if !self.is_occupied(index) {
            return false;
        }
        self.occupied.set(index, false);
        self.live -= 1;
        true
    }

    /// Occupied slot indices in address order
    pub fn occupied_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.occupied.iter_ones()
    }

    /// Occupied slots in address order
    pub fn occupied(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.occupied_indices().map(move |index| self.slot_ptr(index))
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        unsafe {
            self.pages.unmap(self.start, self.len);
        }
    }
}
