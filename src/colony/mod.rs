//! Colony - bucketed, stable-address slot pool
//!
//! Design: Three-layer architecture:
//! 1. Occupancy bitmaps (fast path, reuse the lowest free slot)
//! 2. Bucket growth (slow path, append a doubled mapping)
//! 3. Page source (rare, one mapping call per bucket)
//!
//! Buckets are append-only and never move, so a slot address handed out by
//! [`Colony::emplace`] stays valid until that same address is erased. The
//! registry of live slots is ordered by bucket, then address, and is only
//! touched while holding the pool lock. Visit callbacks run under that lock
//! too, so they must not call back into the same pool: doing so deadlocks.

mod bucket;
pub mod pages;


use core::alloc::Layout;
use core::ptr::NonNull;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ColonyConfig;
use crate::error::ColonyError;
use crate::logging::{log_bucket_mapped, log_bucket_released, log_pool_dropped_live, log_pool_exhausted};
use bucket::Bucket;
pub use pages::{HeapPages, PageBudget, PageSource, SystemPages};

/// Fixed-layout slot pool
pub struct Colony {
    slot: Layout,
    config: ColonyConfig,
    pages: Arc<dyn PageSource>,
    registry: Mutex<Registry>,
}

// Safety: bucket memory is only reached through the registry lock, and the
// pool never dereferences slot contents itself
unsafe impl Send for Colony {}
unsafe impl Sync for Colony {}

/// Live-slot bookkeeping, guarded by the pool lock
struct Registry {
    buckets: Vec<Bucket>,
    /// Bucket start address -> bucket index
    by_address: BTreeMap<usize, usize>,
    live: usize,
    /// No bucket below this index has a free slot
    free_hint: usize,
}

impl Registry {
    fn new() -> Self {
        Self {
            buckets: Vec::new(),
            by_address: BTreeMap::new(),
            live: 0,
            free_hint: 0,
        }
    }

    fn push(&mut self, bucket: Bucket) {
        self.by_address.insert(bucket.start_addr(), self.buckets.len());
        self.buckets.push(bucket);
    }

    /// Bucket and slot index owning `addr`
    fn locate(&self, addr: usize) -> Option<(usize, usize)> {
        let (_, &bucket_index) = self.by_address.range(..=addr).next_back()?;
        let slot_index = self.buckets[bucket_index].slot_index(addr)?;
        Some((bucket_index, slot_index))
    }

    /// Like `locate`, but only for currently occupied slots
    fn locate_live(&self, addr: usize) -> Option<(usize, usize)> {
        let (bucket_index, slot_index) = self.locate(addr)?;
        self.buckets[bucket_index]
            .is_occupied(slot_index)
            .then_some((bucket_index, slot_index))
    }

    /// Reuse a free slot in an existing bucket, oldest bucket first
    fn claim_existing(&mut self) -> Option<NonNull<u8>> {
        while self.free_hint < self.buckets.len() {
            if let Some(ptr) = self.buckets[self.free_hint].claim() {
                self.live += 1;
                return Some(ptr);
            }
            self.free_hint += 1;
        }
        None
    }

    fn release(&mut self, bucket_index: usize, slot_index: usize) {
        let released = self.buckets[bucket_index].release(slot_index);
        debug_assert!(released, "released a slot that was not occupied");
        self.live -= 1;
        self.free_hint = self.free_hint.min(bucket_index);
    }
}

impl Colony {
    /// Create a pool of `size`-byte slots aligned to `align`, backed by OS
    /// pages and the default configuration.
    pub fn new(align: usize, size: usize) -> Result<Self, ColonyError> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| ColonyError::InvalidAlignment { align })?;
        Self::with_config(layout, ColonyConfig::default(), SystemPages::shared())
    }

    /// Create a pool with an explicit configuration and page source.
    ///
    /// Maps the first bucket before returning.
    pub fn with_config(
        slot: Layout,
        config: ColonyConfig,
        pages: Arc<dyn PageSource>,
    ) -> Result<Self, ColonyError> {
        let (align, size) = (slot.align(), slot.size());
        if !align.is_power_of_two() {
            return Err(ColonyError::InvalidAlignment { align });
        }
        if size == 0 || size % align != 0 {
            return Err(ColonyError::InvalidSize { size, align });
        }
        let page_size = pages.page_size();
        if size >= page_size {
            return Err(ColonyError::SlotTooLarge { size, page_size });
        }
        config.validate()?;

        let colony = Self {
            slot,
            config,
            pages,
            registry: Mutex::new(Registry::new()),
        };

        let first = colony
            .map_bucket(0)
            .ok_or(ColonyError::OutOfMemory { requested: page_size })?;
        colony.registry.lock().push(first);

        Ok(colony)
    }

    /// Bytes mapped for the bucket at `index`, doubling up to the growth cap
    #[inline]
    fn bucket_len(&self, index: usize) -> Option<usize> {
        self.pages.page_size().checked_mul(self.config.bucket_pages(index))
    }

    fn map_bucket(&self, index: usize) -> Option<Bucket> {
        let len = self.bucket_len(index)?;
        let bucket = Bucket::map(&self.pages, len, self.slot.size())?;
        log_bucket_mapped(index, len, bucket.capacity());
        Some(bucket)
    }

    /// Reserve one slot and register it as live.
    ///
    /// Returns `None` when the bucket ceiling is reached or the page source
    /// cannot map another bucket. The slot's contents are uninitialized.
    pub fn emplace(&self) -> Option<NonNull<u8>> {
        self.emplace_with(|_| {})
    }

    /// Like [`Colony::emplace`], but runs `init` on the new slot before the
    /// pool lock is released, so no other caller can observe it unprepared.
    pub fn emplace_with<F>(&self, init: F) -> Option<NonNull<u8>>
    where
        F: FnOnce(NonNull<u8>),
    {
        let mut registry = self.registry.lock();

        let ptr = match registry.claim_existing() {
            Some(ptr) => ptr,
            None => {
                let index = registry.buckets.len();
                let bucket = if index < self.config.max_buckets {
                    self.map_bucket(index)
                } else {
                    None
                };
                let Some(bucket) = bucket else {
                    log_pool_exhausted(index, self.slot.size());
                    return None;
                };
                registry.push(bucket);
                registry.claim_existing()?
            }
        };

        init(ptr);
        Some(ptr)
    }

    /// Unregister `ptr` without running any finalizer.
    ///
    /// Returns false if `ptr` is not a live slot of this pool.
    pub fn erase(&self, ptr: *const u8) -> bool {
        let mut registry = self.registry.lock();
        match registry.locate_live(ptr as usize) {
            Some((bucket_index, slot_index)) => {
                registry.release(bucket_index, slot_index);
                true
            }
            None => false,
        }
    }

    /// Run `visit` on a live slot, then unregister it, all under the pool lock.
    ///
    /// The slot cannot be handed out again while `visit` runs. Returns false,
    /// without calling `visit`, if `ptr` is not a live slot of this pool.
    pub fn view_erase<F>(&self, ptr: *const u8, visit: F) -> bool
    where
        F: FnOnce(NonNull<u8>),
    {
        self.erase_if(ptr, |slot| {
            visit(slot);
            true
        })
    }

    /// Run `visit` on a live slot under the pool lock and unregister the slot
    /// only if `visit` returns true.
    pub fn erase_if<F>(&self, ptr: *const u8, visit: F) -> bool
    where
        F: FnOnce(NonNull<u8>) -> bool,
    {
        let mut registry = self.registry.lock();
        let Some((bucket_index, slot_index)) = registry.locate_live(ptr as usize) else {
            return false;
        };

        if !visit(registry.buckets[bucket_index].slot_ptr(slot_index)) {
            return false;
        }
        registry.release(bucket_index, slot_index);
        true
    }

    /// Run `inspect` on a live slot under the pool lock.
    ///
    /// Returns `None`, without calling `inspect`, if `ptr` is not live.
    pub fn with_live<F, R>(&self, ptr: *const u8, inspect: F) -> Option<R>
    where
        F: FnOnce(NonNull<u8>) -> R,
    {
        let registry = self.registry.lock();
        let (bucket_index, slot_index) = registry.locate_live(ptr as usize)?;
        Some(inspect(registry.buckets[bucket_index].slot_ptr(slot_index)))
    }

    /// True only for addresses currently registered as live.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.registry.lock().locate_live(ptr as usize).is_some()
    }

    /// Visit live slots in registry order until `visit` returns false.
    ///
    /// Returns the number of slots visited, including the one that stopped
    /// the walk.
    pub fn iterate<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(NonNull<u8>) -> bool,
    {
        let registry = self.registry.lock();
        let mut visited = 0;

        for bucket in &registry.buckets {
            for ptr in bucket.occupied() {
                visited += 1;
                if !visit(ptr) {
                    return visited;
                }
            }
        }

        visited
    }

    /// Visit every live slot in registry order and unregister those for
    /// which `keep` returns false. Returns the number unregistered.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(NonNull<u8>) -> bool,
    {
        let mut registry = self.registry.lock();
        let mut removed = 0;

        for bucket_index in 0..registry.buckets.len() {
            let occupied: Vec<usize> = registry.buckets[bucket_index].occupied_indices().collect();
            for slot_index in occupied {
                let slot = registry.buckets[bucket_index].slot_ptr(slot_index);
                if !keep(slot) {
                    registry.release(bucket_index, slot_index);
                    removed += 1;
                }
            }
        }

        removed
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.registry.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release trailing empty buckets, newest first, stopping at the first
    /// bucket that still holds a live slot. The first bucket is always kept.
    ///
    /// Returns true if any bucket was released.
    pub fn compact(&self) -> bool {
        let mut registry = self.registry.lock();
        let mut released = false;

        while registry.buckets.len() > 1 {
            let last = registry.buckets.len() - 1;
            if !registry.buckets[last].is_empty() {
                break;
            }
            if let Some(bucket) = registry.buckets.pop() {
                registry.by_address.remove(&bucket.start_addr());
                log_bucket_released(last, bucket.mapped_bytes());
                released = true;
            }
        }

        let bucket_count = registry.buckets.len();
        registry.free_hint = registry.free_hint.min(bucket_count);
        released
    }

    /// Snapshot of pool occupancy
    pub fn stats(&self) -> ColonyStats {
        let registry = self.registry.lock();
        ColonyStats {
            buckets: registry.buckets.len(),
            live: registry.live,
            capacity: registry.buckets.iter().map(Bucket::capacity).sum(),
            mapped_bytes: registry.buckets.iter().map(Bucket::mapped_bytes).sum(),
        }
    }

    /// Slot layout shared by every instance in this pool
    #[inline]
    pub fn layout(&self) -> Layout {
        self.slot
    }

    #[inline]
    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.pages.page_size()
    }
}

impl Drop for Colony {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        if registry.live > 0 {
            log_pool_dropped_live(registry.live);
        }
        for (index, bucket) in registry.buckets.iter().enumerate().rev() {
            debug_assert_eq!(bucket.live(), bucket.occupied().count());
            log_bucket_released(index, bucket.mapped_bytes());
        }
        // Buckets unmap themselves on drop
    }
}

impl std::fmt::Debug for Colony {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Colony")
            .field("slot", &self.slot)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColonyStats {
    pub buckets: usize,
    pub live: usize,
    /// Total slots across all buckets
    pub capacity: usize,
    pub mapped_bytes: usize,
}
