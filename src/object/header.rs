//! Instance layout - header stamped at the start of every slot
//!
//! Design: every slot holds `{ ObjectHeader, payload }` in C layout. The
//! header names the most-derived dispatch table and tracks the instance
//! lifecycle, so untyped code can always find the right finalizer.

use core::mem::MaybeUninit;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use super::dispatch::DispatchTable;

/// Lifecycle of one slot's instance
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Slot reserved, header stamped, payload untouched
    Uninitialized = 0,
    /// Initializer done, constructor running
    Constructing = 1,
    /// Constructed and registered
    Live = 2,
    /// Finalizer running under the pool lock
    Finalizing = 3,
    /// Slot returned to the pool
    Freed = 4,
}

impl InstanceState {
    #[inline]
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Constructing,
            2 => Self::Live,
            3 => Self::Finalizing,
            _ => Self::Freed,
        }
    }
}

/// Object header - first field of every slot
#[repr(C)]
pub struct ObjectHeader {
    dispatch: AtomicPtr<DispatchTable>,
    state: AtomicU32,
}

impl ObjectHeader {
    #[inline]
    pub const fn new(dispatch: &'static DispatchTable) -> Self {
        Self {
            dispatch: AtomicPtr::new(dispatch as *const DispatchTable as *mut DispatchTable),
            state: AtomicU32::new(InstanceState::Uninitialized as u32),
        }
    }

    /// Write a fresh header at the start of `slot`
    ///
    /// # Safety
    /// `slot` must be valid for writes of a whole header and suitably aligned.
    #[inline]
    pub unsafe fn stamp(slot: NonNull<u8>, dispatch: &'static DispatchTable) {
        slot.cast::<ObjectHeader>().as_ptr().write(Self::new(dispatch));
    }

    /// Overwrite only the dispatch reference, keeping the state
    #[inline]
    pub fn restamp(&self, dispatch: &'static DispatchTable) {
        self.dispatch.store(
            dispatch as *const DispatchTable as *mut DispatchTable,
            Ordering::Release,
        );
    }

    /// Header at the start of `slot`
    ///
    /// # Safety
    /// `slot` must hold a header written by [`ObjectHeader::stamp`] that
    /// outlives `'a`.
    #[inline]
    pub unsafe fn from_slot<'a>(slot: NonNull<u8>) -> &'a ObjectHeader {
        &*slot.cast::<ObjectHeader>().as_ptr()
    }

    /// Dispatch table of the most-derived type
    #[inline]
    pub fn dispatch(&self) -> &'static DispatchTable {
        // Only ever holds leaked `&'static` tables
        unsafe { &*self.dispatch.load(Ordering::Acquire) }
    }

    #[inline]
    pub fn state(&self) -> InstanceState {
        InstanceState::from_u32(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: InstanceState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Finalize the payload through the stored dispatch table
    ///
    /// # Safety
    /// `slot` must hold a live instance of the type its header names; the
    /// payload must not be used afterwards.
    pub unsafe fn finalize_in_place(slot: NonNull<u8>) {
        let header = Self::from_slot(slot);
        header.set_state(InstanceState::Finalizing);
        (header.dispatch().finalizer())(slot);
        header.set_state(InstanceState::Freed);
    }
}

/// Full slot contents for payload type `T`
#[repr(C)]
pub(crate) struct InstanceCell<T> {
    pub header: ObjectHeader,
    pub value: MaybeUninit<T>,
}

impl<T> InstanceCell<T> {
    /// Payload storage inside `slot`
    ///
    /// # Safety
    /// `slot` must be a slot sized and aligned for `InstanceCell<T>` and
    /// valid for `'a`.
    #[inline]
    pub unsafe fn value_slot<'a>(slot: NonNull<u8>) -> &'a mut MaybeUninit<T> {
        let cell = slot.cast::<InstanceCell<T>>().as_ptr();
        &mut *core::ptr::addr_of_mut!((*cell).value)
    }
}
