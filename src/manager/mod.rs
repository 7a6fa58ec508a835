//! Object manager - the sanctioned way to create, enumerate and destroy
//! instances of one concrete type
//!
//! Design: binds one type's dispatch table to one [`Colony`]:
//! - Creation stamps the header under the pool lock, then runs the optional
//!   initializer and the type's constructor outside it. Any failure (or a
//!   panic) rolls the slot back before the error is returned.
//! - Deletion finalizes under the pool lock, so the slot cannot be reused
//!   while its destructor runs.
//! - Iteration and deletion only ever see instances in the `Live` state.
//! - Dropping the manager finalizes whatever is still live.

#[cfg(test)]
mod tests;

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;
use std::sync::Arc;

use crate::colony::{Colony, ColonyStats, PageSource, SystemPages};
use crate::config::ColonyConfig;
use crate::error::{InstanceError, RuntimeError};
use crate::logging::{log_instance_rollback, log_manager_created, log_manager_destroyed};
use crate::object::{
    dispatch_table, DispatchTable, InstanceCell, InstanceState, Object, ObjectHeader, ObjectRef,
    RawObject, TypeDescriptor,
};

/// Per-type façade over a pool of `T` instances
pub struct ObjectManager<T: Object> {
    dispatch: &'static DispatchTable,
    colony: Colony,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object> ObjectManager<T> {
    /// Register `T` with the default pool configuration and OS pages
    pub fn new() -> Result<Self, RuntimeError> {
        Self::with_config(ColonyConfig::default(), SystemPages::shared())
    }

    /// Register `T` with an explicit pool configuration and page source
    pub fn with_config(config: ColonyConfig, pages: Arc<dyn PageSource>) -> Result<Self, RuntimeError> {
        Self::from_table(Some(dispatch_table::<T>()), config, pages)
    }

    /// Register from an already resolved dispatch table.
    ///
    /// Fails if the table is missing, belongs to another type, or describes
    /// a chain whose layouts do not nest. Nothing is allocated on failure.
    pub fn from_table(
        table: Option<&'static DispatchTable>,
        config: ColonyConfig,
        pages: Arc<dyn PageSource>,
    ) -> Result<Self, RuntimeError> {
        let dispatch = table.ok_or(RuntimeError::NullDispatch)?;
        if !dispatch.is::<T>() {
            return Err(RuntimeError::TypeMismatch {
                expected: T::NAME,
                found: dispatch.name(),
            });
        }
        check_embedding(dispatch)?;

        let colony = Colony::with_config(dispatch.descriptor().layout(), config, pages)?;
        log_manager_created(dispatch.name(), dispatch.depth(), dispatch.descriptor().size());

        Ok(Self {
            dispatch,
            colony,
            _marker: PhantomData,
        })
    }

    /// Create an instance from constructor arguments alone
    pub fn new_instance(&self, args: T::Args) -> Result<ObjectRef<T>, InstanceError> {
        self.create(None::<fn(&mut MaybeUninit<T>) -> bool>, args)
    }

    /// Create an instance, running `init` on the raw payload before the
    /// constructor. `init` returning false rolls the slot back.
    pub fn new_instance_with<F>(&self, init: F, args: T::Args) -> Result<ObjectRef<T>, InstanceError>
    where
        F: FnOnce(&mut MaybeUninit<T>) -> bool,
    {
        self.create(Some(init), args)
    }

    fn create<F>(&self, init: Option<F>, args: T::Args) -> Result<ObjectRef<T>, InstanceError>
    where
        F: FnOnce(&mut MaybeUninit<T>) -> bool,
    {
        let dispatch = self.dispatch;
        let slot = self
            .colony
            .emplace_with(|slot| unsafe { ObjectHeader::stamp(slot, dispatch) })
            .ok_or(InstanceError::Exhausted)?;

        let mut rollback = Rollback::<T> {
            colony: &self.colony,
            slot,
            reason: "init",
            armed: true,
            _marker: PhantomData,
        };

        // Safety: the slot was emplaced for InstanceCell<T> and is ours until
        // it reaches Live
        let value = unsafe { InstanceCell::<T>::value_slot(slot) };

        if let Some(init) = init {
            if !init(&mut *value) {
                return Err(InstanceError::InitFailed);
            }
        }

        unsafe { ObjectHeader::from_slot(slot) }.set_state(InstanceState::Constructing);
        rollback.reason = "construct";
        if !T::construct(value, args) {
            return Err(InstanceError::ConstructFailed);
        }

        // The constructor only saw the payload, but never trust the header
        let header = unsafe { ObjectHeader::from_slot(slot) };
        header.restamp(dispatch);
        header.set_state(InstanceState::Live);
        rollback.armed = false;

        Ok(unsafe { ObjectRef::from_slot(slot) })
    }

    /// Finalize and free `obj`.
    ///
    /// Returns false if `obj` is not a live instance of this manager. The
    /// destructor runs exactly once, under the pool lock.
    pub fn delete_instance(&self, obj: ObjectRef<T>) -> bool {
        self.colony.erase_if(obj.as_ptr(), |slot| unsafe { finalize_live(slot) })
    }

    /// True if `obj` is a live instance of this manager
    pub fn contains(&self, obj: ObjectRef<T>) -> bool {
        self.contains_raw(obj.as_ptr())
    }

    /// True if `ptr` is the address of a live instance of this manager
    pub fn contains_raw(&self, ptr: *const u8) -> bool {
        self.colony
            .with_live(ptr, |slot| unsafe { is_live(slot) })
            .unwrap_or(false)
    }

    /// Typed handle for an untyped one, if it is a live instance here
    pub fn resolve(&self, raw: RawObject) -> Option<ObjectRef<T>> {
        self.contains_raw(raw.as_ptr())
            .then(|| unsafe { ObjectRef::from_slot(NonNull::new_unchecked(raw.as_ptr())) })
    }

    /// Visit live instances in pool order until `visit` returns false.
    ///
    /// Returns the number of instances visited. `visit` runs under the pool
    /// lock and must not call back into this manager.
    pub fn iterate<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(ObjectRef<T>, &mut T) -> bool,
    {
        let mut visited = 0;
        self.colony.iterate(|slot| unsafe {
            if !is_live(slot) {
                return true;
            }
            visited += 1;
            let obj = ObjectRef::<T>::from_slot(slot);
            visit(obj, obj.get_mut())
        });
        visited
    }

    /// Finalize every live instance, keeping the manager usable.
    ///
    /// Returns the number of instances finalized.
    pub fn clear(&self) -> usize {
        self.colony.retain(|slot| unsafe { !finalize_live(slot) })
    }

    /// Finalize every live instance and release the pool.
    ///
    /// Returns the number of instances finalized.
    pub fn destroy(mut self) -> usize {
        self.teardown()
    }

    fn teardown(&mut self) -> usize {
        let finalized = self.clear();
        log_manager_destroyed(self.dispatch.name(), finalized);
        finalized
    }

    /// Number of live instances; same count as a full [`iterate`](Self::iterate)
    pub fn len(&self) -> usize {
        let mut live = 0;
        self.colony.iterate(|slot| {
            live += usize::from(unsafe { is_live(slot) });
            true
        });
        live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release trailing empty buckets
    pub fn compact(&self) -> bool {
        self.colony.compact()
    }

    pub fn stats(&self) -> ColonyStats {
        self.colony.stats()
    }

    #[inline]
    pub fn dispatch(&self) -> &'static DispatchTable {
        self.dispatch
    }

    #[inline]
    pub fn descriptor(&self) -> &'static TypeDescriptor {
        self.dispatch.descriptor()
    }

    /// Slot layout: header plus payload
    #[inline]
    pub fn layout(&self) -> Layout {
        self.colony.layout()
    }
}

impl<T: Object> Drop for ObjectManager<T> {
    fn drop(&mut self) {
        if !self.colony.is_empty() {
            self.teardown();
        }
    }
}

impl<T: Object> std::fmt::Debug for ObjectManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("dispatch", self.dispatch)
            .field("colony", &self.colony)
            .finish()
    }
}

/// Returns a reserved slot to the pool unless disarmed
struct Rollback<'a, T: Object> {
    colony: &'a Colony,
    slot: NonNull<u8>,
    reason: &'static str,
    armed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object> Drop for Rollback<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        unsafe { ObjectHeader::from_slot(self.slot) }.set_state(InstanceState::Freed);
        self.colony.erase(self.slot.as_ptr());
        log_instance_rollback(T::NAME, self.reason);
    }
}

/// # Safety
/// `slot` must hold a stamped header.
#[inline]
unsafe fn is_live(slot: NonNull<u8>) -> bool {
    ObjectHeader::from_slot(slot).state() == InstanceState::Live
}

/// Finalize `slot` if its instance is live; returns whether it did.
///
/// # Safety
/// `slot` must hold a stamped header and the pool lock must be held.
unsafe fn finalize_live(slot: NonNull<u8>) -> bool {
    if !is_live(slot) {
        return false;
    }
    ObjectHeader::finalize_in_place(slot);
    true
}

/// Every level of the chain must start with its base's layout
fn check_embedding(dispatch: &DispatchTable) -> Result<(), RuntimeError> {
    for (derived, base) in dispatch.lineage().zip(dispatch.ancestors()) {
        let outer = derived.descriptor().payload_layout();
        let inner = base.descriptor().payload_layout();
        if inner.size() > outer.size() || inner.align() > outer.align() {
            return Err(RuntimeError::InvalidLayout {
                ty: derived.name(),
                base: base.name(),
            });
        }
    }
    Ok(())
}
