//! Object model - dispatch tables, embedding and instance handles
//!
//! Design: single-chain inheritance expressed through the type system:
//! 1. [`Object`] is the capability set every pooled type implements
//!    (construct, finalize, describe).
//! 2. A derived type names its base through `Object::Base` and embeds the
//!    base value as its first `#[repr(C)]` field, so a pointer to the derived
//!    value is also a pointer to every ancestor value.
//! 3. Each type's [`DispatchTable`] embeds a link to its base's table, giving
//!    ancestor behavior by walking a fixed chain instead of a virtual lookup.
//!
//! Instances live in slots laid out as `{ ObjectHeader, payload }`. The header
//! always names the most-derived table.

mod dispatch;
mod header;

pub use dispatch::{dispatch_table, lookup, registered_types, Chain, DispatchTable, Finalizer, TypeDescriptor};
pub use header::{InstanceState, ObjectHeader};

pub(crate) use header::InstanceCell;

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

/// A concrete type that can be stored in an object pool.
///
/// # Safety
/// - `construct` returning `true` means `slot` is fully initialized.
///   Returning `false` means it holds nothing that needs dropping.
/// - If `Base` is not [`Root`], `Self` must be `#[repr(C)]` with a value of
///   `Base` as its first field.
/// - The `Base` chain must end at [`Root`].
pub unsafe trait Object: Sized + Send + 'static {
    /// Human-readable type name for diagnostics
    const NAME: &'static str;

    /// Embedded base type, or [`Root`]
    type Base: Lineage;

    /// Constructor parameters
    type Args;

    /// Initialize `slot` in place from `args`.
    ///
    /// `slot` may already hold bytes written by an instance initializer.
    fn construct(slot: &mut MaybeUninit<Self>, args: Self::Args) -> bool;

    /// Hook run before the value is dropped in place. Base hooks run after
    /// this one, nearest base first.
    fn finalize(&mut self) {}
}

/// Anything that can terminate or continue an inheritance chain.
pub trait Lineage: 'static {
    /// Dispatch table for this level, `None` past the root
    fn dispatch() -> Option<&'static DispatchTable>;

    /// Run finalize hooks from this level up to the root.
    ///
    /// # Safety
    /// `value` must point to a live value of this type.
    #[doc(hidden)]
    unsafe fn finalize_chain(value: *mut u8);
}

/// Marker base for types with no ancestor
pub enum Root {}

impl Lineage for Root {
    #[inline]
    fn dispatch() -> Option<&'static DispatchTable> {
        None
    }

    #[inline]
    unsafe fn finalize_chain(_value: *mut u8) {}
}

impl<T: Object> Lineage for T {
    #[inline]
    fn dispatch() -> Option<&'static DispatchTable> {
        Some(dispatch_table::<T>())
    }

    unsafe fn finalize_chain(value: *mut u8) {
        (*value.cast::<T>()).finalize();
        // Base sits at offset 0, so the same address is the base value
        <T::Base as Lineage>::finalize_chain(value);
    }
}

/// View a derived value as its embedded base.
///
/// The returned reference has the same address as `value`.
#[inline]
pub fn upcast<T>(value: &T) -> &T::Base
where
    T: Object,
    T::Base: Object,
{
    // Safety: Object requires the base at offset 0 of a repr(C) Self
    unsafe { &*(value as *const T).cast::<T::Base>() }
}

#[inline]
pub fn upcast_mut<T>(value: &mut T) -> &mut T::Base
where
    T: Object,
    T::Base: Object,
{
    // Safety: as in `upcast`
    unsafe { &mut *(value as *mut T).cast::<T::Base>() }
}

/// The base value's storage inside a derived slot, for chaining constructors.
#[inline]
pub fn base_slot<T>(slot: &mut MaybeUninit<T>) -> &mut MaybeUninit<T::Base>
where
    T: Object,
    T::Base: Object,
{
    // Safety: as in `upcast`; MaybeUninit keeps the same layout as its contents
    unsafe { &mut *slot.as_mut_ptr().cast::<MaybeUninit<T::Base>>() }
}

/// Typed handle to a pooled instance.
///
/// A handle is just the slot address. It does not keep the instance alive:
/// after `delete_instance` the address may be handed out again, so every
/// dereference is `unsafe`.
pub struct ObjectRef<T> {
    slot: NonNull<u8>,
    _marker: PhantomData<*mut T>,
}

// Safety: the handle is an address; access to T requires unsafe derefs
// whose contracts forbid unsynchronized cross-thread access
unsafe impl<T: Send> Send for ObjectRef<T> {}
unsafe impl<T: Send + Sync> Sync for ObjectRef<T> {}

impl<T: Object> ObjectRef<T> {
    /// # Safety
    /// `slot` must be a slot laid out for `T`.
    #[inline]
    pub(crate) unsafe fn from_slot(slot: NonNull<u8>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Slot address, identical to the address the pool handed out
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.slot.as_ptr()
    }

    #[inline]
    pub fn raw(self) -> RawObject {
        RawObject { slot: self.slot }
    }

    /// # Safety
    /// The instance must still be live and not mutably borrowed for `'a`.
    /// Handles are `Copy` and may move between threads, so unless `T: Sync`
    /// the caller must also ensure no other thread touches the instance
    /// while the reference is held.
    #[inline]
    pub unsafe fn get<'a>(self) -> &'a T {
        InstanceCell::<T>::value_slot(self.slot).assume_init_ref()
    }

    /// # Safety
    /// The instance must still be live and not otherwise borrowed for `'a`,
    /// on this thread or any other.
    #[inline]
    pub unsafe fn get_mut<'a>(self) -> &'a mut T {
        InstanceCell::<T>::value_slot(self.slot).assume_init_mut()
    }

    /// # Safety
    /// The slot must not have been erased.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a ObjectHeader {
        ObjectHeader::from_slot(self.slot)
    }
}

impl<T> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectRef<T> {}

impl<T> PartialEq for ObjectRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl<T> Eq for ObjectRef<T> {}

impl<T> Hash for ObjectRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}

impl<T> fmt::Debug for ObjectRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.slot).finish()
    }
}

/// Untyped handle to a pooled instance of any type
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RawObject {
    slot: NonNull<u8>,
}

impl RawObject {
    /// # Safety
    /// `slot` must hold a header stamped by an object manager.
    #[inline]
    pub unsafe fn from_slot(slot: NonNull<u8>) -> Self {
        Self { slot }
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.slot.as_ptr()
    }

    /// # Safety
    /// The slot must not have been erased.
    #[inline]
    pub unsafe fn header<'a>(self) -> &'a ObjectHeader {
        ObjectHeader::from_slot(self.slot)
    }

    /// Most-derived dispatch table
    ///
    /// # Safety
    /// The slot must not have been erased.
    #[inline]
    pub unsafe fn dispatch(self) -> &'static DispatchTable {
        self.header().dispatch()
    }

    /// Lifecycle state recorded in the header
    ///
    /// # Safety
    /// The slot must not have been erased.
    #[inline]
    pub unsafe fn state(self) -> InstanceState {
        self.header().state()
    }

    /// Typed handle if the most-derived type is exactly `T`
    ///
    /// # Safety
    /// The slot must not have been erased.
    pub unsafe fn downcast<T: Object>(self) -> Option<ObjectRef<T>> {
        if self.dispatch().is::<T>() {
            Some(ObjectRef::from_slot(self.slot))
        } else {
            None
        }
    }

    /// Payload viewed as ancestor type `A`, if `A` is in the instance's chain
    ///
    /// # Safety
    /// The instance must be live and not mutably borrowed for `'a`.
    pub unsafe fn as_ancestor<'a, A: Object>(self) -> Option<&'a A> {
        let table = self.dispatch();
        if !table.is_a(dispatch_table::<A>()) {
            return None;
        }
        let payload = self.slot.as_ptr().add(table.descriptor().payload_offset());
        Some(&*payload.cast::<A>())
    }
}
