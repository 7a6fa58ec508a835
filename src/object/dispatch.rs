//! Type descriptors and dispatch tables
//!
//! Each concrete type gets exactly one dispatch table for the life of the
//! process. Tables are interned in a concurrent registry keyed by `TypeId`
//! and leaked, so every reference to one is `&'static` and pointer identity
//! doubles as type identity.

use core::alloc::Layout;
use core::any::TypeId;
use core::ptr::NonNull;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::header::InstanceCell;
use super::{Lineage, Object};

/// Type-erased in-place finalizer. Never frees the slot.
pub type Finalizer = unsafe fn(NonNull<u8>);

/// Global dispatch registry (lock-free concurrent map)
static REGISTRY: Lazy<DashMap<TypeId, &'static DispatchTable>> = Lazy::new(DashMap::new);

/// Static identity and layout of one concrete type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    /// Whole slot: header plus payload
    layout: Layout,
    payload: Layout,
    payload_offset: usize,
}

impl TypeDescriptor {
    pub fn of<T: Object>() -> Self {
        let header = Layout::new::<super::ObjectHeader>();
        let payload = Layout::new::<T>();
        // Matches the repr(C) placement of InstanceCell<T>
        let payload_offset = header.size().next_multiple_of(payload.align());

        Self {
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            layout: Layout::new::<InstanceCell<T>>(),
            payload,
            payload_offset,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Slot size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Slot alignment in bytes
    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn payload_layout(&self) -> Layout {
        self.payload
    }

    /// Byte offset of the payload from the start of the slot
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }
}

/// Per-type dispatch table, chained to its base type's table
pub struct DispatchTable {
    descriptor: TypeDescriptor,
    finalize: Finalizer,
    base: Option<&'static DispatchTable>,
    depth: usize,
}

impl DispatchTable {
    fn build<T: Object>() -> Self {
        let base = <T::Base as Lineage>::dispatch();
        Self {
            descriptor: TypeDescriptor::of::<T>(),
            finalize: finalize_erased::<T>,
            base,
            depth: base.map_or(0, |b| b.depth + 1),
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Immediate base type's table, `None` for root types
    #[inline]
    pub fn base(&self) -> Option<&'static DispatchTable> {
        self.base
    }

    /// Inheritance depth; root types are 0
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn finalizer(&self) -> Finalizer {
        self.finalize
    }

    /// This table followed by each ancestor, nearest first
    pub fn lineage(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Ancestor tables only, nearest first
    pub fn ancestors(&self) -> Chain<'_> {
        Chain { next: self.base }
    }

    /// Ancestor `levels` steps up; `0` is this table
    pub fn ancestor(&self, levels: usize) -> Option<&DispatchTable> {
        self.lineage().nth(levels)
    }

    /// True if `other` is this type or one of its ancestors
    pub fn is_a(&self, other: &DispatchTable) -> bool {
        self.lineage().any(|table| core::ptr::eq(table, other))
    }

    /// True if this table belongs to exactly `T`
    #[inline]
    pub fn is<T: Object>(&self) -> bool {
        self.descriptor.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for DispatchTable {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl Eq for DispatchTable {}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("name", &self.name())
            .field("depth", &self.depth)
            .field("base", &self.base.map(DispatchTable::name))
            .field("size", &self.descriptor.size())
            .field("align", &self.descriptor.align())
            .finish()
    }
}

/// Iterator over a dispatch chain
pub struct Chain<'a> {
    next: Option<&'a DispatchTable>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a DispatchTable;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.base.map(|base| base as &DispatchTable);
        Some(current)
    }
}

/// Dispatch table for `T`, built and interned on first use
pub fn dispatch_table<T: Object>() -> &'static DispatchTable {
    let key = TypeId::of::<T>();
    if let Some(table) = REGISTRY.get(&key) {
        return *table;
    }

    // Build outside the map entry: resolving the base chain reenters the registry
    let table = DispatchTable::build::<T>();
    *REGISTRY
        .entry(key)
        .or_insert_with(|| Box::leak(Box::new(table)))
}

/// Previously registered table for a type id
pub fn lookup(type_id: TypeId) -> Option<&'static DispatchTable> {
    REGISTRY.get(&type_id).map(|table| *table)
}

/// Number of types registered so far
pub fn registered_types() -> usize {
    REGISTRY.len()
}

unsafe fn finalize_erased<T: Object>(slot: NonNull<u8>) {
    let value = InstanceCell::<T>::value_slot(slot).as_mut_ptr();
    <T as Lineage>::finalize_chain(value.cast());
    core::ptr::drop_in_place(value);
}
