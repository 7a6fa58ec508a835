//! Colony Runtime - pooled object storage with table-driven inheritance
//!
//! This crate provides the allocation and object layer engine subsystems
//! build on: a bucketed slot pool with stable addresses, dispatch tables that
//! chain derived types to their bases, and per-type managers that create,
//! enumerate and destroy instances.
//!
//! ```
//! use core::mem::MaybeUninit;
//! use colony_runtime::{Object, ObjectManager, Root};
//!
//! struct Particle {
//!     mass: f32,
//! }
//!
//! unsafe impl Object for Particle {
//!     const NAME: &'static str = "Particle";
//!     type Base = Root;
//!     type Args = f32;
//!
//!     fn construct(slot: &mut MaybeUninit<Self>, mass: f32) -> bool {
//!         slot.write(Self { mass });
//!         true
//!     }
//! }
//!
//! let particles = ObjectManager::<Particle>::new().unwrap();
//! let p = particles.new_instance(1.5).unwrap();
//! assert!(particles.contains(p));
//! assert!(particles.delete_instance(p));
//! ```

pub mod colony;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod object;

// Re-export core types
pub use colony::{Colony, ColonyStats, HeapPages, PageBudget, PageSource, SystemPages};
pub use config::ColonyConfig;
pub use error::{ColonyError, ConfigError, InstanceError, RuntimeError};
pub use manager::ObjectManager;
pub use object::{
    base_slot, dispatch_table, upcast, upcast_mut, DispatchTable, InstanceState, Lineage, Object,
    ObjectHeader, ObjectRef, RawObject, Root, TypeDescriptor,
};
