//! Error types for pool creation, type registration and instance creation
//!
//! Only configuration problems are reported through these enums. Caller
//! contract violations (erasing or deleting something the pool does not own)
//! stay plain `bool`/`Option` returns.

use std::error::Error;
use std::fmt;

/// Errors that can occur while creating a [`Colony`](crate::colony::Colony).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColonyError {
    /// Slot alignment is zero or not a power of two.
    InvalidAlignment { align: usize },
    /// Slot size is zero or not a multiple of the alignment.
    InvalidSize { size: usize, align: usize },
    /// Slot size does not fit strictly inside one page.
    SlotTooLarge { size: usize, page_size: usize },
    /// The pool configuration cannot describe a usable pool.
    InvalidConfig { reason: String },
    /// The page source refused to map the initial bucket.
    OutOfMemory { requested: usize },
}

impl fmt::Display for ColonyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAlignment { align } => {
                write!(f, "slot alignment {} is not a power of two", align)
            }
            Self::InvalidSize { size, align } => {
                write!(f, "slot size {} is not a non-zero multiple of alignment {}", size, align)
            }
            Self::SlotTooLarge { size, page_size } => {
                write!(f, "slot size {} must be smaller than the page size {}", size, page_size)
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid colony configuration: {}", reason)
            }
            Self::OutOfMemory { requested } => {
                write!(f, "failed to map {} bytes for the initial bucket", requested)
            }
        }
    }
}

impl Error for ColonyError {}

/// Errors that can occur while registering a type with an
/// [`ObjectManager`](crate::manager::ObjectManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// No dispatch table was supplied.
    NullDispatch,
    /// The dispatch table describes a different concrete type.
    TypeMismatch { expected: &'static str, found: &'static str },
    /// A type's layout does not start with its base type's layout.
    InvalidLayout { ty: &'static str, base: &'static str },
    /// The backing pool could not be created.
    Colony(ColonyError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullDispatch => write!(f, "dispatch table is missing"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "dispatch table mismatch: expected {}, found {}", expected, found)
            }
            Self::InvalidLayout { ty, base } => {
                write!(f, "layout of {} cannot embed its base {}", ty, base)
            }
            Self::Colony(err) => write!(f, "colony creation failed: {}", err),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Colony(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ColonyError> for RuntimeError {
    fn from(err: ColonyError) -> Self {
        Self::Colony(err)
    }
}

/// Reasons a call to `new_instance` produced no object.
///
/// Every variant leaves the pool exactly as it was before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceError {
    /// The pool hit its bucket ceiling or could not map more memory.
    Exhausted,
    /// The caller-supplied initializer rejected the slot.
    InitFailed,
    /// The type's constructor reported failure.
    ConstructFailed,
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "object pool exhausted"),
            Self::InitFailed => write!(f, "instance initializer failed"),
            Self::ConstructFailed => write!(f, "instance constructor failed"),
        }
    }
}

impl Error for InstanceError {}

/// Errors raised while loading a [`ColonyConfig`](crate::config::ColonyConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    Parse(String),
    /// A value parsed but is out of range.
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "failed to parse configuration: {}", msg),
            Self::Invalid { key, reason } => write!(f, "invalid value for {}: {}", key, reason),
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for ColonyError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig { reason: err.to_string() }
    }
}
