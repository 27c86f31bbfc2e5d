//! Ember Stale-Reference Engine
//!
//! This crate tracks which classes belong to which bundle in a modular
//! managed runtime and finds objects that outlive the bundle that defined
//! them:
//! - Object identity table (GC-safe handles)
//! - Bundle registry and class-to-bundle index
//! - Reachability queries ("who references this object")
//! - Uninstall coordination with an advisory reachability sweep
//! - Mark-sweep collection that can reset stale references
//! - Diagnostic dumps of objects and bundles
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_engine::{ClassDef, Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default());
//! let provider = engine.install_next_bundle()?;
//! let class = engine.define_bundle_class(provider, ClassDef::new("B").fields(["v"]))?;
//! let b = engine.new_object(class)?;
//! engine.add_global_root(b.into())?;
//!
//! let report = engine.notify_bundle_uninstalled(provider)?;
//! assert_eq!(report.retained().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bundle;
pub mod class_registry;
pub mod config;
pub mod defaults;
pub mod dump;
pub mod engine;
pub mod gc;
pub mod identity;
pub mod object;
pub mod reach;
pub mod uninstall;
pub mod value;

pub use bundle::{BundleId, BundleRecord, BundleRegistry, BundleSnapshot, BundleState};
pub use class_registry::ClassRegistry;
pub use config::{ConfigError, EngineConfig};
pub use engine::{BundleUpdate, Engine};
pub use gc::{CollectionOutcome, GcStats, RootId, RootKind, ScanMode};
pub use identity::ObjectHandle;
pub use object::{Array, Class, ClassDef, ClassKind, ClassRef, EdgeSlot, HeapObject, Object};
pub use reach::{Referrer, ReferrerSet};
pub use uninstall::{RetainedInstance, SweepOutcome, SweepReport};
pub use value::Value;

/// Engine errors
///
/// Every variant is recoverable at the call site. Nothing here is retried
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bundle id never installed, or already purged
    #[error("Unknown bundle: {0}")]
    UnknownBundle(BundleId),

    /// Install of an id that is registered or retired
    #[error("Duplicate bundle: {0}")]
    DuplicateBundle(BundleId),

    /// Class is owned by another active bundle
    #[error("{class} is already owned by bundle {owner} (requested by bundle {requested})")]
    ClassAlreadyOwned {
        /// Contested class
        class: ClassRef,
        /// Current owner
        owner: BundleId,
        /// Bundle that asked for ownership
        requested: BundleId,
    },

    /// Class has no owning bundle (bootstrap class)
    #[error("{0} is not associated with any bundle")]
    UnassociatedClass(ClassRef),

    /// Class reference was never defined
    #[error("Unknown class: {0}")]
    UnknownClass(ClassRef),

    /// Object was reclaimed between identification and use
    #[error("Handle expired: {0}")]
    HandleExpired(ObjectHandle),

    /// Value does not reference a heap object
    #[error("Not a reference: {0:?}")]
    NotAReference(Value),

    /// Operation requires an active bundle
    #[error("Bundle {bundle} is not active (state: {state})")]
    BundleNotActive {
        /// Bundle id
        bundle: BundleId,
        /// Current lifecycle state
        state: BundleState,
    },

    /// Purge requested for a bundle that is still installed
    #[error("Bundle {0} is still active")]
    BundleStillActive(BundleId),

    /// Field or element index out of range
    #[error("Slot {index} out of bounds for {handle} ({len} slots)")]
    SlotOutOfBounds {
        /// Object accessed
        handle: ObjectHandle,
        /// Requested slot
        index: usize,
        /// Number of slots in the object
        len: usize,
    },

    /// Operation needs an array object but got an instance, or vice versa
    #[error("Wrong object kind for {handle}: expected {expected}")]
    WrongObjectKind {
        /// Object accessed
        handle: ObjectHandle,
        /// Expected kind
        expected: &'static str,
    },

    /// Live object limit reached even after collecting
    #[error("Heap limit exceeded ({limit} objects)")]
    HeapLimitExceeded {
        /// Configured limit
        limit: usize,
    },

    /// Root id does not name a registered root
    #[error("Unknown root: {0}")]
    UnknownRoot(RootId),

    /// Every bundle id above the highest one seen is taken
    #[error("Bundle ids exhausted")]
    BundleIdsExhausted,
}

/// Engine result
pub type EngineResult<T> = Result<T, EngineError>;
