//! Class-to-bundle reverse index
//!
//! Only the bundle registry mutates this index, as a side effect of class
//! association, transfer and purge.

use super::BundleId;
use crate::object::ClassRef;
use rustc_hash::FxHashMap;

/// Maps each associated class to its owning bundle
#[derive(Debug, Default)]
pub struct ClassOwnerIndex {
    owners: FxHashMap<ClassRef, BundleId>,
}

impl ClassOwnerIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Owning bundle of a class, `None` for unassociated (bootstrap) classes
    pub fn owner(&self, class: ClassRef) -> Option<BundleId> {
        self.owners.get(&class).copied()
    }

    /// Number of associated classes
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Check if no class is associated
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub(super) fn insert(&mut self, class: ClassRef, owner: BundleId) -> Option<BundleId> {
        self.owners.insert(class, owner)
    }

    pub(super) fn remove(&mut self, class: ClassRef) -> Option<BundleId> {
        self.owners.remove(&class)
    }
}
