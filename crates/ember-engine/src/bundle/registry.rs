//! Bundle registry
//!
//! Holds every [`BundleRecord`] keyed by id together with the
//! [`ClassOwnerIndex`]. The two are updated together so that a class is
//! always listed in exactly one record's `defined_classes` and the index
//! agrees with it.

use super::{BundleId, BundleRecord, BundleSnapshot, BundleState, ClassOwnerIndex};
use crate::object::ClassRef;
use crate::{EngineError, EngineResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Registry of installed (and uninstalled, not yet purged) bundles
#[derive(Debug, Default)]
pub struct BundleRegistry {
    /// Records ordered by id
    bundles: BTreeMap<BundleId, BundleRecord>,
    /// Reverse index: class -> owning bundle
    owners: ClassOwnerIndex,
    /// Next id handed out by `allocate_id`
    next_id: u64,
    /// `u64::MAX` has been seen; `next_id` is meaningless
    ids_exhausted: bool,
    /// Purged ids; never accepted again
    retired: FxHashSet<BundleId>,
}

impl BundleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle under an externally chosen id
    pub fn install(&mut self, id: BundleId) -> EngineResult<BundleRecord> {
        if self.bundles.contains_key(&id) || self.retired.contains(&id) {
            return Err(EngineError::DuplicateBundle(id));
        }

        let record = BundleRecord::new(id);
        self.bundles.insert(id, record.clone());
        match id.as_u64().checked_add(1) {
            Some(next) => self.next_id = self.next_id.max(next),
            None => self.ids_exhausted = true,
        }

        info!(bundle = %id, "bundle installed");
        Ok(record)
    }

    /// Allocate a fresh id and install it
    ///
    /// Ids handed out here are strictly increasing.
    pub fn install_next(&mut self) -> EngineResult<BundleRecord> {
        let id = self.allocate_id()?;
        let record = BundleRecord::new(id);
        self.bundles.insert(id, record.clone());

        info!(bundle = %id, "bundle installed");
        Ok(record)
    }

    /// Install the replacement for an active bundle
    ///
    /// The new record inherits the correction flag and points back at the
    /// bundle it replaces. Class ownership is not transferred.
    pub fn install_update(&mut self, previous: BundleId) -> EngineResult<BundleRecord> {
        let old = self.require_active(previous)?;
        let corrected = old.stale_reference_corrected;

        let id = self.allocate_id()?;
        let mut record = BundleRecord::new(id);
        record.stale_reference_corrected = corrected;
        record.previous = Some(previous);
        self.bundles.insert(id, record.clone());

        info!(bundle = %id, previous = %previous, corrected, "bundle updated");
        Ok(record)
    }

    /// Next id, strictly above every id seen so far
    fn allocate_id(&mut self) -> EngineResult<BundleId> {
        if self.ids_exhausted {
            return Err(EngineError::BundleIdsExhausted);
        }

        let id = BundleId::new(self.next_id);
        if self.bundles.contains_key(&id) || self.retired.contains(&id) {
            return Err(EngineError::DuplicateBundle(id));
        }
        match self.next_id.checked_add(1) {
            Some(next) => self.next_id = next,
            None => self.ids_exhausted = true,
        }
        Ok(id)
    }

    /// Get a record
    pub fn get(&self, id: BundleId) -> EngineResult<&BundleRecord> {
        self.bundles.get(&id).ok_or(EngineError::UnknownBundle(id))
    }

    fn get_mut(&mut self, id: BundleId) -> EngineResult<&mut BundleRecord> {
        self.bundles.get_mut(&id).ok_or(EngineError::UnknownBundle(id))
    }

    fn require_active(&self, id: BundleId) -> EngineResult<&BundleRecord> {
        let record = self.get(id)?;
        if !record.state.is_active() {
            return Err(EngineError::BundleNotActive {
                bundle: id,
                state: record.state,
            });
        }
        Ok(record)
    }

    /// Lifecycle state of a bundle
    pub fn state(&self, id: BundleId) -> EngineResult<BundleState> {
        Ok(self.get(id)?.state)
    }

    /// Record that `class` was defined by bundle `id`
    ///
    /// Associating a class with its current owner is a no-op. A class owned
    /// by another active bundle is rejected. A class whose owner has been
    /// uninstalled is transferred, leaving the old record.
    pub fn associate_class(&mut self, id: BundleId, class: ClassRef) -> EngineResult<()> {
        self.require_active(id)?;

        match self.owners.owner(class) {
            Some(owner) if owner == id => return Ok(()),
            Some(owner) => {
                let owner_record = self.get_mut(owner)?;
                if owner_record.state.is_active() {
                    return Err(EngineError::ClassAlreadyOwned {
                        class,
                        owner,
                        requested: id,
                    });
                }
                owner_record.defined_classes.remove(&class);
                info!(%class, from = %owner, to = %id, "class ownership transferred");
            }
            None => {}
        }

        self.get_mut(id)?.defined_classes.insert(class);
        self.owners.insert(class, id);

        debug!(bundle = %id, %class, "class associated");
        Ok(())
    }

    /// Owning bundle of a class, `None` for bootstrap classes
    pub fn class_owner(&self, class: ClassRef) -> Option<BundleId> {
        self.owners.owner(class)
    }

    /// Class-to-bundle index (read-only)
    pub fn owners(&self) -> &ClassOwnerIndex {
        &self.owners
    }

    /// Flip an active bundle to `Uninstalling`
    ///
    /// `defined_classes` is left untouched and returned for the sweep.
    pub fn mark_uninstalled(&mut self, id: BundleId) -> EngineResult<Vec<ClassRef>> {
        self.require_active(id)?;
        let record = self.get_mut(id)?;
        record.state = BundleState::Uninstalling;

        info!(bundle = %id, classes = record.defined_classes.len(), "bundle uninstalling");
        Ok(record.defined_classes.iter().copied().collect())
    }

    /// Complete an uninstall: `Uninstalling -> Uninstalled`
    pub fn finish_uninstall(&mut self, id: BundleId) -> EngineResult<()> {
        let record = self.get_mut(id)?;
        if record.state != BundleState::Uninstalling {
            return Err(EngineError::BundleNotActive {
                bundle: id,
                state: record.state,
            });
        }
        record.state = BundleState::Uninstalled;

        info!(bundle = %id, "bundle uninstalled");
        Ok(())
    }

    /// Set the stale-reference correction flag
    pub fn set_corrected(&mut self, id: BundleId, corrected: bool) -> EngineResult<()> {
        let record = self.get_mut(id)?;
        record.stale_reference_corrected = corrected;

        if corrected {
            info!(bundle = %id, "stale references are corrected");
        } else {
            info!(bundle = %id, "stale references are no more corrected");
        }
        Ok(())
    }

    /// Read the stale-reference correction flag
    pub fn is_corrected(&self, id: BundleId) -> EngineResult<bool> {
        Ok(self.get(id)?.stale_reference_corrected)
    }

    /// Classes whose instances the collector may reset references to
    ///
    /// These belong to stale bundles with correction enabled.
    pub fn corrected_stale_classes(&self) -> FxHashSet<ClassRef> {
        self.bundles
            .values()
            .filter(|r| r.is_stale() && r.stale_reference_corrected)
            .flat_map(|r| r.defined_classes.iter().copied())
            .collect()
    }

    /// Uninstalled bundles whose objects may still be alive
    pub fn stale_bundles(&self) -> impl Iterator<Item = &BundleRecord> {
        self.bundles.values().filter(|r| r.is_stale())
    }

    /// Flag uninstalled bundles with no surviving instances as reclaimed
    ///
    /// `live_instances` counts surviving objects per class after a collection.
    pub fn mark_reclaimed(&mut self, live_instances: &FxHashMap<ClassRef, usize>) -> Vec<BundleId> {
        let mut reclaimed = Vec::new();

        for record in self.bundles.values_mut() {
            if record.state != BundleState::Uninstalled || record.reclaimed {
                continue;
            }
            let alive = record
                .defined_classes
                .iter()
                .any(|c| live_instances.get(c).copied().unwrap_or(0) > 0);
            if !alive {
                record.reclaimed = true;
                reclaimed.push(record.id);
                info!(bundle = %record.id, "bundle classes reclaimed");
            }
        }

        reclaimed
    }

    /// Remove an uninstalled bundle's record for good
    ///
    /// Its classes become unassociated and its id is retired.
    pub fn purge(&mut self, id: BundleId) -> EngineResult<BundleRecord> {
        if self.get(id)?.state.is_active() {
            return Err(EngineError::BundleStillActive(id));
        }

        let record = self
            .bundles
            .remove(&id)
            .ok_or(EngineError::UnknownBundle(id))?;
        for class in &record.defined_classes {
            if self.owners.owner(*class) == Some(id) {
                self.owners.remove(*class);
            }
        }
        self.retired.insert(id);

        info!(bundle = %id, "bundle purged");
        Ok(record)
    }

    /// Snapshot of every record in ascending id order
    pub fn dump_all(&self) -> BundleSnapshot {
        BundleSnapshot::new(self.bundles.values().cloned().collect())
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Check if no bundle is registered
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
