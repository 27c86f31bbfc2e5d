//! Bundle bookkeeping
//!
//! A bundle is an independently installable unit of code with its own
//! class-defining authority. This module holds:
//!
//! - **BundleId**: opaque 64-bit id, never reused
//! - **BundleRecord**: defined classes, lifecycle state, correction flag
//! - **BundleRegistry**: all records plus the class-to-bundle index
//!
//! Records survive uninstall so stale-reference queries can still name the
//! bundle; only [`BundleRegistry::purge`] removes them.

mod index;
mod registry;

pub use index::ClassOwnerIndex;
pub use registry::BundleRegistry;

use crate::object::ClassRef;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Opaque bundle identifier, unique for the life of the process
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BundleId(u64);

impl BundleId {
    /// Wrap a raw id
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({})", self.0)
    }
}

/// Bundle lifecycle state
///
/// `Active -> Uninstalling -> Uninstalled`; there is no way back. Reinstalling
/// the same logical bundle allocates a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    /// Installed; may still define classes
    Active,
    /// Uninstall notification received, sweep in progress
    Uninstalling,
    /// Terminal
    Uninstalled,
}

impl BundleState {
    /// Only active bundles accept new classes
    pub fn is_active(&self) -> bool {
        matches!(self, BundleState::Active)
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleState::Active => "active",
            BundleState::Uninstalling => "uninstalling",
            BundleState::Uninstalled => "uninstalled",
        };
        f.write_str(s)
    }
}

/// Per-bundle record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleRecord {
    /// Bundle id
    pub id: BundleId,
    /// Classes this bundle defined (ordered for stable dumps)
    pub defined_classes: BTreeSet<ClassRef>,
    /// Stale references to this bundle's objects may be reset by the collector
    pub stale_reference_corrected: bool,
    /// Lifecycle state
    pub state: BundleState,
    /// Bundle this one replaced through an update
    pub previous: Option<BundleId>,
    /// Uninstalled and no live instance of its classes remains
    pub reclaimed: bool,
}

impl BundleRecord {
    /// Fresh record for a newly installed bundle
    pub fn new(id: BundleId) -> Self {
        Self {
            id,
            defined_classes: BTreeSet::new(),
            stale_reference_corrected: false,
            state: BundleState::Active,
            previous: None,
            reclaimed: false,
        }
    }

    /// Whether this bundle's objects are stale: uninstalled but not yet reclaimed
    pub fn is_stale(&self) -> bool {
        !self.state.is_active() && !self.reclaimed
    }
}

/// Point-in-time copy of every record, ordered by ascending id
///
/// Iteration is lazy and restartable: call [`BundleSnapshot::iter`] as often
/// as needed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct BundleSnapshot {
    records: Vec<BundleRecord>,
}

impl BundleSnapshot {
    pub(crate) fn new(records: Vec<BundleRecord>) -> Self {
        Self { records }
    }

    /// Iterate records in ascending id order
    pub fn iter(&self) -> std::slice::Iter<'_, BundleRecord> {
        self.records.iter()
    }

    /// Find a record by id
    pub fn get(&self, id: BundleId) -> Option<&BundleRecord> {
        self.records
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.records[i])
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a BundleSnapshot {
    type Item = &'a BundleRecord;
    type IntoIter = std::slice::Iter<'a, BundleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
