//! GC root tracking
//!
//! This module manages the root set for garbage collection.
//! Roots are starting points for GC traversal and include:
//! - Stack slots (values held by running code)
//! - Static fields of loaded classes
//! - Global slots held by the runtime
//!
//! Each root is a slot with a [`RootId`]; the collector may reset a slot to
//! null when it holds a stale reference.

use crate::identity::ObjectHandle;
use crate::object::ClassRef;
use crate::value::Value;
use crate::{EngineError, EngineResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies a root slot
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RootId(u64);

impl RootId {
    /// Raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({})", self.0)
    }
}

/// Where a root slot lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RootKind {
    /// Slot on a thread stack
    Stack,
    /// Static field of a class
    Static {
        /// Class declaring the field
        class: ClassRef,
    },
    /// Runtime-held global slot
    Global,
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootKind::Stack => f.write_str("stack"),
            RootKind::Static { class } => write!(f, "static({})", class),
            RootKind::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Root {
    kind: RootKind,
    value: Value,
}

/// Root set for garbage collection
///
/// The root set contains all values that are directly accessible
/// and should not be collected, even if no other objects reference them.
#[derive(Debug, Default)]
pub struct RootSet {
    roots: BTreeMap<RootId, Root>,
    next_id: u64,
}

impl RootSet {
    /// Create a new root set
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, kind: RootKind, value: Value) -> RootId {
        let id = RootId(self.next_id);
        self.next_id += 1;
        self.roots.insert(id, Root { kind, value });
        id
    }

    /// Add a stack root
    pub fn add_stack_root(&mut self, value: Value) -> RootId {
        self.add(RootKind::Stack, value)
    }

    /// Add a static-field root of `class`
    pub fn add_static_root(&mut self, class: ClassRef, value: Value) -> RootId {
        self.add(RootKind::Static { class }, value)
    }

    /// Add a global root
    pub fn add_global_root(&mut self, value: Value) -> RootId {
        self.add(RootKind::Global, value)
    }

    /// Current value of a root slot
    pub fn get(&self, id: RootId) -> EngineResult<Value> {
        self.roots
            .get(&id)
            .map(|r| r.value)
            .ok_or(EngineError::UnknownRoot(id))
    }

    /// Kind of a root slot
    pub fn kind(&self, id: RootId) -> EngineResult<RootKind> {
        self.roots
            .get(&id)
            .map(|r| r.kind)
            .ok_or(EngineError::UnknownRoot(id))
    }

    /// Overwrite a root slot, returning the previous value
    pub fn set(&mut self, id: RootId, value: Value) -> EngineResult<Value> {
        let root = self.roots.get_mut(&id).ok_or(EngineError::UnknownRoot(id))?;
        Ok(std::mem::replace(&mut root.value, value))
    }

    /// Drop a root slot
    pub fn remove(&mut self, id: RootId) -> EngineResult<Value> {
        self.roots
            .remove(&id)
            .map(|r| r.value)
            .ok_or(EngineError::UnknownRoot(id))
    }

    /// Clear all stack roots
    pub fn clear_stack_roots(&mut self) {
        self.roots.retain(|_, r| r.kind != RootKind::Stack);
    }

    /// Iterate over all roots in registration order
    pub fn iter(&self) -> impl Iterator<Item = (RootId, RootKind, Value)> + '_ {
        self.roots.iter().map(|(id, r)| (*id, r.kind, r.value))
    }

    /// Roots currently holding an object reference
    pub fn references(&self) -> impl Iterator<Item = (RootId, ObjectHandle)> + '_ {
        self.roots
            .iter()
            .filter_map(|(id, r)| r.value.as_handle().map(|h| (*id, h)))
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
