//! Object identity table
//!
//! Every heap object is named by an [`ObjectHandle`]: a slot in this table
//! plus the generation the slot had when the object was allocated. The slot
//! records the object's class and where its storage currently lives, so the
//! collector can relocate storage without invalidating handles.
//!
//! When an object is reclaimed its slot generation is bumped. Old handles
//! then fail to resolve and report [`EngineError::HandleExpired`] instead of
//! silently aliasing whatever object reuses the slot.

use crate::object::ClassRef;
use crate::value::Value;
use crate::{EngineError, EngineResult};
use serde::Serialize;
use std::fmt;

/// Generations are stored in 29 bits so a handle fits in a tagged [`Value`].
pub const GENERATION_MASK: u32 = (1 << 29) - 1;

/// Stable, GC-safe identifier for a heap object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
}

impl ObjectHandle {
    /// Create a handle from its raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Identity-table slot
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at allocation time
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.index, self.generation)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle(#{}:{})", self.index, self.generation)
    }
}

/// Per-slot metadata
#[derive(Debug, Clone, Copy)]
struct SlotMeta {
    generation: u32,
    /// Class of the live occupant; `None` when the slot is free
    class: Option<ClassRef>,
    /// Position of the occupant in the heap's storage vector
    location: u32,
}

/// Maps handles to class and storage location
#[derive(Debug, Default)]
pub struct IdentityTable {
    slots: Vec<SlotMeta>,
    free_list: Vec<u32>,
    live: usize,
}

impl IdentityTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a slot to a newly allocated object
    pub(crate) fn assign(&mut self, class: ClassRef, location: usize) -> ObjectHandle {
        self.live += 1;
        let location = location as u32;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.class = Some(class);
            slot.location = location;
            ObjectHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(SlotMeta {
                generation: 0,
                class: Some(class),
                location,
            });
            ObjectHandle::new(index, 0)
        }
    }

    /// Release a slot; the handle expires
    pub(crate) fn release(&mut self, handle: ObjectHandle) -> bool {
        match self.live_slot_mut(handle) {
            Some(slot) => {
                slot.class = None;
                slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
                self.free_list.push(handle.index);
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    /// Record that the object's storage moved
    pub(crate) fn relocate(&mut self, handle: ObjectHandle, location: usize) {
        if let Some(slot) = self.live_slot_mut(handle) {
            slot.location = location as u32;
        }
    }

    /// Storage location of a live object
    pub(crate) fn location(&self, handle: ObjectHandle) -> EngineResult<usize> {
        self.live_slot(handle)
            .map(|slot| slot.location as usize)
            .ok_or(EngineError::HandleExpired(handle))
    }

    /// Return the handle for the object a value refers to
    ///
    /// Idempotent: the same referenced object always yields an equal handle.
    pub fn identify(&self, value: Value) -> EngineResult<ObjectHandle> {
        let handle = value.as_handle().ok_or(EngineError::NotAReference(value))?;
        if self.is_live(handle) {
            Ok(handle)
        } else {
            Err(EngineError::HandleExpired(handle))
        }
    }

    /// Class of a live object
    pub fn class_of(&self, handle: ObjectHandle) -> EngineResult<ClassRef> {
        self.live_slot(handle)
            .and_then(|slot| slot.class)
            .ok_or(EngineError::HandleExpired(handle))
    }

    /// Check whether the handle still names an allocated object
    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.live_slot(handle).is_some()
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots ever created
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn live_slot(&self, handle: ObjectHandle) -> Option<&SlotMeta> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.class.is_some())
    }

    fn live_slot_mut(&mut self, handle: ObjectHandle) -> Option<&mut SlotMeta> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.class.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_and_resolve() {
        let mut table = IdentityTable::new();
        let handle = table.assign(ClassRef::new(3), 0);

        assert!(table.is_live(handle));
        assert_eq!(table.class_of(handle).unwrap(), ClassRef::new(3));
        assert_eq!(table.location(handle).unwrap(), 0);
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn test_identify_is_idempotent() {
        let mut table = IdentityTable::new();
        let handle = table.assign(ClassRef::new(1), 0);
        let value = Value::reference(handle);

        assert_eq!(table.identify(value).unwrap(), table.identify(value).unwrap());
    }

    #[test]
    fn test_identify_rejects_primitives() {
        let table = IdentityTable::new();
        assert!(matches!(
            table.identify(Value::i32(5)),
            Err(EngineError::NotAReference(_))
        ));
    }

    #[test]
    fn test_released_handle_expires() {
        let mut table = IdentityTable::new();
        let handle = table.assign(ClassRef::new(1), 0);
        assert!(table.release(handle));

        assert!(matches!(
            table.class_of(handle),
            Err(EngineError::HandleExpired(h)) if h == handle
        ));
        assert!(!table.release(handle));
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut table = IdentityTable::new();
        let old = table.assign(ClassRef::new(1), 0);
        table.release(old);

        let new = table.assign(ClassRef::new(2), 0);
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert!(!table.is_live(old));
        assert_eq!(table.class_of(new).unwrap(), ClassRef::new(2));
    }

    #[test]
    fn test_relocate_keeps_handle() {
        let mut table = IdentityTable::new();
        let handle = table.assign(ClassRef::new(1), 4);
        table.relocate(handle, 1);

        assert_eq!(table.location(handle).unwrap(), 1);
        assert!(table.is_live(handle));
    }
}
