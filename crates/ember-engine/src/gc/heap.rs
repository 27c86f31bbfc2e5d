//! Managed heap
//!
//! Objects are stored densely. Freeing an object moves the last entry into
//! its place, so storage locations change on every sweep; the identity table
//! follows each move and handles stay valid.

use super::header::GcHeader;
use crate::identity::{IdentityTable, ObjectHandle};
use crate::object::{ClassRef, HeapObject};
use crate::{EngineError, EngineResult};

#[derive(Debug)]
struct Entry {
    handle: ObjectHandle,
    header: GcHeader,
    object: HeapObject,
}

/// Heap for GC-managed objects
#[derive(Debug, Default)]
pub struct Heap {
    /// Handle -> location
    identity: IdentityTable,

    /// Live objects in storage order
    entries: Vec<Entry>,

    /// Maximum live objects (0 = unlimited)
    max_objects: usize,

    /// Allocations since the last collection
    allocations_since_gc: usize,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of live objects
    pub fn set_max_objects(&mut self, max_objects: usize) {
        self.max_objects = max_objects;
    }

    /// Maximum number of live objects (0 = unlimited)
    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    /// Check whether the next allocation would exceed the limit
    pub fn is_full(&self) -> bool {
        self.max_objects != 0 && self.entries.len() >= self.max_objects
    }

    /// Allocate an object
    pub fn allocate(&mut self, object: HeapObject, header: GcHeader) -> EngineResult<ObjectHandle> {
        if self.is_full() {
            return Err(EngineError::HeapLimitExceeded {
                limit: self.max_objects,
            });
        }

        let handle = self.identity.assign(object.class(), self.entries.len());
        self.entries.push(Entry {
            handle,
            header,
            object,
        });
        self.allocations_since_gc += 1;
        Ok(handle)
    }

    fn entry(&self, handle: ObjectHandle) -> EngineResult<&Entry> {
        let location = self.identity.location(handle)?;
        self.entries
            .get(location)
            .ok_or(EngineError::HandleExpired(handle))
    }

    fn entry_mut(&mut self, handle: ObjectHandle) -> EngineResult<&mut Entry> {
        let location = self.identity.location(handle)?;
        self.entries
            .get_mut(location)
            .ok_or(EngineError::HandleExpired(handle))
    }

    /// Borrow a live object
    pub fn get(&self, handle: ObjectHandle) -> EngineResult<&HeapObject> {
        self.entry(handle).map(|e| &e.object)
    }

    /// Mutably borrow a live object
    pub fn get_mut(&mut self, handle: ObjectHandle) -> EngineResult<&mut HeapObject> {
        self.entry_mut(handle).map(|e| &mut e.object)
    }

    /// GC header of a live object
    pub fn header(&self, handle: ObjectHandle) -> EngineResult<&GcHeader> {
        self.entry(handle).map(|e| &e.header)
    }

    /// Mutable GC header of a live object
    pub fn header_mut(&mut self, handle: ObjectHandle) -> EngineResult<&mut GcHeader> {
        self.entry_mut(handle).map(|e| &mut e.header)
    }

    /// Free one object immediately
    pub fn free(&mut self, handle: ObjectHandle) -> EngineResult<()> {
        let location = self.identity.location(handle)?;
        self.remove_at(location);
        Ok(())
    }

    fn remove_at(&mut self, location: usize) -> Entry {
        let entry = self.entries.swap_remove(location);
        if let Some(moved) = self.entries.get(location) {
            self.identity.relocate(moved.handle, location);
        }
        self.identity.release(entry.handle);
        entry
    }

    /// Clear every mark bit
    pub fn unmark_all(&mut self) {
        for entry in &mut self.entries {
            entry.header.unmark();
        }
    }

    /// Free every unmarked object and unmark the survivors
    ///
    /// Returns the handle and class of each freed object.
    pub fn sweep(&mut self) -> Vec<(ObjectHandle, ClassRef)> {
        let mut freed = Vec::new();
        let mut i = 0;

        while i < self.entries.len() {
            if self.entries[i].header.is_marked() {
                self.entries[i].header.unmark();
                i += 1;
            } else {
                let entry = self.remove_at(i);
                freed.push((entry.handle, entry.object.class()));
            }
        }

        freed
    }

    /// Iterate live objects in storage order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectHandle, &GcHeader, &HeapObject)> + '_ {
        self.entries.iter().map(|e| (e.handle, &e.header, &e.object))
    }

    /// Handles of all live objects in storage order
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }

    /// Identity table
    pub fn identity(&self) -> &IdentityTable {
        &self.identity
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the heap is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocations since the last collection
    pub fn allocations_since_gc(&self) -> usize {
        self.allocations_since_gc
    }

    /// Reset the allocation counter after a collection
    pub fn reset_allocation_counter(&mut self) {
        self.allocations_since_gc = 0;
    }
}
