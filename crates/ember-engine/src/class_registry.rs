//! Class registry for managing loaded class metadata

use crate::object::{Class, ClassDef, ClassRef};
use crate::{EngineError, EngineResult};
use rustc_hash::FxHashMap;

/// Class registry for the runtime
///
/// Class references are allocated densely and never reused; unloading a
/// bundle does not remove its classes from here, only from ownership.
#[derive(Debug)]
pub struct ClassRegistry {
    /// Classes indexed by id
    classes: Vec<Class>,
    /// Class name to id mapping (latest definition wins)
    name_to_id: FxHashMap<String, ClassRef>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            name_to_id: FxHashMap::default(),
        }
    }

    /// Define a new class
    ///
    /// Two bundles may define classes with the same name; each definition
    /// gets its own `ClassRef`.
    pub fn define(&mut self, def: ClassDef) -> ClassRef {
        let id = self.next_class_ref();
        let class = def.into_class(id);

        self.name_to_id.insert(class.name.clone(), id);
        self.classes.push(class);

        id
    }

    /// Get class by reference
    pub fn get(&self, id: ClassRef) -> Option<&Class> {
        self.classes.get(id.id() as usize)
    }

    /// Get class by reference, failing for unknown ids
    pub fn require(&self, id: ClassRef) -> EngineResult<&Class> {
        self.get(id).ok_or(EngineError::UnknownClass(id))
    }

    /// Check if a class reference was ever defined
    pub fn contains(&self, id: ClassRef) -> bool {
        (id.id() as usize) < self.classes.len()
    }

    /// Get the most recent class defined under a name
    pub fn get_by_name(&self, name: &str) -> Option<&Class> {
        self.name_to_id.get(name).and_then(|id| self.get(*id))
    }

    /// Class name for display, or a placeholder for unknown ids
    pub fn name_of(&self, id: ClassRef) -> &str {
        self.get(id).map(|c| c.name.as_str()).unwrap_or("<unknown class>")
    }

    /// Get next class reference
    pub fn next_class_ref(&self) -> ClassRef {
        ClassRef::new(self.classes.len() as u32)
    }

    /// Number of defined classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if no class has been defined
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over all classes
    pub fn iter(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
