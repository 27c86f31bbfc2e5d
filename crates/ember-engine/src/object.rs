//! Object model and class system

use crate::identity::ObjectHandle;
use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// Identifies a loaded class (index into the class registry)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassRef(u32);

impl ClassRef {
    /// Create a class reference from a raw id
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw class id
    #[inline]
    pub const fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassRef({})", self.0)
    }
}

/// What kind of instances a class produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    /// Ordinary instances with named fields
    Regular,
    /// Growable element arrays (collections)
    Array,
    /// Bridge objects standing in for a class loader inside the heap
    LoaderBridge,
    /// Bridge objects holding a class's static state
    StaticInstance,
}

impl ClassKind {
    /// Bridge objects are owned by the runtime and never have references reset
    pub fn is_vm_bridge(&self) -> bool {
        matches!(self, ClassKind::LoaderBridge | ClassKind::StaticInstance)
    }
}

/// Class definition metadata
#[derive(Debug, Clone)]
pub struct Class {
    /// Class reference (unique identifier)
    pub id: ClassRef,
    /// Fully qualified class name
    pub name: String,
    /// Field names, in slot order
    pub field_names: Vec<String>,
    /// Instance kind
    pub kind: ClassKind,
    /// Instances must be finalized before they can be reclaimed
    pub finalizable: bool,
}

impl Class {
    /// Number of instance fields
    pub fn field_count(&self) -> usize {
        self.field_names.len()
    }

    /// Field name for a slot, if the slot exists
    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.field_names.get(index).map(String::as_str)
    }

    /// Find the slot of a named field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_names.iter().position(|f| f == name)
    }
}

/// Definition of a class about to be loaded
///
/// ```rust,ignore
/// let def = ClassDef::new("ijvm.tests.CImpl.Activator")
///     .fields(["context", "tracker", "b", "c"])
///     .finalizable();
/// ```
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub(crate) name: String,
    pub(crate) field_names: Vec<String>,
    pub(crate) kind: ClassKind,
    pub(crate) finalizable: bool,
}

impl ClassDef {
    /// Start a regular class definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_names: Vec::new(),
            kind: ClassKind::Regular,
            finalizable: false,
        }
    }

    /// Start an array class definition
    pub fn array(name: impl Into<String>) -> Self {
        Self {
            kind: ClassKind::Array,
            ..Self::new(name)
        }
    }

    /// Set the instance fields
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the class kind
    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark instances as finalizable
    pub fn finalizable(mut self) -> Self {
        self.finalizable = true;
        self
    }

    pub(crate) fn into_class(self, id: ClassRef) -> Class {
        Class {
            id,
            name: self.name,
            field_names: self.field_names,
            kind: self.kind,
            finalizable: self.finalizable,
        }
    }
}

/// Object instance (heap-allocated)
#[derive(Debug, Clone)]
pub struct Object {
    /// Class of this instance
    pub class: ClassRef,
    /// Field values
    pub fields: Vec<Value>,
}

impl Object {
    /// Create a new object with null fields
    pub fn new(class: ClassRef, field_count: usize) -> Self {
        Self {
            class,
            fields: vec![Value::null(); field_count],
        }
    }

    /// Get a field value by index
    pub fn get_field(&self, index: usize) -> Option<Value> {
        self.fields.get(index).copied()
    }

    /// Set a field value by index; returns false when out of bounds
    pub fn set_field(&mut self, index: usize, value: Value) -> bool {
        match self.fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Get number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Array instance (heap-allocated, growable)
#[derive(Debug, Clone)]
pub struct Array {
    /// Array class
    pub class: ClassRef,
    /// Elements
    pub elements: Vec<Value>,
}

impl Array {
    /// Create a new array of nulls
    pub fn new(class: ClassRef, length: usize) -> Self {
        Self {
            class,
            elements: vec![Value::null(); length],
        }
    }

    /// Get array length
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if array is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Get element at index
    pub fn get(&self, index: usize) -> Option<Value> {
        self.elements.get(index).copied()
    }

    /// Set element at index; returns false when out of bounds
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.elements.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Append an element, returning the new length
    pub fn push(&mut self, value: Value) -> usize {
        self.elements.push(value);
        self.elements.len()
    }
}

/// Location of a reference inside a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSlot {
    /// Instance field slot
    Field(usize),
    /// Array element slot
    Element(usize),
}

impl fmt::Display for EdgeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeSlot::Field(i) => write!(f, "field[{}]", i),
            EdgeSlot::Element(i) => write!(f, "element[{}]", i),
        }
    }
}

/// Anything that can live in the managed heap
#[derive(Debug, Clone)]
pub enum HeapObject {
    /// Instance with fields
    Object(Object),
    /// Element array
    Array(Array),
}

impl HeapObject {
    /// Class of this object
    pub fn class(&self) -> ClassRef {
        match self {
            HeapObject::Object(obj) => obj.class,
            HeapObject::Array(arr) => arr.class,
        }
    }

    /// Read a slot
    pub fn slot(&self, slot: EdgeSlot) -> Option<Value> {
        match (self, slot) {
            (HeapObject::Object(obj), EdgeSlot::Field(i)) => obj.get_field(i),
            (HeapObject::Array(arr), EdgeSlot::Element(i)) => arr.get(i),
            _ => None,
        }
    }

    /// Write a slot; returns false if the slot does not exist
    pub fn set_slot(&mut self, slot: EdgeSlot, value: Value) -> bool {
        match (self, slot) {
            (HeapObject::Object(obj), EdgeSlot::Field(i)) => obj.set_field(i, value),
            (HeapObject::Array(arr), EdgeSlot::Element(i)) => arr.set(i, value),
            _ => false,
        }
    }

    /// All slot values in order, tagged with their location
    pub fn slots(&self) -> impl Iterator<Item = (EdgeSlot, Value)> + '_ {
        let (values, make): (&[Value], fn(usize) -> EdgeSlot) = match self {
            HeapObject::Object(obj) => (obj.fields.as_slice(), EdgeSlot::Field as fn(usize) -> EdgeSlot),
            HeapObject::Array(arr) => (arr.elements.as_slice(), EdgeSlot::Element as fn(usize) -> EdgeSlot),
        };
        values.iter().enumerate().map(move |(i, v)| (make(i), *v))
    }

    /// Outgoing strong references, in slot order
    pub fn references(&self) -> impl Iterator<Item = (EdgeSlot, ObjectHandle)> + '_ {
        self.slots()
            .filter_map(|(slot, value)| value.as_handle().map(|h| (slot, h)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_fields() {
        let mut obj = Object::new(ClassRef::new(0), 2);
        assert_eq!(obj.field_count(), 2);
        assert_eq!(obj.get_field(0), Some(Value::null()));

        assert!(obj.set_field(1, Value::i32(9)));
        assert_eq!(obj.get_field(1), Some(Value::i32(9)));
        assert!(!obj.set_field(2, Value::i32(1)));
    }

    #[test]
    fn test_array_push_and_set() {
        let mut arr = Array::new(ClassRef::new(1), 0);
        assert!(arr.is_empty());
        assert_eq!(arr.push(Value::bool(true)), 1);
        assert!(arr.set(0, Value::i32(3)));
        assert!(!arr.set(5, Value::i32(3)));
        assert_eq!(arr.get(0), Some(Value::i32(3)));
    }

    #[test]
    fn test_class_def_builder() {
        let class = ClassDef::new("ijvm.tests.B.BImpl")
            .fields(["name", "next"])
            .finalizable()
            .into_class(ClassRef::new(4));

        assert_eq!(class.id, ClassRef::new(4));
        assert_eq!(class.field_count(), 2);
        assert_eq!(class.field_index("next"), Some(1));
        assert_eq!(class.field_name(0), Some("name"));
        assert!(class.finalizable);
        assert_eq!(class.kind, ClassKind::Regular);
    }

    #[test]
    fn test_heap_object_references() {
        let target = ObjectHandle::new(3, 0);
        let mut obj = Object::new(ClassRef::new(0), 3);
        obj.set_field(0, Value::i32(1));
        obj.set_field(2, Value::reference(target));

        let heap_obj = HeapObject::Object(obj);
        let refs: Vec<_> = heap_obj.references().collect();
        assert_eq!(refs, vec![(EdgeSlot::Field(2), target)]);
    }

    #[test]
    fn test_heap_object_slot_kinds() {
        let mut heap_obj = HeapObject::Array(Array::new(ClassRef::new(0), 1));
        assert!(heap_obj.set_slot(EdgeSlot::Element(0), Value::i32(4)));
        assert!(!heap_obj.set_slot(EdgeSlot::Field(0), Value::i32(4)));
        assert_eq!(heap_obj.slot(EdgeSlot::Element(0)), Some(Value::i32(4)));
    }

    #[test]
    fn test_bridge_kinds() {
        assert!(ClassKind::LoaderBridge.is_vm_bridge());
        assert!(ClassKind::StaticInstance.is_vm_bridge());
        assert!(!ClassKind::Regular.is_vm_bridge());
    }
}
