//! Value representation using tagged words (64-bit)
//!
//! Field slots, array elements and roots all hold a `Value`. Values are stored
//! in 64 bits with the lowest 3 bits used as a type tag.
//!
//! # Encoding Strategy
//!
//! ```text
//! Reference: iiiiiiiiiiiiiiiiiiiiiiiiiiiiiiiigggggggggggggggggggggggggggggg000
//!            (slot index: 32 bits, slot generation: 29 bits)
//! i32:       000000000000000000000000000000iiiiiiiiiiiiiiiiiiiiiiiiiiiiiii001
//! bool:      000000000000000000000000000000000000000000000000000000000000b010
//! null:      0000000000000000000000000000000000000000000000000000000000000110
//! ```
//!
//! A reference never encodes a memory address. It encodes an identity-table
//! slot and that slot's generation, so it stays valid while the collector
//! moves the object's storage around.

use crate::identity::{ObjectHandle, GENERATION_MASK};
use std::fmt;

/// Tagged value representation
///
/// Values are encoded in 64 bits with tag bits in the lowest 3 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    // Tag constants (lowest 3 bits)
    const TAG_MASK: u64 = 0b111;
    const TAG_REF: u64 = 0b000;
    const TAG_I32: u64 = 0b001;
    const TAG_BOOL: u64 = 0b010;
    const TAG_NULL: u64 = 0b110;

    // Special values
    const NULL: u64 = Self::TAG_NULL;
    const TRUE: u64 = (1 << 3) | Self::TAG_BOOL;
    const FALSE: u64 = Self::TAG_BOOL;

    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value(Self::NULL)
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value(if b { Self::TRUE } else { Self::FALSE })
    }

    /// Create an i32 value
    #[inline]
    pub const fn i32(i: i32) -> Self {
        // Store i32 in upper 32 bits, tag in lower bits
        Value((((i as u32) as u64) << 32) | Self::TAG_I32)
    }

    /// Create a reference to a heap object
    #[inline]
    pub const fn reference(handle: ObjectHandle) -> Self {
        let index = handle.index() as u64;
        let generation = (handle.generation() & GENERATION_MASK) as u64;
        Value((index << 32) | (generation << 3) | Self::TAG_REF)
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == Self::NULL
    }

    /// Check if this value is a boolean
    #[inline]
    pub const fn is_bool(&self) -> bool {
        (self.0 & Self::TAG_MASK) == Self::TAG_BOOL
    }

    /// Check if this value is an i32
    #[inline]
    pub const fn is_i32(&self) -> bool {
        (self.0 & Self::TAG_MASK) == Self::TAG_I32
    }

    /// Check if this value is a heap reference
    #[inline]
    pub const fn is_reference(&self) -> bool {
        (self.0 & Self::TAG_MASK) == Self::TAG_REF
    }

    /// Extract boolean value
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        if self.is_bool() {
            Some((self.0 >> 3) != 0)
        } else {
            None
        }
    }

    /// Extract i32 value
    #[inline]
    pub const fn as_i32(&self) -> Option<i32> {
        if self.is_i32() {
            Some((self.0 >> 32) as u32 as i32)
        } else {
            None
        }
    }

    /// Extract the referenced object handle
    ///
    /// The handle may be expired; resolve it through the heap before use.
    #[inline]
    pub const fn as_handle(&self) -> Option<ObjectHandle> {
        if self.is_reference() {
            let index = (self.0 >> 32) as u32;
            let generation = ((self.0 >> 3) as u32) & GENERATION_MASK;
            Some(ObjectHandle::new(index, generation))
        } else {
            None
        }
    }

    /// Get raw bits (for debugging)
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Get tag bits
    #[inline]
    pub const fn tag(&self) -> u64 {
        self.0 & Self::TAG_MASK
    }

    /// Get type name for debugging
    pub const fn type_name(&self) -> &'static str {
        match self.tag() {
            Self::TAG_NULL => "null",
            Self::TAG_BOOL => "bool",
            Self::TAG_I32 => "i32",
            Self::TAG_REF => "reference",
            _ => "unknown",
        }
    }
}

impl From<ObjectHandle> for Value {
    fn from(handle: ObjectHandle) -> Self {
        Value::reference(handle)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::i32(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(b) = self.as_bool() {
            write!(f, "bool({})", b)
        } else if let Some(i) = self.as_i32() {
            write!(f, "i32({})", i)
        } else if let Some(handle) = self.as_handle() {
            write!(f, "ref({})", handle)
        } else if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "Value({:#x})", self.0)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(b) = self.as_bool() {
            write!(f, "{}", b)
        } else if let Some(i) = self.as_i32() {
            write!(f, "{}", i)
        } else if let Some(handle) = self.as_handle() {
            write!(f, "[object {}]", handle)
        } else if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "<??>")
        }
    }
}

// Implement Default to return null
impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_null() {
        let v = Value::null();
        assert!(v.is_null());
        assert!(!v.is_bool());
        assert!(!v.is_i32());
        assert!(!v.is_reference());
        assert_eq!(v.type_name(), "null");
        assert_eq!(v.as_handle(), None);
    }

    #[test]
    fn test_value_bool() {
        let t = Value::bool(true);
        assert!(t.is_bool());
        assert_eq!(t.as_bool(), Some(true));

        let f = Value::bool(false);
        assert!(f.is_bool());
        assert_eq!(f.as_bool(), Some(false));
        assert_ne!(f, Value::null());
    }

    #[test]
    fn test_value_i32() {
        assert_eq!(Value::i32(42).as_i32(), Some(42));
        assert_eq!(Value::i32(-100).as_i32(), Some(-100));
        assert_eq!(Value::i32(i32::MIN).as_i32(), Some(i32::MIN));
        assert_eq!(Value::i32(i32::MAX).as_i32(), Some(i32::MAX));
    }

    #[test]
    fn test_value_reference() {
        let handle = ObjectHandle::new(7, 3);
        let v = Value::reference(handle);
        assert!(v.is_reference());
        assert_eq!(v.type_name(), "reference");
        assert_eq!(v.as_handle(), Some(handle));

        // Slot 0, generation 0 is still distinct from null
        let first = Value::reference(ObjectHandle::new(0, 0));
        assert!(!first.is_null());
        assert_eq!(first.as_handle(), Some(ObjectHandle::new(0, 0)));
    }

    #[test]
    fn test_value_reference_large_index() {
        let handle = ObjectHandle::new(u32::MAX, GENERATION_MASK);
        assert_eq!(Value::reference(handle).as_handle(), Some(handle));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::null()), "null");
        assert_eq!(format!("{}", Value::bool(true)), "true");
        assert_eq!(format!("{}", Value::i32(-10)), "-10");
        assert_eq!(
            format!("{}", Value::reference(ObjectHandle::new(2, 1))),
            "[object #2:1]"
        );
    }

    #[test]
    fn test_value_size() {
        // Value should be exactly 8 bytes
        assert_eq!(std::mem::size_of::<Value>(), 8);
    }
}
