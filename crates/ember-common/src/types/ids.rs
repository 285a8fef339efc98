//! Core identifier types for Ember.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of object ids, type ids and locators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object identifier - uniquely identifies an object instance.
///
/// Catalog records (tables, fields) are objects too, so catalog record ids
/// are also `ObjectId`s.
///
/// # Example
///
/// ```rust
/// use ember_common::types::ObjectId;
///
/// let id = ObjectId::new(42);
/// assert_eq!(id.as_u64(), 42);
/// assert!(!ObjectId::INVALID.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Invalid object ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `ObjectId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next object ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid object ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ObjectId(INVALID)")
        } else {
            write!(f, "ObjectId({})", self.0)
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

impl From<ObjectId> for u64 {
    #[inline]
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Object type identifier - identifies a schema class (a table).
///
/// Type ids are stable for the lifetime of the catalog entry that
/// declares them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectType(u64);

impl ObjectType {
    /// Invalid type ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `ObjectType` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid type ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ObjectType(INVALID)")
        } else {
            write!(f, "ObjectType({})", self.0)
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectType {
    #[inline]
    fn from(id: u64) -> Self {
        Self::new(id)
    }
}

/// Position of a field within a table's schema.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FieldPosition(u16);

impl FieldPosition {
    /// Creates a new `FieldPosition`.
    #[inline]
    #[must_use]
    pub const fn new(position: u16) -> Self {
        Self(position)
    }

    /// Returns the raw position.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for FieldPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPosition({})", self.0)
    }
}

impl fmt::Display for FieldPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for FieldPosition {
    #[inline]
    fn from(position: u16) -> Self {
        Self::new(position)
    }
}

/// Locator - a logical handle indirecting an object's identity from the
/// physical offset of its current version.
///
/// Locators are assigned monotonically by the memory manager and are never
/// reused. Zero is the invalid sentinel.
///
/// # Example
///
/// ```rust
/// use ember_common::types::Locator;
///
/// let first = Locator::FIRST;
/// assert!(first.is_valid());
/// assert!(first.next() > first);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Locator(u64);

impl Locator {
    /// Invalid locator, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First locator handed out by a fresh memory manager.
    pub const FIRST: Self = Self(1);

    /// Creates a new `Locator` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(locator: u64) -> Self {
        Self(locator)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the raw value as a table index.
    #[inline]
    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Returns the next locator.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid locator.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Locator(INVALID)")
        } else {
            write!(f, "Locator({})", self.0)
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Locator {
    #[inline]
    fn from(locator: u64) -> Self {
        Self::new(locator)
    }
}

impl From<Locator> for u64 {
    #[inline]
    fn from(locator: Locator) -> Self {
        locator.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id() {
        let id = ObjectId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert!(id.is_valid());
        assert!(!ObjectId::INVALID.is_valid());
        assert_eq!(id.next().as_u64(), 43);
    }

    #[test]
    fn test_locator_ordering() {
        let a = Locator::FIRST;
        let b = a.next();
        assert!(b > a);
        assert!(!Locator::INVALID.is_valid());
        assert_eq!(b.as_index(), 2);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ObjectId::INVALID), "ObjectId(INVALID)");
        assert_eq!(format!("{:?}", ObjectType::new(7)), "ObjectType(7)");
        assert_eq!(format!("{}", Locator::new(9)), "9");
    }

    #[test]
    fn test_conversions() {
        let loc: Locator = 5u64.into();
        let raw: u64 = loc.into();
        assert_eq!(raw, 5);
        let pos: FieldPosition = 3u16.into();
        assert_eq!(pos.as_u16(), 3);
    }
}
